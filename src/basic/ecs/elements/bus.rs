use bevy_ecs::prelude::*;
use nalgebra::Complex;

use super::units::*;

/// Solved (or seed) bus voltage in per-unit.
#[derive(Component, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct VBusPu(pub Complex<f64>);

impl Default for VBusPu {
    fn default() -> Self {
        VBusPu(Complex::new(1.0, 0.0))
    }
}

/// Aggregated per-unit power injection at a bus (loads negative,
/// generation positive).
#[derive(Component, Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SBusInjPu(pub Complex<f64>);

/// User-facing bus identifier; doubles as the admittance-matrix position
/// until node merging remaps it.
#[derive(Component, Eq, Ord, PartialEq, PartialOrd, Debug, Clone, Copy)]
#[require(VNominal)]
#[derive(serde::Serialize, serde::Deserialize, Default)]
pub struct BusID(pub i64);

/// Nominal voltage magnitude of a bus, in volts.
#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VNominal(pub Pair<f64, Volt>);

impl Default for VNominal {
    fn default() -> Self {
        VNominal(Pair::new(230.0))
    }
}

/// Marks an internal node an element introduced (transformer star points,
/// feed-in source nodes). Excluded from user-facing result tables.
#[derive(Component, Debug, Clone, Copy)]
pub struct InternalNode;

#[derive(Bundle, Default)]
pub struct BusBundle {
    pub bus_id: BusID,
    pub vn: VNominal,
}

pub mod systems {
    use tracing::debug;

    use crate::basic::ecs::elements::NodeLookup;

    use super::*;

    /// Registers every bus entity in the lookup and attaches the solve
    /// state components.
    pub fn init_node_lookup(mut cmd: Commands, bus_ids: Query<(Entity, &BusID)>) {
        let mut node_lookup = NodeLookup::default();
        bus_ids.iter().for_each(|(entity, bus_id)| {
            node_lookup.insert(bus_id.0, entity);
            cmd.entity(entity)
                .insert((SBusInjPu::default(), VBusPu::default()));
        });
        debug!(buses = node_lookup.len(), "node lookup initialized");
        cmd.insert_resource(node_lookup);
    }
}
