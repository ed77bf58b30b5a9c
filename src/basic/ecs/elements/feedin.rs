use bevy_ecs::prelude::*;
use nalgebra::Complex;

use super::units::*;

/// Marker for a feed-in (external grid) element.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct FeedIn;

/// Complex source voltage of a feed-in, in volts.
#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SourceVoltage(pub Complex<f64>);

/// Internal series impedance of a feed-in. Zero pins the connected bus
/// itself as the slack; non-zero interposes an internal source node so the
/// terminal voltage may sag under load.
#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InternalImpedance {
    pub resistance: Pair<f64, Ohm>,
    pub reactance: Pair<f64, Ohm>,
}

impl InternalImpedance {
    pub fn as_complex(&self) -> Complex<f64> {
        Complex::new(*self.resistance, *self.reactance)
    }
}

/// Where this feed-in actually enforces the slack voltage; written during
/// setup (the target bus, or a spawned internal source node).
#[derive(Component, Debug, Clone, Copy)]
pub struct SlackAt(pub i64);

#[derive(Bundle)]
pub struct FeedInBundle {
    pub marker: FeedIn,
    pub target: super::load::TargetNode,
    pub voltage: SourceVoltage,
    pub impedance: InternalImpedance,
}

pub mod systems {
    use tracing::debug;

    use crate::basic::ecs::elements::{
        Admittance, AdmittanceBranch, BusID, InternalNode, NodeLookup, Port2, SBusInjPu,
        TargetNode, VBase, VBusPu, VNominal,
    };
    use crate::basic::ecs::network::AssemblyErrors;
    use crate::basic::error::ConfigError;

    use super::*;

    /// Resolves each feed-in to the node it pins: the target bus for an
    /// ideal source, or a spawned internal node behind the source
    /// impedance.
    pub fn setup_feed_ins(
        mut commands: Commands,
        mut errors: ResMut<AssemblyErrors>,
        mut lookup: ResMut<NodeLookup>,
        nominals: Query<&VNominal>,
        q: Query<(Entity, &TargetNode, &InternalImpedance), With<FeedIn>>,
    ) {
        for (entity, target, impedance) in q.iter() {
            let Some(bus_entity) = lookup.get_entity(target.0) else {
                errors.push(ConfigError::UnknownNodeId(target.0).into());
                continue;
            };
            let Ok(vn) = nominals.get(bus_entity) else {
                continue;
            };
            let z = impedance.as_complex();
            if z.norm() == 0.0 {
                commands.entity(entity).insert(SlackAt(target.0));
                continue;
            }

            let source_id = lookup.allocate_id();
            let source = commands
                .spawn((
                    BusID(source_id),
                    vn.clone(),
                    InternalNode,
                    SBusInjPu::default(),
                    VBusPu::default(),
                ))
                .id();
            lookup.insert(source_id, source);
            debug!(source_id, "allocated internal source node for feed-in");

            commands.entity(entity).insert(SlackAt(source_id));
            commands.entity(entity).with_children(|child| {
                child.spawn(AdmittanceBranch {
                    y: Admittance(z.inv()),
                    port: Port2::new(source_id, target.0),
                    v_base: VBase(*vn.0),
                });
            });
        }
    }
}
