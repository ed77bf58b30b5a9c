use bevy_ecs::prelude::*;

use super::units::*;

/// Bus id an injection element acts on.
#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TargetNode(pub i64);

/// Real power in watts, injection convention: consumption is negative.
#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ActivePower(pub Pair<f64, Watt>);

/// Reactive power in var, injection convention.
#[derive(Component, Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReactivePower(pub Pair<f64, Var>);

/// Load held at its specified complex power regardless of voltage.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct ConstantPowerLoad;

/// Load modeled as a fixed shunt impedance sized to draw the specified
/// power at nominal voltage; its true consumption follows the solved
/// voltage and is derived during result translation.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct ConstantImpedanceLoad;

#[derive(Bundle)]
pub struct LoadBundle {
    pub marker: ConstantPowerLoad,
    pub target: TargetNode,
    pub p: ActivePower,
    pub q: ReactivePower,
}

#[derive(Bundle)]
pub struct ImpedanceLoadBundle {
    pub marker: ConstantImpedanceLoad,
    pub target: TargetNode,
    pub p: ActivePower,
    pub q: ReactivePower,
}

pub mod systems {
    use nalgebra::Complex;

    use crate::basic::admittance::GND;
    use crate::basic::ecs::elements::{
        Admittance, AdmittanceBranch, NodeLookup, Port2, VBase, VNominal,
    };
    use crate::basic::ecs::network::AssemblyErrors;
    use crate::basic::error::ConfigError;

    use super::*;

    /// Validates load node references and converts constant-impedance
    /// loads into ground-coupled shunt branches.
    pub fn setup_loads(
        mut commands: Commands,
        mut errors: ResMut<AssemblyErrors>,
        lookup: Res<NodeLookup>,
        nominals: Query<&VNominal>,
        power_loads: Query<&TargetNode, With<ConstantPowerLoad>>,
        impedance_loads: Query<
            (Entity, &TargetNode, &ActivePower, &ReactivePower),
            With<ConstantImpedanceLoad>,
        >,
    ) {
        for target in power_loads.iter() {
            if !lookup.contains_id(target.0) {
                errors.push(ConfigError::UnknownNodeId(target.0).into());
            }
        }

        for (entity, target, p, q) in impedance_loads.iter() {
            let Some(bus_entity) = lookup.get_entity(target.0) else {
                errors.push(ConfigError::UnknownNodeId(target.0).into());
                continue;
            };
            let Ok(vn) = nominals.get(bus_entity) else {
                continue;
            };
            // Consumption at nominal voltage equals the specified power:
            // y = conj(S_consumed) / Vn^2.
            let consumed = -Complex::new(*p.0, *q.0);
            let y = consumed.conj() / (*vn.0 * *vn.0);
            commands.entity(entity).with_children(|child| {
                child.spawn(AdmittanceBranch {
                    y: Admittance(y),
                    port: Port2::new(target.0, GND),
                    v_base: VBase(*vn.0),
                });
            });
        }
    }
}
