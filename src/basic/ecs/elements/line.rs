use bevy_ecs::prelude::*;

use super::units::*;

/// Sending-end bus id of a branch element.
#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FromNode(pub i64);

/// Receiving-end bus id of a branch element.
#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToNode(pub i64);

/// Marker for a transmission line element.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct Line;

/// Physical line parameters in SI units.
#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LineParams {
    pub resistance: Pair<f64, Ohm>,
    pub reactance: Pair<f64, Ohm>,
    /// Total shunt conductance, split between the two ends.
    pub shunt_conductance: Pair<f64, Siemens>,
    /// Total shunt susceptance, split between the two ends.
    pub shunt_susceptance: Pair<f64, Siemens>,
}

#[derive(Bundle)]
pub struct LineBundle {
    pub marker: Line,
    pub from: FromNode,
    pub to: ToNode,
    pub params: LineParams,
}

pub mod systems {
    use nalgebra::Complex;

    use crate::basic::ecs::elements::{
        Admittance, AdmittanceBranch, NodeLookup, Port2, VBase, VNominal,
    };
    use crate::basic::ecs::merge::MergeNode;
    use crate::basic::ecs::network::AssemblyErrors;
    use crate::basic::error::{ConfigError, TopologyError};
    use crate::basic::admittance::GND;

    use super::*;

    /// Spawns pi-model admittance branches for every line. A line with
    /// zero series impedance becomes a node-merge candidate instead of a
    /// numerically degenerate branch.
    pub fn setup_lines(
        mut commands: Commands,
        mut errors: ResMut<AssemblyErrors>,
        lookup: Res<NodeLookup>,
        nominals: Query<&VNominal>,
        q: Query<(Entity, &LineParams, &FromNode, &ToNode), With<Line>>,
    ) {
        for (entity, params, from, to) in q.iter() {
            let (Some(from_entity), Some(to_entity)) =
                (lookup.get_entity(from.0), lookup.get_entity(to.0))
            else {
                let unknown = if lookup.contains_id(from.0) { to.0 } else { from.0 };
                errors.push(ConfigError::UnknownNodeId(unknown).into());
                continue;
            };
            let (Ok(vn_from), Ok(vn_to)) = (nominals.get(from_entity), nominals.get(to_entity))
            else {
                continue;
            };
            if *vn_from.0 != *vn_to.0 {
                errors.push(
                    TopologyError::NominalVoltageMismatch {
                        from: from.0,
                        to: to.0,
                        v_from: *vn_from.0,
                        v_to: *vn_to.0,
                    }
                    .into(),
                );
                continue;
            }
            let v_base = *vn_from.0;

            let z = Complex::new(*params.resistance, *params.reactance);
            if z.norm() == 0.0 {
                commands
                    .entity(entity)
                    .insert(MergeNode(from.0, to.0));
                continue;
            }

            let y_series = z.inv();
            let y_shunt =
                Complex::new(*params.shunt_conductance, *params.shunt_susceptance) * 0.5;
            commands.entity(entity).with_children(|child| {
                child.spawn(AdmittanceBranch {
                    y: Admittance(y_series),
                    port: Port2::new(from.0, to.0),
                    v_base: VBase(v_base),
                });
                if y_shunt.norm() > 0.0 {
                    child.spawn(AdmittanceBranch {
                        y: Admittance(y_shunt),
                        port: Port2::new(from.0, GND),
                        v_base: VBase(v_base),
                    });
                    child.spawn(AdmittanceBranch {
                        y: Admittance(y_shunt),
                        port: Port2::new(to.0, GND),
                        v_base: VBase(v_base),
                    });
                }
            });
        }
    }
}
