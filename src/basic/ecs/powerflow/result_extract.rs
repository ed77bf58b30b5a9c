use bevy_app::prelude::*;
use bevy_ecs::prelude::*;

use crate::basic::ecs::elements::{NodeLookup, VBusPu};
use crate::basic::ecs::merge::NodeMapping;
use crate::basic::ecs::network::SolverStage;

use super::systems::{MatrixIndexMap, PowerFlowResult, ecs_run_pf};

/// Writes the solved per-unit voltages back onto every bus entity. A
/// merged bus reads its group representative's matrix position, so buses
/// joined by a zero-impedance connection end up with identical voltages.
pub fn extract_powerflow_results(
    res: Res<PowerFlowResult>,
    index: Res<MatrixIndexMap>,
    mapping: Res<NodeMapping>,
    buses: Res<NodeLookup>,
    mut q: Query<&mut VBusPu>,
) {
    for (bus_id, entity) in buses.iter() {
        let Some(pos) = index.position_of(mapping.map(bus_id)) else {
            continue;
        };
        if let Ok(mut bus) = q.get_mut(entity) {
            bus.0 = res.v[pos];
        }
    }
}

#[derive(Default)]
pub struct VBusUpdatePlugin;

impl Plugin for VBusUpdatePlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            Update,
            extract_powerflow_results
                .after(ecs_run_pf)
                .run_if(resource_exists::<PowerFlowResult>)
                .in_set(SolverStage::AfterSolve),
        );
    }
}
