//! Plugin wiring for the startup assembly and the solve schedule.
//!
//! Startup is split into three ordered sets: element setup (internal node
//! spawning and branch stamping), node tagging and injection, and the
//! validation plus matrix-building pass. The update phase runs the solve
//! and result extraction.

use bevy_app::{plugin_group, prelude::*};
use bevy_ecs::prelude::*;

use super::elements::ElementSetupPlugin;
use super::merge;
use super::network::SolverStage;
use super::powerflow::init as pf_init;
use super::powerflow::result_extract::VBusUpdatePlugin;
use super::powerflow::systems::{PowerFlowConfig, PowerFlowMat, ecs_run_pf, init_states};
use super::scaling;
use super::topology;

/// Element setup: internal nodes and branch stamps.
#[derive(Debug, SystemSet, Hash, Eq, PartialEq, Clone)]
pub struct BeforePFInitStage;

/// Node merging, scaling, tagging and injection.
#[derive(Debug, SystemSet, Hash, Eq, PartialEq, Clone)]
pub struct PFInitStage;

/// Validation and matrix assembly.
#[derive(Debug, SystemSet, Hash, Eq, PartialEq, Clone)]
pub struct AfterPFInitStage;

#[derive(Default)]
pub struct NodeTaggingPlugin;

impl Plugin for NodeTaggingPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            Startup,
            (
                (pf_init::label_slack_nodes, pf_init::label_pv_nodes).chain(),
                pf_init::label_pq_nodes,
                pf_init::check_overdetermined,
                pf_init::inject_powers,
            )
                .chain()
                .in_set(PFInitStage)
                .after(merge::systems::apply_node_merge)
                .after(scaling::systems::init_scalers),
        );
    }
}

#[derive(Default)]
pub struct ModelBuilderPlugin;

impl Plugin for ModelBuilderPlugin {
    fn build(&self, app: &mut App) {
        app.configure_sets(
            Startup,
            (
                BeforePFInitStage.before(PFInitStage),
                AfterPFInitStage.after(PFInitStage),
            ),
        );
        app.add_systems(
            Startup,
            (
                merge::systems::node_aggregation,
                merge::systems::apply_node_merge,
                scaling::systems::init_scalers,
            )
                .chain()
                .in_set(PFInitStage),
        );
        app.add_systems(
            Startup,
            (
                topology::systems::validate_topology,
                init_states.run_if(not(resource_exists::<PowerFlowMat>)),
            )
                .chain()
                .in_set(AfterPFInitStage),
        );
    }
}

plugin_group! {
    /// The whole startup assembly pipeline.
    #[derive(Debug)]
    pub struct BaseAssemblyPlugins {
        :ElementSetupPlugin,
        :NodeTaggingPlugin,
        :ModelBuilderPlugin
    }
}

/// Registers the update-phase solve and result extraction.
pub struct BasePFPlugin;

impl Plugin for BasePFPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PowerFlowConfig>();
        app.configure_sets(
            Update,
            (
                SolverStage::BeforeSolve,
                SolverStage::Solve,
                SolverStage::AfterSolve,
            )
                .chain(),
        );
        app.add_systems(
            Update,
            ecs_run_pf
                .run_if(resource_exists::<PowerFlowMat>)
                .in_set(SolverStage::Solve),
        );
        app.add_plugins(VBusUpdatePlugin);
    }
}

/// Creates a bevy application with the assembly and solve plugins already
/// added. The first `update()` runs the startup assembly.
pub fn default_app() -> App {
    let mut app = App::new();
    app.add_plugins((BaseAssemblyPlugins, BasePFPlugin));
    app
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::ecs::network::{DataOps, PowerFlow, PowerGrid};
    use crate::basic::ecs::post_processing::PostProcessing;
    use crate::basic::ecs::powerflow::systems::PowerFlowResult;
    use crate::basic::error::{GridError, TopologyError};
    use crate::io::network::LoadNetwork;
    use crate::testcases;

    #[test]
    fn default_app_solves_on_first_update() {
        let mut app = default_app();
        app.world_mut()
            .load_network(&testcases::two_bus_feed_and_load())
            .unwrap();
        app.update();
        assert!(app.world().resource::<PowerFlowResult>().converged);
        app.post_process();
        app.print_res_bus();
    }

    #[test]
    fn consistent_phase_shift_ring_initializes_and_solves() {
        let mut grid = PowerGrid::from_network(&testcases::phase_shift_ring(true)).unwrap();
        grid.init_pf_net().unwrap();
        grid.run_pf();
        assert!(grid.world().resource::<PowerFlowResult>().converged);
    }

    #[test]
    fn inconsistent_phase_shift_ring_is_rejected() {
        let mut grid = PowerGrid::from_network(&testcases::phase_shift_ring(false)).unwrap();
        match grid.init_pf_net().unwrap_err() {
            GridError::Topology(TopologyError::PhaseShiftContradiction { .. }) => {}
            other => panic!("unexpected error: {other}"),
        }
    }
}
