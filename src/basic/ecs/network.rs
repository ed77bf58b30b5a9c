//! The grid container and its power-flow surface.
//!
//! [`PowerGrid`] wraps a bevy [`App`] whose world holds the network as
//! entities. [`PowerFlow::init_pf_net`] runs the startup assembly once and
//! fails fast on any configuration or topology defect collected along the
//! way; [`PowerFlow::run_pf`] then drives the solve schedule.

use bevy_app::prelude::*;
use bevy_ecs::{component::Mutable, prelude::*, world::error::EntityMutableFetchError};
use derive_more::{Deref, DerefMut};
use tracing::error;

use crate::basic::error::{GridError, GridResult};

use super::plugin::{BaseAssemblyPlugins, BasePFPlugin};
use super::powerflow::systems::PowerFlowConfig;

/// Update-phase ordering of the solve pipeline.
#[derive(Clone, SystemSet, Debug, Hash, PartialEq, Eq)]
pub enum SolverStage {
    BeforeSolve,
    Solve,
    AfterSolve,
}

/// Defects collected by the infallible startup systems. Inspected once
/// after the startup schedule ran; any entry aborts initialization.
#[derive(Default, Debug, Deref, DerefMut, Resource)]
pub struct AssemblyErrors(Vec<GridError>);

impl AssemblyErrors {
    pub fn push(&mut self, error: GridError) {
        self.0.push(error);
    }

    pub fn take(&mut self) -> Vec<GridError> {
        std::mem::take(&mut self.0)
    }
}

/// Represents the power grid, managing the ECS world for power flow
/// calculations.
#[derive(Debug, Default)]
pub struct PowerGrid {
    data_storage: App,
}

impl PowerGrid {
    pub fn app(&self) -> &App {
        &self.data_storage
    }

    pub fn app_mut(&mut self) -> &mut App {
        &mut self.data_storage
    }
}

/// Trait for performing operations on ECS data, such as getting and
/// mutating components of entities.
pub trait DataOps {
    fn get_entity_mut(
        &mut self,
        entity: Entity,
    ) -> Result<EntityWorldMut<'_>, EntityMutableFetchError>;
    fn get_mut<T>(&'_ mut self, entity: Entity) -> Option<Mut<'_, T>>
    where
        T: Component<Mutability = Mutable>;
    fn get<T>(&self, entity: Entity) -> Option<&T>
    where
        T: Component;
    fn world_mut(&mut self) -> &mut World;
    fn world(&self) -> &World;
}

impl DataOps for PowerGrid {
    fn world(&self) -> &World {
        self.app().world()
    }

    fn world_mut(&mut self) -> &mut World {
        self.app_mut().world_mut()
    }

    fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.world().get(entity)
    }

    fn get_mut<T: Component>(&'_ mut self, entity: Entity) -> Option<Mut<'_, T>>
    where
        T: Component<Mutability = Mutable>,
    {
        self.world_mut().get_mut(entity)
    }

    fn get_entity_mut(
        &mut self,
        entity: Entity,
    ) -> Result<EntityWorldMut<'_>, EntityMutableFetchError> {
        self.world_mut().get_entity_mut(entity)
    }
}

/// Trait for defining power flow operations.
pub trait PowerFlow {
    /// Runs element setup, node merging, validation and matrix assembly.
    /// Fails on the first defect the assembly passes collected.
    fn init_pf_net(&mut self) -> GridResult<()>;

    /// Runs one solve of the assembled network.
    fn run_pf(&mut self);
}

impl PowerFlow for PowerGrid {
    fn init_pf_net(&mut self) -> GridResult<()> {
        let config = self
            .world_mut()
            .get_resource_or_insert_with(PowerFlowConfig::default)
            .clone();
        config.calculator.validate()?;

        self.app_mut()
            .add_plugins((BaseAssemblyPlugins, BasePFPlugin));

        let world = self.world_mut();
        let mut schedules = world
            .get_resource_mut::<Schedules>()
            .ok_or(GridError::LinearSolve("schedules missing"))?;
        // Run the startup assembly exactly once; the schedule stays
        // removed so later updates cannot re-run it.
        if let Some(mut startup) = schedules.remove(Startup) {
            startup.run(world);
        }

        let mut defects = world.resource_mut::<AssemblyErrors>().take();
        if defects.is_empty() {
            return Ok(());
        }
        for extra in defects.drain(1..) {
            error!(%extra, "additional assembly defect");
        }
        Err(defects.remove(0))
    }

    fn run_pf(&mut self) {
        self.app_mut().update();
    }
}
