use std::collections::HashMap;

mod bus;
mod feedin;
mod generator;
mod line;
mod load;
mod trans;
mod units;

use bevy_app::Startup;
use bevy_ecs::entity::EntityHash;
use bevy_ecs::prelude::*;
use derive_more::{Deref, DerefMut};
use nalgebra::Complex;

use crate::basic::ecs::plugin::BeforePFInitStage;

pub use bus::*;
pub use feedin::*;
pub use generator::*;
pub use line::*;
pub use load::*;
pub use trans::*;
pub use units::*;

/// Base voltage (volts) for the per-unit conversion of one branch.
#[derive(Debug, Component, Deref, DerefMut, Default, Clone)]
pub struct VBase(pub f64);

/// Branch admittance in siemens.
#[derive(Component, Clone, Default, PartialEq, Debug)]
pub struct Admittance(pub Complex<f64>);

/// The two bus ids a branch connects; [`crate::basic::admittance::GND`]
/// marks a ground-coupled side.
#[derive(Component, Deref, DerefMut, Default, Debug, Clone, PartialEq)]
pub struct Port2(pub nalgebra::Vector2<i64>);

impl Port2 {
    pub fn new(a: i64, b: i64) -> Self {
        Port2(nalgebra::vector![a, b])
    }
}

/// One stamped admittance contribution. Element setup systems spawn these
/// as children of the owning element entity; matrix assembly consumes them
/// uniformly regardless of which element produced them.
#[derive(Debug, Default, Bundle, Clone)]
pub struct AdmittanceBranch {
    pub y: Admittance,
    pub port: Port2,
    pub v_base: VBase,
}

/// Maps bus ids to ECS entities and back.
#[derive(Default, Debug, Resource)]
pub struct NodeLookup {
    forward: Vec<Option<Entity>>,
    reverse: HashMap<Entity, i64, EntityHash>,
}

impl NodeLookup {
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, Entity)> + '_ {
        self.forward
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|e| (i as i64, e)))
    }

    pub fn insert(&mut self, bus_id: i64, entity: Entity) {
        let idx = bus_id as usize;
        if self.forward.len() <= idx {
            self.forward.resize_with(idx + 1, || None);
        }
        if let Some(old_id) = self.reverse.insert(entity, bus_id) {
            if let Some(e) = self.forward.get_mut(old_id as usize) {
                if *e == Some(entity) {
                    *e = None;
                }
            }
        }
        self.forward[idx] = Some(entity);
    }

    /// The lowest id not yet taken, used when elements introduce internal
    /// nodes.
    pub fn allocate_id(&self) -> i64 {
        self.forward.len() as i64
    }

    pub fn get_entity(&self, bus_id: i64) -> Option<Entity> {
        self.forward.get(bus_id as usize).and_then(|x| *x)
    }

    pub fn get_id(&self, entity: Entity) -> Option<i64> {
        self.reverse.get(&entity).copied()
    }

    pub fn contains_id(&self, bus_id: i64) -> bool {
        self.forward
            .get(bus_id as usize)
            .is_some_and(|e| e.is_some())
    }
}

/// Registers the element setup systems: internal-node spawning first (so
/// the lookup knows every node), then branch stamping.
#[derive(Default)]
pub struct ElementSetupPlugin;

impl bevy_app::Plugin for ElementSetupPlugin {
    fn build(&self, app: &mut bevy_app::App) {
        app.init_resource::<crate::basic::ecs::network::AssemblyErrors>();
        app.add_systems(
            Startup,
            (
                bus::systems::init_node_lookup,
                (
                    feedin::systems::setup_feed_ins,
                    trans::systems::setup_three_winding_transformers,
                ),
                (
                    line::systems::setup_lines,
                    trans::systems::setup_transformers,
                    load::systems::setup_loads,
                ),
            )
                .chain()
                .in_set(BeforePFInitStage),
        );
    }
}
