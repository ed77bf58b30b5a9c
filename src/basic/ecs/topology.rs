//! Pre-solve topology validation.
//!
//! Two graph passes run before any numeric work: connectivity from the
//! reference (feed-in) component flags floating nodes, and a breadth-first
//! accumulation of transformer phase shifts builds the nominal shift map,
//! comparing the accumulated value whenever a cycle closes on an already
//! visited node.

use std::collections::{HashMap, VecDeque};

use bevy_ecs::prelude::*;
use derive_more::{Deref, DerefMut};
use petgraph::prelude::UnGraphMap;
use tracing::{debug, warn};

use crate::basic::error::TopologyError;

use super::elements::{FromNode, NodeLookup, Port2, SlackAt, ToNode, Transformer, TransformerParams};
use super::merge::NodeMapping;
use super::network::AssemblyErrors;

const SHIFT_TOLERANCE_DEG: f64 = 1e-6;

/// Nominal phase shift per bus in degrees, relative to the reference node.
#[derive(Default, Debug, Clone, Deref, DerefMut, Resource)]
pub struct PhaseShiftMap(pub HashMap<i64, f64>);

/// Undirected network graph with one signed phase shift per edge.
///
/// The weight is oriented toward the larger node id, so traversal in
/// either direction recovers the correct sign.
pub(crate) struct NetworkGraph {
    graph: UnGraphMap<i64, f64>,
}

impl NetworkGraph {
    pub fn new(nodes: impl IntoIterator<Item = i64>) -> Self {
        let mut graph = UnGraphMap::new();
        for node in nodes {
            graph.add_node(node);
        }
        Self { graph }
    }

    /// Adds a shift-free edge unless one already exists (a transformer
    /// edge between the same pair keeps its shift).
    pub fn add_plain_edge(&mut self, a: i64, b: i64) {
        if !self.graph.contains_edge(a, b) {
            self.add_shift_edge(a, b, 0.0);
        }
    }

    pub fn add_shift_edge(&mut self, from: i64, to: i64, shift_deg: f64) {
        let weight = if from < to { shift_deg } else { -shift_deg };
        self.graph.add_edge(from, to, weight);
    }

    fn shift_across(&self, from: i64, to: i64) -> f64 {
        let weight = self.graph.edge_weight(from, to).copied().unwrap_or(0.0);
        if from < to { weight } else { -weight }
    }

    /// Breadth-first sweep from `reference`, accumulating shifts and
    /// checking cycle consistency. Returns the shift map over the
    /// reachable component.
    pub fn phase_shifts(&self, reference: i64) -> Result<HashMap<i64, f64>, TopologyError> {
        let mut shifts = HashMap::new();
        shifts.insert(reference, 0.0);
        let mut queue = VecDeque::from([reference]);
        while let Some(node) = queue.pop_front() {
            let here = shifts[&node];
            for neighbor in self.graph.neighbors(node) {
                let accumulated = here + self.shift_across(node, neighbor);
                match shifts.get(&neighbor) {
                    None => {
                        shifts.insert(neighbor, accumulated);
                        queue.push_back(neighbor);
                    }
                    Some(&existing) => {
                        if (existing - accumulated).abs() > SHIFT_TOLERANCE_DEG {
                            return Err(TopologyError::PhaseShiftContradiction {
                                node: neighbor,
                                existing,
                                conflicting: accumulated,
                            });
                        }
                    }
                }
            }
        }
        Ok(shifts)
    }

    /// Nodes not reachable from `reference`, ascending.
    pub fn unreachable_from(&self, reference: i64) -> Vec<i64> {
        let mut seen: HashMap<i64, ()> = HashMap::new();
        seen.insert(reference, ());
        let mut queue = VecDeque::from([reference]);
        while let Some(node) = queue.pop_front() {
            for neighbor in self.graph.neighbors(node) {
                if seen.insert(neighbor, ()).is_none() {
                    queue.push_back(neighbor);
                }
            }
        }
        let mut floating: Vec<i64> = self
            .graph
            .nodes()
            .filter(|n| !seen.contains_key(n))
            .collect();
        floating.sort_unstable();
        floating
    }
}

pub mod systems {
    use super::*;

    /// Runs both validation passes and publishes the phase shift map.
    pub fn validate_topology(
        mut cmd: Commands,
        mut errors: ResMut<AssemblyErrors>,
        lookup: Res<NodeLookup>,
        mapping: Res<NodeMapping>,
        branches: Query<&Port2>,
        transformers: Query<(&FromNode, &ToNode, &TransformerParams), With<Transformer>>,
        slacks: Query<&SlackAt>,
    ) {
        let representatives = lookup
            .iter()
            .map(|(id, _)| id)
            .filter(|&id| mapping.is_representative(id));
        let mut graph = NetworkGraph::new(representatives);

        for port in branches.iter() {
            if port.0[0] >= 0 && port.0[1] >= 0 {
                graph.add_plain_edge(port.0[0], port.0[1]);
            }
        }
        // Transformer edges last so their shift wins over the series
        // branch stamped between the same buses.
        for (from, to, params) in transformers.iter() {
            graph.add_shift_edge(
                mapping.map(from.0),
                mapping.map(to.0),
                params.phase_shift.0,
            );
        }

        let reference = slacks
            .iter()
            .map(|s| s.0)
            .min()
            .or_else(|| lookup.iter().map(|(id, _)| mapping.map(id)).min());
        let Some(reference) = reference else {
            return;
        };
        debug!(reference, "topology validation reference node");

        let floating = graph.unreachable_from(reference);
        if !floating.is_empty() {
            warn!(count = floating.len(), "floating nodes detected");
            errors.push(TopologyError::FloatingNodes(floating).into());
            return;
        }

        match graph.phase_shifts(reference) {
            Ok(shifts) => {
                cmd.insert_resource(PhaseShiftMap(shifts));
            }
            Err(contradiction) => {
                errors.push(contradiction.into());
            }
        }
    }
}
