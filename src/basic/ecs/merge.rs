//! Node merging for zero-impedance connections.
//!
//! A zero-impedance line (or any element that inserts a [`MergeNode`]
//! pair) electrically identifies two buses. A union-find pass groups such
//! buses, and every node reference in the world is rewritten to the group
//! representative before injection and matrix assembly, so merged buses
//! aggregate their power onto one matrix position.

use std::collections::HashMap;

use bevy_ecs::prelude::*;
use derive_more::{Deref, DerefMut};
use tracing::debug;

use super::elements::{NodeLookup, SlackAt, TargetNode};

/// A pair of bus ids to be electrically unified.
#[derive(Default, Debug, Clone, Component)]
pub struct MergeNode(pub i64, pub i64);

/// Union-find over bus ids with path compression and union by rank.
#[derive(Default, Debug, Clone)]
pub struct NodeMerge {
    parent: HashMap<i64, i64>,
    rank: HashMap<i64, u32>,
}

impl NodeMerge {
    pub fn new(nodes: impl IntoIterator<Item = i64>) -> Self {
        let mut parent = HashMap::new();
        let mut rank = HashMap::new();
        for node in nodes {
            parent.insert(node, node);
            rank.insert(node, 0);
        }
        NodeMerge { parent, rank }
    }

    fn find(&mut self, node: i64) -> i64 {
        let mut root = node;
        while self.parent[&root] != root {
            root = self.parent[&root];
        }
        let mut current = node;
        while self.parent[&current] != root {
            let parent = self.parent[&current];
            self.parent.insert(current, root);
            current = parent;
        }
        root
    }

    pub fn union(&mut self, node1: i64, node2: i64) {
        let root1 = self.find(node1);
        let root2 = self.find(node2);
        if root1 != root2 {
            let rank1 = self.rank[&root1];
            let rank2 = self.rank[&root2];
            if rank1 < rank2 {
                self.parent.insert(root1, root2);
            } else {
                self.parent.insert(root2, root1);
                if rank1 == rank2 {
                    *self.rank.get_mut(&root1).expect("root present") += 1;
                }
            }
        }
    }

    /// Every known node mapped to its group representative.
    pub fn mapping(&mut self) -> HashMap<i64, i64> {
        let nodes: Vec<i64> = self.parent.keys().copied().collect();
        nodes.into_iter().map(|n| (n, self.find(n))).collect()
    }
}

/// Bus id -> representative id, identity for unmerged buses.
#[derive(Default, Debug, Clone, Deref, DerefMut, Resource)]
pub struct NodeMapping(pub HashMap<i64, i64>);

impl NodeMapping {
    pub fn map(&self, id: i64) -> i64 {
        self.0.get(&id).copied().unwrap_or(id)
    }

    pub fn is_representative(&self, id: i64) -> bool {
        self.map(id) == id
    }
}

pub mod systems {
    use crate::basic::ecs::elements::Port2;

    use super::*;

    /// Builds the merge mapping from all [`MergeNode`] pairs.
    pub fn node_aggregation(
        mut cmd: Commands,
        lookup: Res<NodeLookup>,
        pairs: Query<&MergeNode>,
    ) {
        let mut union_find = NodeMerge::new(lookup.iter().map(|(id, _)| id));
        let mut merged = 0usize;
        for pair in pairs.iter() {
            union_find.union(pair.0, pair.1);
            merged += 1;
        }
        if merged > 0 {
            debug!(pairs = merged, "zero-impedance connections merged");
        }
        cmd.insert_resource(NodeMapping(union_find.mapping()));
    }

    /// Rewrites every node reference to its representative so later
    /// systems see the merged network.
    pub fn apply_node_merge(
        mapping: Res<NodeMapping>,
        mut ports: Query<&mut Port2>,
        mut targets: Query<&mut TargetNode>,
        mut slacks: Query<&mut SlackAt>,
    ) {
        for mut port in ports.iter_mut() {
            for slot in 0..2 {
                if port.0[slot] >= 0 {
                    port.0[slot] = mapping.map(port.0[slot]);
                }
            }
        }
        for mut target in targets.iter_mut() {
            target.0 = mapping.map(target.0);
        }
        for mut slack in slacks.iter_mut() {
            slack.0 = mapping.map(slack.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_groups_transitively() {
        let mut uf = NodeMerge::new(0..6);
        uf.union(0, 1);
        uf.union(1, 2);
        uf.union(4, 5);
        let mapping = uf.mapping();
        assert_eq!(mapping[&0], mapping[&2]);
        assert_eq!(mapping[&0], mapping[&1]);
        assert_eq!(mapping[&4], mapping[&5]);
        assert_ne!(mapping[&0], mapping[&4]);
        assert_eq!(mapping[&3], 3);
    }

    #[test]
    fn representatives_are_stable_members() {
        let mut uf = NodeMerge::new(0..3);
        uf.union(2, 0);
        let mapping = uf.mapping();
        let rep = mapping[&0];
        assert!(rep == 0 || rep == 2, "representative must be a member, got {rep}");
        assert_eq!(mapping[&rep], rep);
    }
}
