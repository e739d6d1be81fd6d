//! Deterministic topological ordering.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use snafu::ensure;

use crate::error::{CycleSnafu, Result};
use crate::{Graph, NodeId};

impl Graph {
    /// Live nodes in topological order.
    ///
    /// Kahn's algorithm; among nodes that are ready at the same time the one
    /// with the smallest id goes first, so the order only depends on graph
    /// structure and creation order.
    #[tracing::instrument(skip_all, fields(graph = %self.name(), nodes = self.node_count()))]
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut pending: HashMap<NodeId, usize> = HashMap::with_capacity(self.node_count());
        let mut ready = BinaryHeap::new();

        for node in self.nodes() {
            let mut producers: Vec<NodeId> =
                node.inputs.iter().flatten().filter_map(|&value| self.producer(value)).collect();
            producers.sort_unstable();
            producers.dedup();
            if producers.is_empty() {
                ready.push(Reverse(node.id));
            } else {
                pending.insert(node.id, producers.len());
            }
        }

        let mut order = Vec::with_capacity(self.node_count());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            let Some(node) = self.node(id) else { continue };
            let mut successors: Vec<NodeId> = node.outputs.iter().flat_map(|&value| self.consumers(value)).collect();
            successors.sort_unstable();
            successors.dedup();
            for successor in successors {
                if let Some(count) = pending.get_mut(&successor) {
                    *count -= 1;
                    if *count == 0 {
                        pending.remove(&successor);
                        ready.push(Reverse(successor));
                    }
                }
            }
        }

        ensure!(pending.is_empty(), CycleSnafu { remaining: pending.len() });
        tracing::trace!(len = order.len(), "topological order computed");
        Ok(order)
    }
}
