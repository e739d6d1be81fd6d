//! Matched motifs.
//!
//! A [`NodeGroup`] names the nodes of one motif by id: the target, the DQ
//! nodes feeding its input slots and the Q nodes consuming its output slots.
//! Slots without a matched neighbor are `None` and are left as-is by the
//! rewrite. Ids make a group cheap to persist and replay.

use qfuse_ir::{Graph, NodeId};
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use crate::error::*;

/// Position of a node inside a [`NodeGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeRole {
    #[display("target")]
    Target,
    /// DQ node feeding the target's input slot.
    #[display("input DQ at slot {_0}")]
    Input(usize),
    /// Q node consuming the target's output slot.
    #[display("output Q at slot {_0}")]
    Output(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeGroup {
    /// DQ producer per target input slot.
    pub inputs: SmallVec<[Option<NodeId>; 3]>,
    pub target: NodeId,
    /// Q consumer per target output slot.
    pub outputs: SmallVec<[Option<NodeId>; 1]>,
}

impl NodeGroup {
    pub fn new(target: NodeId) -> Self {
        Self { inputs: SmallVec::new(), target, outputs: SmallVec::new() }
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = Option<NodeId>>) -> Self {
        self.inputs = inputs.into_iter().collect();
        self
    }

    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = Option<NodeId>>) -> Self {
        self.outputs = outputs.into_iter().collect();
        self
    }

    pub fn node(&self, role: NodeRole) -> Option<NodeId> {
        match role {
            NodeRole::Target => Some(self.target),
            NodeRole::Input(slot) => self.input(slot),
            NodeRole::Output(slot) => self.output(slot),
        }
    }

    pub fn input(&self, slot: usize) -> Option<NodeId> {
        self.inputs.get(slot).copied().flatten()
    }

    pub fn output(&self, slot: usize) -> Option<NodeId> {
        self.outputs.get(slot).copied().flatten()
    }

    pub fn dq_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inputs.iter().flatten().copied()
    }

    pub fn q_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.outputs.iter().flatten().copied()
    }

    pub fn has_q(&self) -> bool {
        self.q_nodes().next().is_some()
    }

    /// Every node of the group: DQ nodes, target, Q nodes.
    pub fn all_nodes(&self) -> SmallVec<[NodeId; 5]> {
        self.dq_nodes().chain(std::iter::once(self.target)).chain(self.q_nodes()).collect()
    }

    /// Check that every recorded node is live and still adjacent to the target at its slot.
    pub fn check_live(&self, graph: &Graph, rule: &str) -> Result<()> {
        for node in self.all_nodes() {
            ensure!(graph.contains(node), MissingGroupNodeSnafu { rule, node });
        }
        let target = graph.node(self.target).context(MissingGroupNodeSnafu { rule, node: self.target })?;

        for (slot, dq) in self.inputs.iter().enumerate() {
            let Some(dq) = *dq else { continue };
            let fed = graph.input_producer(self.target, slot).map(|producer| producer.id);
            ensure!(
                fed == Some(dq),
                UnexpectedGroupShapeSnafu { rule, reason: format!("{dq} no longer feeds input {slot} of {}", target.id) }
            );
        }
        for (slot, q) in self.outputs.iter().enumerate() {
            let Some(q) = *q else { continue };
            ensure!(
                graph.output_consumers(self.target, slot).contains(&q),
                UnexpectedGroupShapeSnafu { rule, reason: format!("{q} no longer reads output {slot} of {}", target.id) }
            );
        }
        Ok(())
    }
}
