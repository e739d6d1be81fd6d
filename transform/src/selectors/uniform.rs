use qfuse_ir::{Graph, NodeId};
use smallvec::SmallVec;

use super::{Widths, qtype};
use crate::group::NodeGroup;
use crate::qdq_util::{self, dq_at, q_at};

/// Which target inputs are expected to come from DQ nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformShape {
    /// One DQ input.
    Unary,
    /// Two DQ inputs.
    Binary,
    /// Every input is a DQ; the count is taken from the target.
    Variadic,
    /// Inputs 1 and 2 are DQ; input 0 is the boolean condition.
    Where,
}

/// DQ inputs and one Q output that all share one quantized element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSelector {
    pub shape: UniformShape,
    pub widths: Widths,
}

impl UniformSelector {
    pub fn new(shape: UniformShape) -> Self {
        Self { shape, widths: Widths::STRICT }
    }

    pub fn select(&self, graph: &Graph, target: NodeId) -> Option<NodeGroup> {
        let node = graph.node(target)?;
        let dq_slots = match self.shape {
            UniformShape::Unary => 0..1,
            UniformShape::Binary => 0..2,
            UniformShape::Variadic => 0..node.inputs.len(),
            UniformShape::Where => 1..3,
        };
        if dq_slots.is_empty() || dq_slots.end > node.inputs.len() {
            return None;
        }
        if self.shape == UniformShape::Where && qdq_util::dq_at(graph, target, 0).is_some() {
            return None;
        }

        let mut inputs: SmallVec<[Option<NodeId>; 3]> = SmallVec::from_elem(None, dq_slots.start);
        for slot in dq_slots {
            inputs.push(Some(dq_at(graph, target, slot)?));
        }
        let q = q_at(graph, target, 0)?;

        let dtype = qtype(graph, q)?;
        if !self.widths.accepts(dtype) {
            return None;
        }
        for dq in inputs.iter().flatten() {
            if qtype(graph, *dq)? != dtype {
                return None;
            }
        }
        Some(NodeGroup { inputs, target, outputs: smallvec::smallvec![Some(q)] })
    }
}

/// `DQ -> Split -> Q*` with a Q on every split output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSelector {
    pub widths: Widths,
    /// Every Q must use the DQ's scale and zero point.
    pub require_equal_params: bool,
}

impl SplitSelector {
    pub fn select(&self, graph: &Graph, target: NodeId) -> Option<NodeGroup> {
        let node = graph.node(target)?;
        let dq = dq_at(graph, target, 0)?;
        let dq_node = graph.node(dq)?;
        let dtype = qtype(graph, dq)?;
        if !self.widths.accepts(dtype) || node.outputs.is_empty() {
            return None;
        }

        let mut outputs: SmallVec<[Option<NodeId>; 4]> = SmallVec::with_capacity(node.outputs.len());
        for slot in 0..node.outputs.len() {
            let q = q_at(graph, target, slot)?;
            if qtype(graph, q)? != dtype {
                return None;
            }
            if self.require_equal_params && !qdq_util::params_equal(graph, dq_node, graph.node(q)?) {
                return None;
            }
            outputs.push(Some(q));
        }
        Some(NodeGroup::new(target).with_inputs([Some(dq)]).with_outputs(outputs))
    }
}
