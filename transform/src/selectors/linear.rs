use qfuse_ir::{Graph, NodeId};

use super::{Widths, bias_dq, int8_rule, qtype};
use crate::group::NodeGroup;
use crate::qdq_util::{dq_at, q_at};

/// `DQ(x), DQ(w), [DQ(bias)] -> Conv -> Q`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvSelector {
    pub int8_allowed: bool,
    pub widths: Widths,
}

impl ConvSelector {
    pub fn select(&self, graph: &Graph, target: NodeId) -> Option<NodeGroup> {
        let x = dq_at(graph, target, 0)?;
        let w = dq_at(graph, target, 1)?;
        let bias = bias_dq(graph, target, 2)?;
        let q = q_at(graph, target, 0)?;

        let (activation, weight, output) = (qtype(graph, x)?, qtype(graph, w)?, qtype(graph, q)?);
        let types_ok = activation == output
            && self.widths.accepts(activation)
            && self.widths.accepts(weight)
            && int8_rule(self.int8_allowed, activation, weight);
        types_ok.then(|| NodeGroup::new(target).with_inputs([Some(x), Some(w), bias]).with_outputs([Some(q)]))
    }
}

/// `DQ(a), DQ(b) -> MatMul [-> Q]`.
///
/// Without a trailing Q the group has no outputs and the action emits a
/// float-output matmul.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatMulSelector {
    pub int8_allowed: bool,
    pub widths: Widths,
}

impl MatMulSelector {
    pub fn select(&self, graph: &Graph, target: NodeId) -> Option<NodeGroup> {
        let a = dq_at(graph, target, 0)?;
        let b = dq_at(graph, target, 1)?;
        let (activation, weight) = (qtype(graph, a)?, qtype(graph, b)?);
        if !int8_rule(self.int8_allowed, activation, weight) {
            return None;
        }

        let group = NodeGroup::new(target).with_inputs([Some(a), Some(b)]);
        match q_at(graph, target, 0) {
            Some(q) => {
                let types_ok = activation == qtype(graph, q)?
                    && self.widths.accepts(activation)
                    && self.widths.accepts(weight);
                types_ok.then(|| group.with_outputs([Some(q)]))
            }
            None => (activation.is_8bit() && weight.is_8bit()).then_some(group),
        }
    }
}

/// `DQ(a), DQ(b), [DQ(c)] -> Gemm [-> Q]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GemmSelector;

impl GemmSelector {
    pub fn select(&self, graph: &Graph, target: NodeId) -> Option<NodeGroup> {
        let a = dq_at(graph, target, 0)?;
        let b = dq_at(graph, target, 1)?;
        let bias = bias_dq(graph, target, 2)?;
        let (activation, weight) = (qtype(graph, a)?, qtype(graph, b)?);
        if !activation.is_8bit() || !weight.is_8bit() {
            return None;
        }

        let group = NodeGroup::new(target).with_inputs([Some(a), Some(b), bias]);
        match q_at(graph, target, 0) {
            Some(q) => (qtype(graph, q)? == activation).then(|| group.with_outputs([Some(q)])),
            None => Some(group),
        }
    }
}
