use qfuse_ir::{Graph, NodeId};

use super::{Widths, qtype};
use crate::group::NodeGroup;
use crate::qdq_util::{self, dq_at, q_at};

/// `DQ -> op -> Q` around a data-preserving op.
///
/// Dropping the pair is only value-preserving when DQ and Q use the same
/// type, scale and zero point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropQdqSelector {
    pub widths: Widths,
    /// Order-sensitive ops (max/min) change results under a negative scale.
    pub require_positive_scale: bool,
}

impl DropQdqSelector {
    pub fn select(&self, graph: &Graph, target: NodeId) -> Option<NodeGroup> {
        let dq = dq_at(graph, target, 0)?;
        let q = q_at(graph, target, 0)?;
        let (dq_node, q_node) = (graph.node(dq)?, graph.node(q)?);

        let dtype = qtype(graph, dq)?;
        if qtype(graph, q)? != dtype || !self.widths.accepts(dtype) {
            return None;
        }
        if !qdq_util::params_equal(graph, dq_node, q_node) {
            return None;
        }
        if self.require_positive_scale && !qdq_util::has_positive_scale(graph, q_node) {
            return None;
        }
        Some(NodeGroup::new(target).with_inputs([Some(dq)]).with_outputs([Some(q)]))
    }
}

/// `DQ -> op` where the op output does not depend on the scale (ArgMax).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropDqSelector {
    pub widths: Widths,
}

impl DropDqSelector {
    pub fn select(&self, graph: &Graph, target: NodeId) -> Option<NodeGroup> {
        let dq = dq_at(graph, target, 0)?;
        let dtype = qtype(graph, dq)?;
        if !self.widths.accepts(dtype) {
            return None;
        }
        let params = qdq_util::const_params(graph, graph.node(dq)?)?;
        if !params.is_scalar() || !qdq_util::has_positive_scale(graph, graph.node(dq)?) {
            return None;
        }
        Some(NodeGroup::new(target).with_inputs([Some(dq)]))
    }
}
