//! Helpers for inspecting quantize/dequantize nodes.

use qfuse_dtype::DType;
use qfuse_ir::{Graph, MS_DOMAIN, Node, NodeId, ONNX_DOMAIN, Tensor};

pub const QUANTIZE_LINEAR: &str = "QuantizeLinear";
pub const DEQUANTIZE_LINEAR: &str = "DequantizeLinear";

fn is_qdq_domain(node: &Node) -> bool {
    node.domain == ONNX_DOMAIN || node.domain == MS_DOMAIN
}

pub fn is_q(node: &Node) -> bool {
    node.op_type == QUANTIZE_LINEAR && is_qdq_domain(node)
}

pub fn is_dq(node: &Node) -> bool {
    node.op_type == DEQUANTIZE_LINEAR && is_qdq_domain(node)
}

/// Element type on the quantized side of a Q or DQ node.
pub fn quantized_type(graph: &Graph, node: &Node) -> Option<DType> {
    let value = if is_dq(node) { node.input(0) } else { node.output(0) };
    value.and_then(|value| graph.dtype_of(value))
}

/// Constant scale and zero point of a Q or DQ node.
#[derive(Debug, Clone, Copy)]
pub struct QuantParams<'g> {
    pub scale: &'g Tensor,
    pub zero_point: Option<&'g Tensor>,
}

impl QuantParams<'_> {
    pub fn is_scalar(&self) -> bool {
        self.scale.is_scalar() && self.zero_point.is_none_or(Tensor::is_scalar)
    }

    /// Zero point at `index`; an absent zero point is 0.
    pub fn zero_point_at(&self, index: usize) -> i64 {
        self.zero_point.and_then(|zp| zp.int_at(index)).unwrap_or(0)
    }
}

/// Scale and zero point, if both are constants (a missing zero point counts as constant).
pub fn const_params<'g>(graph: &'g Graph, node: &Node) -> Option<QuantParams<'g>> {
    let scale = graph.initializer(node.input(1)?)?;
    let zero_point = match node.input(2) {
        Some(zp) => Some(graph.initializer(zp)?),
        None => None,
    };
    Some(QuantParams { scale, zero_point })
}

/// Whether two Q/DQ nodes carry the same scalar constant scale and zero point.
///
/// Scales are compared bitwise.
pub fn params_equal(graph: &Graph, a: &Node, b: &Node) -> bool {
    let (Some(pa), Some(pb)) = (const_params(graph, a), const_params(graph, b)) else {
        return false;
    };
    if !pa.is_scalar() || !pb.is_scalar() {
        return false;
    }
    let (Some(sa), Some(sb)) = (pa.scale.f32_at(0), pb.scale.f32_at(0)) else {
        return false;
    };
    sa.to_bits() == sb.to_bits()
        && pa.zero_point_at(0) == pb.zero_point_at(0)
        && quantized_type(graph, a) == quantized_type(graph, b)
}

/// Whether every element of the node's scale is a constant `> 0`.
pub fn has_positive_scale(graph: &Graph, node: &Node) -> bool {
    node.input(1)
        .and_then(|scale| graph.initializer(scale))
        .and_then(Tensor::as_f32)
        .is_some_and(|scales| scales.iter().all(|&s| s > 0.0))
}

/// DQ node feeding input `slot` of `target` that can be folded into a fused node.
///
/// The DQ output must be read only by this slot and must not be a graph output.
pub fn dq_at(graph: &Graph, target: NodeId, slot: usize) -> Option<NodeId> {
    let value = graph.node(target)?.input(slot)?;
    let dq = graph.node(graph.producer(value)?)?;
    let info = graph.value(value)?;
    (is_dq(dq) && info.consumers() == [(target, slot)] && !graph.is_graph_output(value)).then_some(dq.id)
}

/// Q node that is the sole consumer of output `slot` of `target`.
pub fn q_at(graph: &Graph, target: NodeId, slot: usize) -> Option<NodeId> {
    let value = graph.node(target)?.output(slot)?;
    if graph.is_graph_output(value) {
        return None;
    }
    match graph.value(value)?.consumers() {
        &[(consumer, 0)] => graph.node(consumer).filter(|node| is_q(node)).map(|node| node.id),
        _ => None,
    }
}
