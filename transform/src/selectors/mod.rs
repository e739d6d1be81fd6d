//! Node selectors.
//!
//! A selector inspects a candidate target node and its immediate neighbors
//! and either assembles a [`NodeGroup`] or reports no match. Selectors never
//! mutate the graph. Op-type, version and provider filtering happen in the
//! registry before a selector runs (see [`crate::RuleEntry::accepts`]).

mod drop;
mod linear;
mod nbits;
mod uniform;

use qfuse_dtype::DType;
use qfuse_ir::{Graph, NodeId};

pub use drop::{DropDqSelector, DropQdqSelector};
pub use linear::{ConvSelector, GemmSelector, MatMulSelector};
pub use nbits::{DqMatMulNBitsSelector, MIN_BLOCK_SIZE};
pub use uniform::{SplitSelector, UniformSelector, UniformShape};

use crate::group::NodeGroup;
use crate::qdq_util;

/// Quantized element widths a selector accepts in addition to 8-bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Widths {
    pub allow_16bit: bool,
    pub allow_4bit: bool,
}

impl Widths {
    /// 8-bit only.
    pub const STRICT: Self = Self { allow_16bit: false, allow_4bit: false };

    pub fn accepts(&self, dtype: DType) -> bool {
        dtype.is_quantized() && (self.allow_16bit || !dtype.is_16bit()) && (self.allow_4bit || !dtype.is_4bit())
    }
}

/// Closed set of motif shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    DropQdq(DropQdqSelector),
    DropDq(DropDqSelector),
    Uniform(UniformSelector),
    Split(SplitSelector),
    Conv(ConvSelector),
    MatMul(MatMulSelector),
    Gemm(GemmSelector),
    DqMatMulNBits(DqMatMulNBitsSelector),
}

impl Selector {
    /// Try to assemble a node group around `target`.
    pub fn select(&self, graph: &Graph, target: NodeId) -> Option<NodeGroup> {
        match self {
            Self::DropQdq(s) => s.select(graph, target),
            Self::DropDq(s) => s.select(graph, target),
            Self::Uniform(s) => s.select(graph, target),
            Self::Split(s) => s.select(graph, target),
            Self::Conv(s) => s.select(graph, target),
            Self::MatMul(s) => s.select(graph, target),
            Self::Gemm(s) => s.select(graph, target),
            Self::DqMatMulNBits(s) => s.select(graph, target),
        }
    }
}

/// Quantized type of the node with id `id`.
fn qtype(graph: &Graph, id: NodeId) -> Option<DType> {
    graph.node(id).and_then(|node| qdq_util::quantized_type(graph, node))
}

/// DQ-side data types must be int8 only when explicitly allowed, and an int8
/// activation requires an int8 weight.
fn int8_rule(int8_allowed: bool, activation: DType, weight: DType) -> bool {
    let any_int8 = activation == DType::Int8 || weight == DType::Int8;
    if !int8_allowed {
        return !any_int8;
    }
    activation != DType::Int8 || weight == DType::Int8
}

/// Bias slot handling shared by Conv and Gemm: absent is fine, present requires an int32 DQ.
fn bias_dq(graph: &Graph, target: NodeId, slot: usize) -> Option<Option<NodeId>> {
    let node = graph.node(target)?;
    if node.input(slot).is_none() {
        return Some(None);
    }
    let dq = qdq_util::dq_at(graph, target, slot)?;
    (qtype(graph, dq) == Some(DType::Int32)).then_some(Some(dq))
}
