use qfuse_dtype::DType;
use qfuse_ir::{Graph, NodeId};

use crate::group::NodeGroup;
use crate::qdq_util::{self, dq_at};

/// Smallest block size the block-quantized matmul kernel supports.
pub const MIN_BLOCK_SIZE: i64 = 16;

/// `A, DQ(W) -> MatMul` with a constant 4-bit weight quantized in blocks along axis 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DqMatMulNBitsSelector;

impl DqMatMulNBitsSelector {
    pub fn select(&self, graph: &Graph, target: NodeId) -> Option<NodeGroup> {
        // The activation must stay in float.
        if graph.node(target)?.input(0).is_none() || graph.input_producer(target, 0).is_some_and(qdq_util::is_dq) {
            return None;
        }

        let dq = dq_at(graph, target, 1)?;
        let dq_node = graph.node(dq)?;
        let weight = graph.initializer(dq_node.input(0)?)?;
        if !matches!(weight.dtype(), DType::Int4 | DType::UInt4) || weight.rank() != 2 {
            return None;
        }
        let (k, n) = (weight.dims()[0], weight.dims()[1]);

        // DequantizeLinear's axis defaults to 1.
        if dq_node.int_attribute("axis").unwrap_or(1) != 0 {
            return None;
        }
        let block_size = dq_node.int_attribute("block_size")?;
        if block_size < MIN_BLOCK_SIZE || block_size.count_ones() != 1 {
            return None;
        }

        let params = qdq_util::const_params(graph, dq_node)?;
        let k_blocks = k.div_ceil(block_size as usize);
        if params.scale.dtype() != DType::Float32 || params.scale.dims() != [k_blocks, n] {
            return None;
        }
        if let Some(zp) = params.zero_point
            && (zp.dtype() != weight.dtype() || zp.dims() != params.scale.dims())
        {
            return None;
        }

        Some(NodeGroup::new(target).with_inputs([None, Some(dq)]))
    }
}
