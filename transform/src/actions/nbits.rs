//! `DQ(W) -> MatMul` to `MatMulNBits`.
//!
//! The 4-bit weight `W[K, N]` is stored column by column: for each output
//! column `n`, `K` is split into `ceil(K / block_size)` blocks and each block
//! is packed two values per byte, even index in the low nibble. Signed values
//! are shifted into `0..16`, so the fused kernel always sees unsigned nibbles
//! with a zero point (default 8 for the signed case).

use std::sync::Arc;

use qfuse_dtype::DType;
use qfuse_ir::{Attribute, Attributes, Graph, GraphEdit, MS_DOMAIN, NodeSpec, Tensor, ValueRef};
use rayon::prelude::*;
use snafu::{OptionExt, ResultExt, ensure};

use crate::config::AccuracyLevel;
use crate::error::*;
use crate::group::NodeGroup;
use crate::selectors::MIN_BLOCK_SIZE;

const BITS: usize = 4;

/// Block-quantized weight as found on a blocked DequantizeLinear.
#[derive(Debug, Clone, Copy)]
pub struct BlockQuantized<'a> {
    pub dtype: DType,
    pub k: usize,
    pub n: usize,
    pub block_size: usize,
    /// Row-major `[K, N]`.
    pub data: &'a [i64],
    /// Row-major `[k_blocks, N]`.
    pub scales: &'a [f32],
    /// Row-major `[k_blocks, N]`, same type as `data`.
    pub zero_points: Option<&'a [i64]>,
}

/// Repacked `MatMulNBits` constants.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedWeight {
    pub k_blocks: usize,
    pub blob_size: usize,
    /// `[N, k_blocks, blob_size]`.
    pub data: Vec<u8>,
    /// `[N * k_blocks]`, `scales[n * k_blocks + b]`.
    pub scales: Vec<f32>,
    /// `[N * ceil(k_blocks / 2)]`, two nibbles per byte.
    pub zero_points: Option<Vec<u8>>,
}

impl BlockQuantized<'_> {
    pub fn k_blocks(&self) -> usize {
        self.k.div_ceil(self.block_size)
    }

    pub fn blob_size(&self) -> usize {
        self.block_size * BITS / 8
    }

    fn shift(&self) -> i64 {
        if self.dtype == DType::Int4 { 8 } else { 0 }
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            matches!(self.dtype, DType::Int4 | DType::UInt4),
            WeightRepackSnafu { reason: format!("{} is not a 4-bit type", self.dtype) }
        );
        ensure!(self.k > 0 && self.n > 0, WeightRepackSnafu { reason: "weight has an empty dimension" });
        ensure!(
            self.block_size >= MIN_BLOCK_SIZE as usize && self.block_size.is_power_of_two(),
            WeightRepackSnafu {
                reason: format!("block size {} is not a power of two of at least {MIN_BLOCK_SIZE}", self.block_size)
            }
        );
        ensure!(
            self.data.len() == self.k * self.n,
            WeightRepackSnafu { reason: format!("weight has {} values, expected {}", self.data.len(), self.k * self.n) }
        );
        let block_values = self.k_blocks() * self.n;
        ensure!(
            self.scales.len() == block_values,
            WeightRepackSnafu { reason: format!("{} scales for {block_values} blocks", self.scales.len()) }
        );
        if let Some(zero_points) = self.zero_points {
            ensure!(
                zero_points.len() == block_values,
                WeightRepackSnafu { reason: format!("{} zero points for {block_values} blocks", zero_points.len()) }
            );
        }
        Ok(())
    }

    fn pack_column(&self, col: usize, out: &mut [u8]) {
        let (bs, blob, shift) = (self.block_size, self.blob_size(), self.shift());
        for row in 0..self.k {
            let nibble = ((self.data[row * self.n + col] + shift) as u8) & 0x0F;
            let within = row % bs;
            out[(row / bs) * blob + within / 2] |= nibble << (4 * (within % 2));
        }
    }

    /// Repack into the `MatMulNBits` layout, column-parallel on `pool` when given.
    pub fn pack(&self, pool: Option<&rayon::ThreadPool>) -> Result<PackedWeight> {
        self.validate()?;
        let (k_blocks, blob_size, n) = (self.k_blocks(), self.blob_size(), self.n);
        let column_bytes = k_blocks * blob_size;

        let mut data = vec![0u8; n * column_bytes];
        match pool {
            Some(pool) => pool.install(|| {
                data.par_chunks_mut(column_bytes).enumerate().for_each(|(col, out)| self.pack_column(col, out))
            }),
            None => data.chunks_mut(column_bytes).enumerate().for_each(|(col, out)| self.pack_column(col, out)),
        }

        let mut scales = vec![0f32; n * k_blocks];
        for block in 0..k_blocks {
            for col in 0..n {
                scales[col * k_blocks + block] = self.scales[block * n + col];
            }
        }

        let zero_points = match (self.dtype, self.zero_points) {
            (DType::Int4, None) => None,
            (_, given) => {
                let per_column = k_blocks.div_ceil(2);
                let mut packed = vec![0u8; n * per_column];
                for block in 0..k_blocks {
                    for col in 0..n {
                        let zp = given.map_or(0, |zps| zps[block * n + col]) + self.shift();
                        packed[col * per_column + block / 2] |= ((zp as u8) & 0x0F) << (4 * (block % 2));
                    }
                }
                Some(packed)
            }
        };

        Ok(PackedWeight { k_blocks, blob_size, data, scales, zero_points })
    }
}

/// Action state: the configured accuracy level and the optional repack pool.
#[derive(Debug, Clone, Default)]
pub struct MatMulNBitsAction {
    pub accuracy_level: AccuracyLevel,
    pub thread_pool: Option<Arc<rayon::ThreadPool>>,
}

impl MatMulNBitsAction {
    pub(super) fn edit(&self, graph: &Graph, group: &NodeGroup, rule: &str) -> Result<GraphEdit> {
        let target = graph.node(group.target).context(MissingGroupNodeSnafu { rule, node: group.target })?;
        let dq_id = group.input(1).context(UnexpectedGroupShapeSnafu { rule, reason: "no weight DQ at input 1" })?;
        let dq = graph.node(dq_id).context(MissingGroupNodeSnafu { rule, node: dq_id })?;

        let weight_id = dq.input(0).context(WeightRepackSnafu { reason: "DQ has no weight input" })?;
        let weight = graph.initializer(weight_id).context(WeightRepackSnafu { reason: "weight is not a constant" })?;
        let scale = dq
            .input(1)
            .and_then(|scale| graph.initializer(scale))
            .context(WeightRepackSnafu { reason: "scale is not a constant" })?;
        let zero_point = match dq.input(2) {
            Some(zp) => Some(graph.initializer(zp).context(WeightRepackSnafu { reason: "zero point is not a constant" })?),
            None => None,
        };
        if let Some(zp) = zero_point {
            ensure!(
                zp.dtype() == weight.dtype(),
                WeightRepackSnafu { reason: format!("zero point is {}, weight is {}", zp.dtype(), weight.dtype()) }
            );
        }
        ensure!(weight.rank() == 2, WeightRepackSnafu { reason: format!("weight has rank {}", weight.rank()) });
        let block_size = dq
            .int_attribute("block_size")
            .filter(|&bs| bs > 0)
            .context(WeightRepackSnafu { reason: "DQ has no block size" })? as usize;

        let quantized = BlockQuantized {
            dtype: weight.dtype(),
            k: weight.dims()[0],
            n: weight.dims()[1],
            block_size,
            data: weight.as_ints().context(WeightRepackSnafu { reason: "weight is not integer data" })?,
            scales: scale.as_f32().context(WeightRepackSnafu { reason: "scale is not float data" })?,
            zero_points: match zero_point {
                Some(zp) => Some(zp.as_ints().context(WeightRepackSnafu { reason: "zero point is not integer data" })?),
                None => None,
            },
        };
        let packed = quantized.pack(self.thread_pool.as_deref())?;
        tracing::debug!(
            k = quantized.k,
            n = quantized.n,
            block_size,
            pooled = self.thread_pool.is_some(),
            "repacked block-quantized weight"
        );

        let (k, n) = (quantized.k, quantized.n);
        let base = graph.value(weight_id).map_or_else(|| weight_id.to_string(), |info| info.name.clone());
        let mut edit = GraphEdit::new();

        let b = Tensor::from_bytes(&[n, packed.k_blocks, packed.blob_size], packed.data).context(GraphSnafu)?;
        let b = edit.add_initializer(graph.unique_value_name(&format!("{base}_Q4")), b);
        let scales = Tensor::from_f32(&[n * packed.k_blocks], packed.scales).context(GraphSnafu)?;
        let scales = edit.add_initializer(graph.unique_value_name(&format!("{base}_scales")), scales);
        let zero_points = match packed.zero_points {
            Some(zp) => {
                let tensor = Tensor::from_bytes(&[zp.len()], zp).context(GraphSnafu)?;
                Some(edit.add_initializer(graph.unique_value_name(&format!("{base}_zp")), tensor))
            }
            None => None,
        };

        let output = target.output(0).context(UnexpectedGroupShapeSnafu { rule, reason: "MatMul has no output" })?;
        let activation =
            target.input(0).context(UnexpectedGroupShapeSnafu { rule, reason: "MatMul has no activation input" })?;

        let attributes = Attributes::from([
            ("K".to_string(), Attribute::Int(k as i64)),
            ("N".to_string(), Attribute::Int(n as i64)),
            ("bits".to_string(), Attribute::Int(BITS as i64)),
            ("block_size".to_string(), Attribute::Int(block_size as i64)),
            ("accuracy_level".to_string(), Attribute::Int(self.accuracy_level.as_i64())),
        ]);
        let mut inputs = vec![Some(ValueRef::Existing(activation)), Some(b), Some(scales)];
        if zero_points.is_some() {
            inputs.push(zero_points);
        }

        edit.add_node(
            NodeSpec::builder()
                .name(format!("{}_MatMulNBits", target.name))
                .op_type("MatMulNBits")
                .domain(MS_DOMAIN)
                .inputs(inputs)
                .outputs(vec![output])
                .attributes(attributes)
                .provider(target.provider)
                .build(),
        );
        edit.remove_node(dq_id).remove_node(group.target);
        Ok(edit)
    }
}
