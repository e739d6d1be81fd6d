//! Test helpers: a builder for synthetic QDQ motifs and a small float
//! reference evaluator.

use std::collections::HashMap;

use qfuse_dtype::DType;
use qfuse_ir::{Attribute, Attributes, ExecutionProvider, Graph, NodeId, NodeSpec, Tensor, TensorData, ValueId};

use crate::config::TransformConfig;
use crate::driver::{TransformReport, Transformer};
use crate::qdq_util::{DEQUANTIZE_LINEAR, QUANTIZE_LINEAR};

/// Run one pass with the standard catalog.
pub fn transform(graph: &mut Graph, config: TransformConfig) -> TransformReport {
    Transformer::new(config).unwrap().apply(graph).unwrap()
}

/// The single node a rewrite created.
pub fn added_node(report: &TransformReport) -> NodeId {
    assert_eq!(report.applied.len(), 1, "expected exactly one rewrite: {:?}", report.applied);
    let added = &report.applied[0].result.added;
    assert_eq!(added.len(), 1);
    added[0]
}

// ============================================================================
// GRAPH BUILDER
// ============================================================================

pub struct QdqGraphBuilder {
    graph: Graph,
    provider: ExecutionProvider,
    since_version: u32,
}

/// `x_q -> DQ -> target -> Q -> y_q`.
#[derive(Debug, Clone, Copy)]
pub struct Motif {
    pub dq: NodeId,
    pub target: NodeId,
    pub q: NodeId,
    pub x_q: ValueId,
    pub y_q: ValueId,
}

impl Default for QdqGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QdqGraphBuilder {
    pub fn new() -> Self {
        Self { graph: Graph::new("test"), provider: ExecutionProvider::Cpu, since_version: 13 }
    }

    /// Provider assigned to nodes added from now on.
    pub fn provider(&mut self, provider: ExecutionProvider) -> &mut Self {
        self.provider = provider;
        self
    }

    /// Opset version of target nodes added from now on.
    pub fn since_version(&mut self, version: u32) -> &mut Self {
        self.since_version = version;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn build(self) -> Graph {
        self.graph
    }

    fn name(&self, base: &str) -> String {
        self.graph.unique_value_name(base)
    }

    pub fn input(&mut self, base: &str, dtype: DType, dims: &[usize]) -> ValueId {
        let name = self.name(base);
        self.graph.add_input(name, dtype, Some(dims)).unwrap()
    }

    pub fn constant(&mut self, base: &str, tensor: Tensor) -> ValueId {
        let name = self.name(base);
        self.graph.add_initializer(name, tensor).unwrap()
    }

    pub fn scalar_int(&mut self, base: &str, dtype: DType, value: i64) -> ValueId {
        self.constant(base, Tensor::from_ints(dtype, &[], vec![value]).unwrap())
    }

    fn value(&mut self, base: &str, dtype: DType) -> ValueId {
        let name = self.name(base);
        self.graph.add_value(name, dtype, None).unwrap()
    }

    pub fn mark_output(&mut self, value: ValueId) {
        self.graph.mark_output(value).unwrap();
    }

    /// Add a node with fresh outputs of the given types.
    pub fn node(
        &mut self,
        op_type: &str,
        inputs: Vec<Option<ValueId>>,
        outputs: &[DType],
        attributes: Attributes,
    ) -> (NodeId, Vec<ValueId>) {
        let outputs: Vec<ValueId> = outputs.iter().map(|&dtype| self.value(&format!("{op_type}_out"), dtype)).collect();
        let is_qdq = op_type == QUANTIZE_LINEAR || op_type == DEQUANTIZE_LINEAR;
        let spec = NodeSpec::builder()
            .name(format!("{op_type}_{}", self.graph.next_node_id().0))
            .op_type(op_type)
            .since_version(if is_qdq { 21 } else { self.since_version })
            .inputs(inputs)
            .outputs(outputs.clone())
            .attributes(attributes)
            .provider(self.provider)
            .build();
        (self.graph.add_node(spec).unwrap(), outputs)
    }

    /// Single-output float op.
    pub fn op(&mut self, op_type: &str, inputs: &[ValueId]) -> (NodeId, ValueId) {
        let (id, outputs) = self.node(op_type, inputs.iter().copied().map(Some).collect(), &[DType::Float32], Attributes::new());
        (id, outputs[0])
    }

    /// Per-tensor DequantizeLinear of `x`.
    pub fn dq(&mut self, x: ValueId, scale: f32, zero_point: Option<i64>) -> (NodeId, ValueId) {
        let dtype = self.graph.dtype_of(x).unwrap();
        let scale = self.constant("scale", Tensor::scalar_f32(scale));
        let zero_point = zero_point.map(|zp| self.scalar_int("zp", dtype, zp));
        let (id, outputs) =
            self.node(DEQUANTIZE_LINEAR, vec![Some(x), Some(scale), zero_point], &[DType::Float32], Attributes::new());
        (id, outputs[0])
    }

    /// Per-tensor QuantizeLinear of `x` into `dtype`.
    pub fn q(&mut self, x: ValueId, dtype: DType, scale: f32, zero_point: Option<i64>) -> (NodeId, ValueId) {
        let scale = self.constant("scale", Tensor::scalar_f32(scale));
        let zero_point = zero_point.map(|zp| self.scalar_int("zp", dtype, zp));
        let (id, outputs) = self.node(QUANTIZE_LINEAR, vec![Some(x), Some(scale), zero_point], &[dtype], Attributes::new());
        (id, outputs[0])
    }

    /// Quantized graph input wrapped in a DQ.
    pub fn dq_input(&mut self, dtype: DType, dims: &[usize], scale: f32, zero_point: Option<i64>) -> (NodeId, ValueId, ValueId) {
        let x_q = self.input("x_q", dtype, dims);
        let (dq, x) = self.dq(x_q, scale, zero_point);
        (dq, x_q, x)
    }

    /// Q on `x` whose output becomes a graph output.
    pub fn q_output(&mut self, x: ValueId, dtype: DType, scale: f32, zero_point: Option<i64>) -> (NodeId, ValueId) {
        let (q, y_q) = self.q(x, dtype, scale, zero_point);
        self.mark_output(y_q);
        (q, y_q)
    }

    /// `x_q -> DQ -> op_type -> Q -> y_q` with the same parameters on both sides.
    pub fn qdq_around(&mut self, op_type: &str, dtype: DType, scale: f32, zero_point: Option<i64>) -> Motif {
        self.qdq_around_with(op_type, dtype, (scale, zero_point), (scale, zero_point))
    }

    pub fn qdq_around_with(
        &mut self,
        op_type: &str,
        dtype: DType,
        dq_params: (f32, Option<i64>),
        q_params: (f32, Option<i64>),
    ) -> Motif {
        let (dq, x_q, x) = self.dq_input(dtype, &[1, 4], dq_params.0, dq_params.1);
        let (target, y) = self.op(op_type, &[x]);
        let (q, y_q) = self.q_output(y, dtype, q_params.0, q_params.1);
        Motif { dq, target, q, x_q, y_q }
    }

    /// Blocked DequantizeLinear of a constant 4-bit `[K, N]` weight along axis 0.
    pub fn blocked_weight_dq(&mut self, weight: &BlockedWeight) -> (NodeId, ValueId) {
        let w = self.constant("w", Tensor::from_ints(weight.dtype, &[weight.k, weight.n], weight.data.clone()).unwrap());
        let k_blocks = weight.k.div_ceil(weight.block_size);
        let scales = self.constant("w_scale", Tensor::from_f32(&[k_blocks, weight.n], weight.scales.clone()).unwrap());
        let zp = weight.zero_points.as_ref().map(|zps| {
            self.constant("w_zp", Tensor::from_ints(weight.dtype, &[k_blocks, weight.n], zps.clone()).unwrap())
        });
        let attributes = Attributes::from([
            ("axis".to_string(), Attribute::Int(weight.axis)),
            ("block_size".to_string(), Attribute::Int(weight.block_size as i64)),
        ]);
        let (id, outputs) = self.node(DEQUANTIZE_LINEAR, vec![Some(w), Some(scales), zp], &[DType::Float32], attributes);
        (id, outputs[0])
    }
}

/// Parameters of a block-quantized test weight.
#[derive(Debug, Clone)]
pub struct BlockedWeight {
    pub dtype: DType,
    pub k: usize,
    pub n: usize,
    pub block_size: usize,
    pub axis: i64,
    pub data: Vec<i64>,
    pub scales: Vec<f32>,
    pub zero_points: Option<Vec<i64>>,
}

impl BlockedWeight {
    /// Deterministic weight covering the whole value range of `dtype`.
    pub fn patterned(dtype: DType, k: usize, n: usize, block_size: usize) -> Self {
        let (min, max) = (dtype.int_min().unwrap(), dtype.int_max().unwrap());
        let span = max - min + 1;
        let data = (0..k * n).map(|i| min + (i as i64 * 7) % span).collect();
        let k_blocks = k.div_ceil(block_size);
        let scales = (0..k_blocks * n).map(|i| 0.05 + 0.01 * (i % 5) as f32).collect();
        Self { dtype, k, n, block_size, axis: 0, data, scales, zero_points: None }
    }
}

// ============================================================================
// REFERENCE EVALUATOR
// ============================================================================

/// Dense float tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    pub dims: Vec<usize>,
    pub data: Vec<f32>,
}

impl Dense {
    pub fn new(dims: &[usize], data: Vec<f32>) -> Self {
        assert_eq!(dims.iter().product::<usize>(), data.len());
        Self { dims: dims.to_vec(), data }
    }

    fn from_tensor(tensor: &Tensor) -> Self {
        let data = match tensor.data() {
            TensorData::Float(values) => values.clone(),
            TensorData::Int(values) => values.iter().map(|&v| v as f32).collect(),
            TensorData::Bytes(bytes) => bytes.iter().map(|&b| b as f32).collect(),
        };
        Self { dims: tensor.dims().to_vec(), data }
    }

    /// Largest absolute elementwise difference.
    pub fn max_abs_diff(&self, other: &Dense) -> f32 {
        assert_eq!(self.dims, other.dims);
        self.data.iter().zip(&other.data).map(|(a, b)| (a - b).abs()).fold(0.0, f32::max)
    }

    pub fn max_abs(&self) -> f32 {
        self.data.iter().map(|v| v.abs()).fold(0.0, f32::max)
    }
}

/// Evaluate `output` of `graph` for the given feeds.
///
/// Supports per-tensor and axis-0 blocked DequantizeLinear, 2-D MatMul and
/// MatMulNBits, which is enough to compare a weight-quantized matmul before
/// and after rewriting.
pub fn evaluate(graph: &Graph, feeds: &[(ValueId, Dense)], output: ValueId) -> Dense {
    let mut env: HashMap<ValueId, Dense> = feeds.iter().cloned().collect();
    let fetch = |env: &HashMap<ValueId, Dense>, value: Option<ValueId>| -> Option<Dense> {
        let value = value?;
        env.get(&value).cloned().or_else(|| graph.initializer(value).map(Dense::from_tensor))
    };

    for id in graph.topological_order().unwrap() {
        let node = graph.node(id).unwrap();
        let input = |slot: usize| fetch(&env, node.input(slot));
        let result = match node.op_type.as_str() {
            DEQUANTIZE_LINEAR => dequantize(&input(0).unwrap(), &input(1).unwrap(), input(2).as_ref(), node.int_attribute("block_size")),
            "MatMul" => matmul(&input(0).unwrap(), &input(1).unwrap()),
            "MatMulNBits" => {
                let k = node.int_attribute("K").unwrap() as usize;
                let n = node.int_attribute("N").unwrap() as usize;
                let block_size = node.int_attribute("block_size").unwrap() as usize;
                let weight = unpack_nbits(&input(1).unwrap(), &input(2).unwrap(), input(3).as_ref(), k, n, block_size);
                matmul(&input(0).unwrap(), &weight)
            }
            other => panic!("reference evaluator does not support {other}"),
        };
        env.insert(node.output(0).unwrap(), result);
    }
    env.remove(&output).expect("output was not computed")
}

fn dequantize(x: &Dense, scale: &Dense, zero_point: Option<&Dense>, block_size: Option<i64>) -> Dense {
    let data = match block_size {
        Some(bs) => {
            let (n, bs) = (x.dims[1], bs as usize);
            (0..x.data.len())
                .map(|i| {
                    let (row, col) = (i / n, i % n);
                    let p = (row / bs) * n + col;
                    let zp = zero_point.map_or(0.0, |zp| zp.data[p]);
                    (x.data[i] - zp) * scale.data[p]
                })
                .collect()
        }
        None => {
            let zp = zero_point.map_or(0.0, |zp| zp.data[0]);
            x.data.iter().map(|&v| (v - zp) * scale.data[0]).collect()
        }
    };
    Dense { dims: x.dims.clone(), data }
}

fn matmul(a: &Dense, b: &Dense) -> Dense {
    let (m, k, n) = (a.dims[0], a.dims[1], b.dims[1]);
    assert_eq!(b.dims[0], k);
    let mut out = vec![0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            out[i * n + j] = (0..k).map(|p| a.data[i * k + p] * b.data[p * n + j]).sum();
        }
    }
    Dense::new(&[m, n], out)
}

/// Dequantize a `MatMulNBits` payload back to a `[K, N]` float weight.
fn unpack_nbits(packed: &Dense, scales: &Dense, zero_points: Option<&Dense>, k: usize, n: usize, bs: usize) -> Dense {
    let k_blocks = k.div_ceil(bs);
    let blob = bs / 2;
    let zp_per_column = k_blocks.div_ceil(2);
    let mut out = vec![0f32; k * n];
    for col in 0..n {
        for row in 0..k {
            let (block, within) = (row / bs, row % bs);
            let byte = packed.data[col * k_blocks * blob + block * blob + within / 2] as u8;
            let nibble = (byte >> (4 * (within % 2))) & 0x0F;
            let zp = match zero_points {
                Some(zps) => ((zps.data[col * zp_per_column + block / 2] as u8) >> (4 * (block % 2))) & 0x0F,
                None => 8,
            };
            out[row * n + col] = (nibble as f32 - zp as f32) * scales.data[col * k_blocks + block];
        }
    }
    Dense::new(&[k, n], out)
}
