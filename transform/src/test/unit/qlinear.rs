use qfuse_dtype::DType;
use qfuse_ir::{Attribute, Attributes, ExecutionProvider, Graph, MS_DOMAIN, NodeId, ONNX_DOMAIN, Tensor, ValueId};
use test_case::test_case;

use crate::config::TransformConfig;
use crate::rules;
use crate::test::helpers::*;

fn int8_config() -> TransformConfig {
    TransformConfig::builder().int8_allowed(true).build()
}

#[test_case("Sigmoid")]
#[test_case("LeakyRelu")]
#[test_case("AveragePool")]
#[test_case("GlobalAveragePool")]
fn test_unary_becomes_qlinear(op_type: &str) {
    let mut builder = QdqGraphBuilder::new();
    let motif = builder.qdq_around_with(op_type, DType::UInt8, (0.05, Some(128)), (0.02, Some(0)));
    let mut graph = builder.build();

    let report = transform(&mut graph, TransformConfig::default());
    assert_eq!(report.applied[0].rule, rules::UNARY);

    let node = graph.node(added_node(&report)).unwrap();
    assert_eq!(node.op_type, format!("QLinear{op_type}"));
    assert_eq!(node.domain, MS_DOMAIN);
    assert_eq!(node.inputs.len(), 5);
    assert_eq!(node.input(0), Some(motif.x_q));
    assert_eq!(node.output(0), Some(motif.y_q));
    assert!(graph.is_graph_output(motif.y_q));
    assert_eq!(graph.node_count(), 1);
    graph.verify().unwrap();
}

#[test]
fn test_unary_keeps_scale_order() {
    let mut builder = QdqGraphBuilder::new();
    builder.qdq_around_with("Sigmoid", DType::UInt8, (0.05, Some(128)), (0.02, Some(7)));
    let mut graph = builder.build();

    let report = transform(&mut graph, TransformConfig::default());
    let node = graph.node(added_node(&report)).unwrap();
    let scalar = |slot: usize| graph.initializer(node.input(slot).unwrap()).unwrap().clone();
    assert_eq!(scalar(1).f32_at(0), Some(0.05));
    assert_eq!(scalar(2).int_at(0), Some(128));
    assert_eq!(scalar(3).f32_at(0), Some(0.02));
    assert_eq!(scalar(4).int_at(0), Some(7));
}

#[test]
fn test_softmax_records_opset() {
    let mut builder = QdqGraphBuilder::new();
    builder.qdq_around("Softmax", DType::UInt8, 1.0 / 256.0, Some(0));
    let mut graph = builder.build();

    let report = transform(&mut graph, TransformConfig::default());
    let node = graph.node(added_node(&report)).unwrap();
    assert_eq!(node.op_type, "QLinearSoftmax");
    assert_eq!(node.attribute("opset"), Some(&Attribute::Int(13)));
}

#[test]
fn test_unary_copies_target_attributes() {
    let mut builder = QdqGraphBuilder::new();
    let (_, _, x) = builder.dq_input(DType::UInt8, &[1, 4], 0.1, Some(128));
    let attributes = Attributes::from([("alpha".to_string(), Attribute::Float(0.2))]);
    let (_, y) = builder.node("LeakyRelu", vec![Some(x)], &[DType::Float32], attributes);
    builder.q_output(y[0], DType::UInt8, 0.1, Some(128));
    let mut graph = builder.build();

    let report = transform(&mut graph, TransformConfig::default());
    let node = graph.node(added_node(&report)).unwrap();
    assert_eq!(node.attribute("alpha"), Some(&Attribute::Float(0.2)));
}

#[test_case(DType::Int16 ; "16 bit")]
#[test_case(DType::UInt4 ; "4 bit")]
fn test_unary_rejects_wide_and_narrow_types(dtype: DType) {
    let mut builder = QdqGraphBuilder::new();
    builder.qdq_around("Sigmoid", dtype, 0.1, Some(0));
    let mut graph = builder.build();

    assert!(!transform(&mut graph, TransformConfig::default()).modified());
}

#[test]
fn test_unary_type_mismatch_is_kept() {
    let mut builder = QdqGraphBuilder::new();
    let (_, _, x) = builder.dq_input(DType::UInt8, &[1, 4], 0.1, Some(128));
    let (_, y) = builder.op("Sigmoid", &[x]);
    builder.q_output(y, DType::Int8, 0.1, Some(0));
    let mut graph = builder.build();

    assert!(!transform(&mut graph, TransformConfig::default()).modified());
}

/// `a_q, b_q -> DQ, DQ -> op -> Q`.
fn binary(builder: &mut QdqGraphBuilder, op_type: &str, dtype: DType) -> (ValueId, ValueId, ValueId) {
    let (_, a_q, a) = builder.dq_input(dtype, &[1, 4], 0.1, Some(1));
    let (_, b_q, b) = builder.dq_input(dtype, &[1, 4], 0.2, Some(2));
    let (_, y) = builder.op(op_type, &[a, b]);
    let (_, y_q) = builder.q_output(y, dtype, 0.3, Some(3));
    (a_q, b_q, y_q)
}

#[test_case("Add")]
#[test_case("Mul")]
fn test_binary_becomes_qlinear(op_type: &str) {
    let mut builder = QdqGraphBuilder::new();
    let (a_q, b_q, y_q) = binary(&mut builder, op_type, DType::Int8);
    let mut graph = builder.build();

    let report = transform(&mut graph, TransformConfig::default());
    assert_eq!(report.applied[0].rule, rules::BINARY);

    let node = graph.node(added_node(&report)).unwrap();
    assert_eq!(node.op_type, format!("QLinear{op_type}"));
    assert_eq!(node.inputs.len(), 8);
    assert_eq!(node.input(0), Some(a_q));
    assert_eq!(node.input(3), Some(b_q));
    assert_eq!(node.output(0), Some(y_q));
    graph.verify().unwrap();
}

#[test_case("Add", cfg!(feature = "dml") ; "add only with the dml feature")]
#[test_case("Mul", false ; "mul never")]
fn test_binary_on_dml(op_type: &str, rewritten: bool) {
    let mut builder = QdqGraphBuilder::new();
    builder.provider(ExecutionProvider::Dml);
    binary(&mut builder, op_type, DType::UInt8);
    let mut graph = builder.build();

    let report = transform(&mut graph, TransformConfig::default());

    assert_eq!(report.modified(), rewritten);
    if rewritten {
        assert_eq!(report.applied[0].rule, rules::BINARY_DML);
        let node = graph.node(added_node(&report)).unwrap();
        assert_eq!((node.op_type.as_str(), node.provider), ("QLinearAdd", ExecutionProvider::Dml));
    }
}

#[test]
fn test_concat_interleaves_input_triples() {
    let mut builder = QdqGraphBuilder::new();
    let sources: Vec<(ValueId, ValueId)> = (0..3)
        .map(|i| {
            let (_, x_q, x) = builder.dq_input(DType::UInt8, &[1, 4], 0.1 * (i + 1) as f32, Some(i));
            (x_q, x)
        })
        .collect();
    let inputs: Vec<ValueId> = sources.iter().map(|&(_, x)| x).collect();
    let (_, y) = builder.op("Concat", &inputs);
    let (_, y_q) = builder.q_output(y, DType::UInt8, 0.5, Some(10));
    let mut graph = builder.build();

    let report = transform(&mut graph, TransformConfig::default());
    assert_eq!(report.applied[0].rule, rules::VARIADIC);

    let node = graph.node(added_node(&report)).unwrap();
    assert_eq!(node.op_type, "QLinearConcat");
    assert_eq!(node.inputs.len(), 2 + 3 * 3);
    for (i, &(x_q, _)) in sources.iter().enumerate() {
        assert_eq!(node.input(2 + 3 * i), Some(x_q));
    }
    assert_eq!(node.output(0), Some(y_q));
    assert_eq!(graph.node_count(), 1);
}

#[test]
fn test_concat_mixed_types_is_kept() {
    let mut builder = QdqGraphBuilder::new();
    let (_, _, a) = builder.dq_input(DType::UInt8, &[1, 4], 0.1, Some(0));
    let (_, _, b) = builder.dq_input(DType::Int8, &[1, 4], 0.1, Some(0));
    let (_, y) = builder.op("Concat", &[a, b]);
    builder.q_output(y, DType::UInt8, 0.1, Some(0));
    let mut graph = builder.build();

    assert!(!transform(&mut graph, TransformConfig::default()).modified());
}

#[test]
fn test_where_keeps_condition() {
    let mut builder = QdqGraphBuilder::new();
    let condition = builder.input("cond", DType::Bool, &[1, 4]);
    let (_, x_q, x) = builder.dq_input(DType::UInt8, &[1, 4], 0.1, Some(0));
    let (_, y_q, y) = builder.dq_input(DType::UInt8, &[1, 4], 0.2, Some(0));
    let (_, z) = builder.op("Where", &[condition, x, y]);
    let (_, z_q) = builder.q_output(z, DType::UInt8, 0.2, Some(0));
    let mut graph = builder.build();

    let report = transform(&mut graph, TransformConfig::default());
    assert_eq!(report.applied[0].rule, rules::WHERE);

    let node = graph.node(added_node(&report)).unwrap();
    assert_eq!(node.op_type, "QLinearWhere");
    assert_eq!(node.inputs.len(), 9);
    assert_eq!(node.input(0), Some(condition));
    assert_eq!(node.input(1), Some(x_q));
    assert_eq!(node.input(4), Some(y_q));
    assert_eq!(node.output(0), Some(z_q));
}

/// `x_q -> DQ`, `w -> DQ`, optional `bias -> DQ`, `Conv -> Q`.
fn conv_graph(activation: DType, weight: DType, bias: bool) -> (Graph, ValueId, ValueId, Option<ValueId>) {
    let mut builder = QdqGraphBuilder::new();
    let (_, x_q, x) = builder.dq_input(activation, &[1, 1, 4, 4], 0.1, Some(0));
    let w_q = builder.constant("w", Tensor::from_ints(weight, &[1, 1, 1, 1], vec![3]).unwrap());
    let (_, w) = builder.dq(w_q, 0.05, Some(0));
    let bias_q = bias.then(|| builder.constant("bias", Tensor::from_ints(DType::Int32, &[1], vec![100]).unwrap()));
    let b = bias_q.map(|bias_q| builder.dq(bias_q, 0.005, None).1);
    let (_, y) = builder.node("Conv", vec![Some(x), Some(w), b], &[DType::Float32], Attributes::new());
    builder.q_output(y[0], activation, 0.2, Some(0));
    (builder.build(), x_q, w_q, bias_q)
}

#[test]
fn test_conv_with_bias() {
    let (mut graph, x_q, w_q, bias_q) = conv_graph(DType::UInt8, DType::UInt8, true);

    let report = transform(&mut graph, TransformConfig::default());
    assert_eq!(report.applied[0].rule, rules::CONV);

    let node = graph.node(added_node(&report)).unwrap();
    assert_eq!((node.op_type.as_str(), node.domain.as_str(), node.since_version), ("QLinearConv", ONNX_DOMAIN, 10));
    assert_eq!(node.inputs.len(), 9);
    assert_eq!(node.input(0), Some(x_q));
    assert_eq!(node.input(3), Some(w_q));
    assert_eq!(node.input(8), bias_q);
    assert_eq!(graph.node_count(), 1);
    graph.verify().unwrap();
}

#[test]
fn test_conv_without_bias_trims_inputs() {
    let (mut graph, _, _, _) = conv_graph(DType::UInt8, DType::UInt8, false);

    let report = transform(&mut graph, TransformConfig::default());
    assert_eq!(graph.node(added_node(&report)).unwrap().inputs.len(), 8);
}

#[test]
fn test_conv_float_bias_is_kept() {
    let mut builder = QdqGraphBuilder::new();
    let (_, _, x) = builder.dq_input(DType::UInt8, &[1, 1, 4, 4], 0.1, Some(0));
    let w_q = builder.constant("w", Tensor::from_ints(DType::UInt8, &[1, 1, 1, 1], vec![3]).unwrap());
    let (_, w) = builder.dq(w_q, 0.05, Some(0));
    let bias = builder.constant("bias", Tensor::from_f32(&[1], vec![0.5]).unwrap());
    let (_, y) = builder.op("Conv", &[x, w, bias]);
    builder.q_output(y, DType::UInt8, 0.2, Some(0));
    let mut graph = builder.build();

    assert!(!transform(&mut graph, TransformConfig::default()).modified());
}

#[test_case(DType::UInt8, DType::Int8, false, false ; "u8 x s8 without int8")]
#[test_case(DType::UInt8, DType::Int8, true, true ; "u8 x s8 with int8")]
#[test_case(DType::Int8, DType::Int8, false, false ; "s8 x s8 without int8")]
#[test_case(DType::Int8, DType::Int8, true, true ; "s8 x s8 with int8")]
#[test_case(DType::Int8, DType::UInt8, true, false ; "s8 x u8")]
fn test_conv_int8_gate(activation: DType, weight: DType, int8_allowed: bool, rewritten: bool) {
    let (mut graph, _, _, _) = conv_graph(activation, weight, false);
    let config = TransformConfig::builder().int8_allowed(int8_allowed).build();
    assert_eq!(transform(&mut graph, config).modified(), rewritten);
}

/// `a_q -> DQ`, `b_q -> DQ`, `MatMul`, then a Q or a float graph output.
fn matmul_graph(builder: &mut QdqGraphBuilder, dtype: DType, with_q: bool) -> (NodeId, ValueId, ValueId, ValueId) {
    let (_, a_q, a) = builder.dq_input(dtype, &[2, 4], 0.1, Some(0));
    let b_q = builder.constant("b", Tensor::from_ints(dtype, &[4, 3], vec![1; 12]).unwrap());
    let (_, b) = builder.dq(b_q, 0.05, Some(0));
    let (matmul, y) = builder.op("MatMul", &[a, b]);
    let out = if with_q {
        builder.q_output(y, dtype, 0.2, Some(0)).1
    } else {
        builder.mark_output(y);
        y
    };
    (matmul, a_q, b_q, out)
}

#[test]
fn test_int8_matmul_needs_int8_allowed() {
    let mut builder = QdqGraphBuilder::new();
    matmul_graph(&mut builder, DType::Int8, true);
    let mut graph = builder.build();

    assert!(!transform(&mut graph, TransformConfig::default()).modified());
    assert_eq!(graph.node_count(), 4);
}

#[test]
fn test_int8_matmul_becomes_qlinear_matmul() {
    let mut builder = QdqGraphBuilder::new();
    let (matmul, a_q, b_q, y_q) = matmul_graph(&mut builder, DType::Int8, true);
    let mut graph = builder.build();

    let report = transform(&mut graph, int8_config());
    assert_eq!(report.applied[0].rule, rules::MATMUL);
    assert_eq!(report.applied[0].target, matmul);

    let node = graph.node(added_node(&report)).unwrap();
    assert_eq!((node.op_type.as_str(), node.domain.as_str(), node.since_version), ("QLinearMatMul", ONNX_DOMAIN, 10));
    assert_eq!(node.input(0), Some(a_q));
    assert_eq!(node.input(3), Some(b_q));
    assert_eq!(node.output(0), Some(y_q));
    assert_eq!(graph.node_count(), 1);
    graph.verify().unwrap();
}

#[test]
fn test_matmul_without_q_keeps_float_output() {
    let mut builder = QdqGraphBuilder::new();
    let (_, a_q, b_q, y) = matmul_graph(&mut builder, DType::UInt8, false);
    let mut graph = builder.build();

    let report = transform(&mut graph, TransformConfig::default());
    let node = graph.node(added_node(&report)).unwrap();
    assert_eq!((node.op_type.as_str(), node.domain.as_str()), ("MatMulIntegerToFloat", MS_DOMAIN));
    assert_eq!(node.inputs.len(), 6);
    assert_eq!(node.input(0), Some(a_q));
    assert_eq!(node.input(1), Some(b_q));
    assert_eq!(node.output(0), Some(y));
    assert_eq!(graph.dtype_of(y), Some(DType::Float32));
}

#[test]
fn test_16bit_matmul_is_kept() {
    let mut builder = QdqGraphBuilder::new();
    matmul_graph(&mut builder, DType::UInt16, true);
    let mut graph = builder.build();

    assert!(!transform(&mut graph, int8_config()).modified());
}

#[test_case(true, 9 ; "with bias and q")]
#[test_case(false, 6 ; "float output")]
fn test_gemm_becomes_qgemm(with_q: bool, inputs: usize) {
    let mut builder = QdqGraphBuilder::new();
    let (_, a_q, a) = builder.dq_input(DType::UInt8, &[2, 4], 0.1, Some(0));
    let b_q = builder.constant("b", Tensor::from_ints(DType::UInt8, &[4, 3], vec![1; 12]).unwrap());
    let (_, b) = builder.dq(b_q, 0.05, Some(0));
    let c = with_q.then(|| {
        let c_q = builder.constant("c", Tensor::from_ints(DType::Int32, &[3], vec![1, 2, 3]).unwrap());
        builder.dq(c_q, 0.005, None).1
    });
    let (_, y) = builder.node("Gemm", vec![Some(a), Some(b), c], &[DType::Float32], Attributes::new());
    let out = if with_q {
        builder.q_output(y[0], DType::UInt8, 0.2, Some(0)).1
    } else {
        builder.mark_output(y[0]);
        y[0]
    };
    let mut graph = builder.build();

    let report = transform(&mut graph, TransformConfig::default());
    assert_eq!(report.applied[0].rule, rules::GEMM);

    let node = graph.node(added_node(&report)).unwrap();
    assert_eq!(node.op_type, "QGemm");
    assert_eq!(node.inputs.len(), inputs);
    assert_eq!(node.input(0), Some(a_q));
    assert_eq!(node.output(0), Some(out));
    graph.verify().unwrap();
}

#[test]
fn test_split_moves_onto_quantized_tensors() {
    let mut builder = QdqGraphBuilder::new();
    let (_, x_q, x) = builder.dq_input(DType::UInt8, &[2, 4], 0.1, Some(128));
    let (split, ys) = builder.node("Split", vec![Some(x)], &[DType::Float32, DType::Float32], Attributes::new());
    let (_, y0_q) = builder.q_output(ys[0], DType::UInt8, 0.1, Some(128));
    let (_, y1_q) = builder.q_output(ys[1], DType::UInt8, 0.1, Some(128));
    let mut graph = builder.build();

    let report = transform(&mut graph, TransformConfig::default());
    assert_eq!(report.applied[0].rule, rules::DROP_SPLIT_QDQ);
    assert_eq!(report.applied[0].target, split);

    let node = graph.node(added_node(&report)).unwrap();
    assert_eq!((node.op_type.as_str(), node.domain.as_str(), node.since_version), ("Split", ONNX_DOMAIN, 13));
    assert_eq!(node.inputs.as_slice(), &[Some(x_q)]);
    assert_eq!(node.outputs.as_slice(), &[y0_q, y1_q]);
    assert_eq!(graph.node_count(), 1);
    graph.verify().unwrap();
}

#[test]
fn test_split_with_unquantized_output_is_kept() {
    let mut builder = QdqGraphBuilder::new();
    let (_, _, x) = builder.dq_input(DType::UInt8, &[2, 4], 0.1, Some(128));
    let (_, ys) = builder.node("Split", vec![Some(x)], &[DType::Float32, DType::Float32], Attributes::new());
    builder.q_output(ys[0], DType::UInt8, 0.1, Some(128));
    builder.mark_output(ys[1]);
    let mut graph = builder.build();

    assert!(!transform(&mut graph, TransformConfig::default()).modified());
}

#[test]
fn test_split_with_different_q_params_is_kept() {
    let mut builder = QdqGraphBuilder::new();
    let (_, _, x) = builder.dq_input(DType::UInt8, &[2, 4], 0.1, Some(128));
    let (_, ys) = builder.node("Split", vec![Some(x)], &[DType::Float32, DType::Float32], Attributes::new());
    builder.q_output(ys[0], DType::UInt8, 0.1, Some(128));
    builder.q_output(ys[1], DType::UInt8, 0.3, Some(128));
    let mut graph = builder.build();

    assert!(!transform(&mut graph, TransformConfig::default()).modified());
}
