//! The QDQ rule catalog.
//!
//! Registration order matters: for an op type with several rules (MatMul)
//! the first selector that matches wins.

use qfuse_ir::{ExecutionProvider::*, MS_DOMAIN, ONNX_DOMAIN, ProviderSet};

use crate::actions::{self, Action, MatMulNBitsAction, OpName};
use crate::config::TransformConfig;
use crate::error::*;
use crate::registry::{OpVersion, Registry, RuleEntry};
use crate::selectors::*;

pub const DROP_SPLIT_QDQ: &str = "dropSplitQDQ";
pub const DROP_NO_INT16: &str = "drop_no_int16_support";
pub const DROP_NO_INT16_POSITIVE_SCALE: &str = "drop_no_int16_support_and_positive_scale";
pub const DROP: &str = "drop";
pub const DROP_DQ: &str = "dropDQ";
pub const UNARY: &str = "1DQ";
pub const BINARY: &str = "2DQ";
/// Binary rewrite for `Add` on DirectML, compiled in with the `dml` feature.
pub const BINARY_DML: &str = "2DQ_DML";
pub const VARIADIC: &str = "*DQ";
pub const CONV: &str = "Conv";
pub const MATMUL: &str = "MatMul";
pub const GEMM: &str = "Gemm";
pub const WHERE: &str = "Where";
pub const DQ_MATMUL_TO_NBITS: &str = "DQMatMulToMatMulNBits";

fn ops(names: &[&str]) -> Vec<OpVersion> {
    names.iter().map(|&name| OpVersion::any(name)).collect()
}

/// Build the catalog for `config`.
///
/// In replay mode rules carry no selectors.
pub fn qdq_rules(config: &TransformConfig) -> Result<Registry> {
    let with_selectors = config.mode.uses_selectors();
    let mut registry = Registry::new();
    let mut add = |name: &str, target_ops: Vec<OpVersion>, selector: Selector, action: Action, providers: ProviderSet| {
        registry.register(
            RuleEntry::builder()
                .name(name)
                .target_ops(target_ops)
                .maybe_selector(with_selectors.then_some(selector))
                .action(action)
                .providers(providers)
                .build(),
        )
    };

    let no_16 = Widths::STRICT;
    let allow_16 = Widths { allow_16bit: true, allow_4bit: false };
    let allow_4 = Widths { allow_16bit: false, allow_4bit: true };
    let merge_qdq = || Action::MergeIntoTarget { moves: actions::drop_qdq_moves() };
    let qlinear = |moves| Action::Replace { op: OpName::QLinearPrefix, domain: MS_DOMAIN, since_version: 1, moves };

    add(
        DROP_SPLIT_QDQ,
        ops(&["Split"]),
        Selector::Split(SplitSelector { widths: no_16, require_equal_params: true }),
        Action::QuantizedSplit,
        Cpu | Dml,
    )?;
    add(
        DROP_NO_INT16,
        ops(&["DepthToSpace", "Resize"]),
        Selector::DropQdq(DropQdqSelector { widths: no_16, require_positive_scale: false }),
        merge_qdq(),
        Cpu.into(),
    )?;
    add(
        DROP_NO_INT16_POSITIVE_SCALE,
        vec![OpVersion::since("MaxPool", 12), OpVersion::any("ReduceMax"), OpVersion::any("ReduceMin")],
        Selector::DropQdq(DropQdqSelector { widths: allow_4, require_positive_scale: true }),
        merge_qdq(),
        Cpu | Dml,
    )?;
    add(
        DROP,
        ops(&[
            "Expand",
            "Flatten",
            "Gather",
            "GatherElements",
            "Reshape",
            "Slice",
            "Squeeze",
            "Tile",
            "Transpose",
            "Unsqueeze",
        ]),
        Selector::DropQdq(DropQdqSelector { widths: allow_16, require_positive_scale: false }),
        merge_qdq(),
        Cpu | Dml,
    )?;
    add(
        DROP_DQ,
        ops(&["ArgMax"]),
        Selector::DropDq(DropDqSelector { widths: no_16 }),
        Action::MergeIntoTarget { moves: actions::drop_dq_moves() },
        Cpu | Dml,
    )?;
    add(
        UNARY,
        ops(&["AveragePool", "LeakyRelu", "GlobalAveragePool", "Sigmoid", "Softmax"]),
        Selector::Uniform(UniformSelector::new(UniformShape::Unary)),
        qlinear(actions::unary_moves()),
        Cpu | Dml,
    )?;
    add(
        BINARY,
        ops(&["Add", "Mul"]),
        Selector::Uniform(UniformSelector::new(UniformShape::Binary)),
        qlinear(actions::binary_moves()),
        Cpu.into(),
    )?;
    #[cfg(feature = "dml")]
    add(
        BINARY_DML,
        ops(&["Add"]),
        Selector::Uniform(UniformSelector::new(UniformShape::Binary)),
        qlinear(actions::binary_moves()),
        Dml.into(),
    )?;
    add(
        VARIADIC,
        ops(&["Concat"]),
        Selector::Uniform(UniformSelector::new(UniformShape::Variadic)),
        Action::QLinearConcat,
        Cpu | Dml,
    )?;
    add(
        CONV,
        ops(&["Conv"]),
        Selector::Conv(ConvSelector { int8_allowed: config.int8_allowed, widths: no_16 }),
        Action::Replace {
            op: OpName::Fixed("QLinearConv"),
            domain: ONNX_DOMAIN,
            since_version: 10,
            moves: actions::conv_moves(),
        },
        Cpu | Dml | Acl,
    )?;
    add(
        MATMUL,
        ops(&["MatMul"]),
        Selector::MatMul(MatMulSelector { int8_allowed: config.int8_allowed, widths: no_16 }),
        Action::MatMul,
        Cpu | Dml,
    )?;
    add(GEMM, ops(&["Gemm"]), Selector::Gemm(GemmSelector), Action::QGemm, Cpu.into())?;
    add(
        WHERE,
        ops(&["Where"]),
        Selector::Uniform(UniformSelector::new(UniformShape::Where)),
        Action::Replace {
            op: OpName::Fixed("QLinearWhere"),
            domain: MS_DOMAIN,
            since_version: 1,
            moves: actions::where_moves(),
        },
        Cpu.into(),
    )?;
    add(
        DQ_MATMUL_TO_NBITS,
        ops(&["MatMul"]),
        Selector::DqMatMulNBits(DqMatMulNBitsSelector),
        Action::MatMulNBits(MatMulNBitsAction {
            accuracy_level: config.accuracy_level,
            thread_pool: config.thread_pool.clone(),
        }),
        Cpu | Cuda | Dml,
    )?;

    tracing::debug!(rules = registry.len(), mode = %config.mode, "QDQ rule catalog built");
    Ok(registry)
}
