//! Rewrite actions.
//!
//! Every action resolves its edge moves and new-node specs against the
//! unmodified graph, stages them in one [`GraphEdit`] and commits it. A
//! rejected edit leaves the graph untouched, so a failed action never leaves
//! a partial rewrite behind.

mod nbits;
mod qlinear;

use qfuse_ir::{Attribute, Attributes, Graph, GraphEdit, MS_DOMAIN, NodeId, NodeSpec, ONNX_DOMAIN, ValueRef};
use snafu::{OptionExt, ResultExt};

pub use nbits::{BlockQuantized, MatMulNBitsAction, PackedWeight};
pub use qlinear::*;

use crate::error::*;
use crate::group::NodeGroup;
use crate::moves::{EdgeMove, resolve_moves};

/// Nodes removed and created by one applied action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AppliedResult {
    pub removed: Vec<NodeId>,
    pub added: Vec<NodeId>,
}

/// Op type of a replacement node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpName {
    Fixed(&'static str),
    /// `QLinear` followed by the target's op type.
    QLinearPrefix,
}

impl OpName {
    fn resolve(&self, target_op: &str) -> String {
        match self {
            Self::Fixed(op) => op.to_string(),
            Self::QLinearPrefix => format!("QLinear{target_op}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    /// Remove the group's Q/DQ nodes and splice the target onto the tensors they bridged.
    MergeIntoTarget { moves: Vec<EdgeMove> },
    /// Replace the whole group with one quantized node wired by fixed moves.
    Replace { op: OpName, domain: &'static str, since_version: u32, moves: Vec<EdgeMove> },
    /// `QLinearConcat` with one `(data, scale, zero point)` triple per input.
    QLinearConcat,
    /// `QLinearMatMul` when the group has a Q, `MatMulIntegerToFloat` otherwise.
    MatMul,
    /// `QGemm`, float output when the group has no Q.
    QGemm,
    /// `Split` rewired onto the quantized tensors.
    QuantizedSplit,
    /// Block-quantized weight repack into `MatMulNBits`.
    MatMulNBits(MatMulNBitsAction),
}

impl Action {
    #[tracing::instrument(level = "trace", skip_all, fields(rule = rule, target = %group.target))]
    pub fn apply(&self, graph: &mut Graph, group: &NodeGroup, rule: &str) -> Result<AppliedResult> {
        group.check_live(graph, rule)?;

        let edit = match self {
            Self::MergeIntoTarget { moves } => merge_edit(graph, group, moves)?,
            Self::Replace { op, domain, since_version, moves } => {
                let target_op = target_op(graph, group, rule)?;
                let plan = Replacement::new(op.resolve(&target_op), domain, *since_version, moves.clone());
                plan.edit(graph, group, rule)?
            }
            Self::QLinearConcat => Replacement::new("QLinearConcat".into(), MS_DOMAIN, 1, concat_moves(group.inputs.len()))
                .edit(graph, group, rule)?,
            Self::MatMul => {
                let plan = if group.has_q() {
                    Replacement::new("QLinearMatMul".into(), ONNX_DOMAIN, 10, qlinear_matmul_moves())
                } else {
                    Replacement::new("MatMulIntegerToFloat".into(), MS_DOMAIN, 1, matmul_integer_to_float_moves())
                };
                plan.without_attributes().edit(graph, group, rule)?
            }
            Self::QGemm => Replacement::new("QGemm".into(), MS_DOMAIN, 1, qgemm_moves(group.has_q())).edit(graph, group, rule)?,
            Self::QuantizedSplit => {
                let since_version = graph.node(group.target).map_or(1, |node| node.since_version);
                Replacement::new("Split".into(), ONNX_DOMAIN, since_version, split_moves(group.outputs.len()))
                    .edit(graph, group, rule)?
            }
            Self::MatMulNBits(action) => action.edit(graph, group, rule)?,
        };

        commit(graph, edit)
    }
}

fn target_op(graph: &Graph, group: &NodeGroup, rule: &str) -> Result<String> {
    graph
        .node(group.target)
        .map(|node| node.op_type.clone())
        .context(MissingGroupNodeSnafu { rule, node: group.target })
}

fn commit(graph: &mut Graph, edit: GraphEdit) -> Result<AppliedResult> {
    let outcome = graph.apply_edit(edit).context(GraphSnafu)?;
    tracing::debug!(removed = outcome.removed.len(), added = outcome.added.len(), "action committed");
    Ok(AppliedResult { removed: outcome.removed, added: outcome.added })
}

fn merge_edit(graph: &Graph, group: &NodeGroup, moves: &[EdgeMove]) -> Result<GraphEdit> {
    let args = resolve_moves(graph, group, moves)?;
    let mut edit = GraphEdit::new();
    for node in group.dq_nodes().chain(group.q_nodes()) {
        edit.remove_node(node);
    }
    for (slot, value) in args.inputs.iter().enumerate() {
        if let Some(value) = value {
            edit.set_input(group.target, slot, Some(ValueRef::Existing(*value)));
        }
    }
    for (slot, value) in args.outputs.iter().enumerate() {
        if let Some(value) = value {
            edit.set_output(group.target, slot, *value);
        }
    }
    Ok(edit)
}

/// One node replacing a whole group.
struct Replacement {
    op_type: String,
    domain: &'static str,
    since_version: u32,
    moves: Vec<EdgeMove>,
    copy_attributes: bool,
}

impl Replacement {
    fn new(op_type: String, domain: &'static str, since_version: u32, moves: Vec<EdgeMove>) -> Self {
        Self { op_type, domain, since_version, moves, copy_attributes: true }
    }

    fn without_attributes(mut self) -> Self {
        self.copy_attributes = false;
        self
    }

    fn edit(self, graph: &Graph, group: &NodeGroup, rule: &str) -> Result<GraphEdit> {
        let target = graph.node(group.target).context(MissingGroupNodeSnafu { rule, node: group.target })?;
        let args = resolve_moves(graph, group, &self.moves)?;
        let outputs = args.complete_outputs(rule)?;

        let mut attributes = if self.copy_attributes { target.attributes.clone() } else { Attributes::new() };
        // QLinearSoftmax needs to know which Softmax semantics (axis handling) it replaces.
        if target.op_type == "Softmax" {
            attributes.insert("opset".into(), Attribute::Int(target.since_version as i64));
        }

        let spec = NodeSpec::builder()
            .name(format!("{}_quant", target.name))
            .op_type(self.op_type)
            .domain(self.domain)
            .since_version(self.since_version)
            .inputs(args.trimmed_inputs().into_iter().map(|value| value.map(ValueRef::Existing)).collect())
            .outputs(outputs)
            .attributes(attributes)
            .provider(target.provider)
            .build();

        let mut edit = GraphEdit::new();
        for node in group.all_nodes() {
            edit.remove_node(node);
        }
        edit.add_node(spec);
        Ok(edit)
    }
}
