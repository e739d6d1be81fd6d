use qfuse_ir::NodeId;
use snafu::Snafu;

use crate::driver::ApplyFailure;
use crate::group::NodeRole;
use crate::moves::ArgSlot;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    // =========================================================================
    // Configuration errors (the transformer cannot be built)
    // =========================================================================
    #[snafu(display("rule '{name}' is registered twice"))]
    DuplicateRule { name: String },

    #[snafu(display("rule '{name}' has no target operator types"))]
    EmptyTargetOps { name: String },

    #[snafu(display("match record names unknown rule '{name}'"))]
    UnknownRule { name: String },

    #[snafu(display("rule '{name}' has no selector and cannot be used for discovery"))]
    MissingSelector { name: String },

    #[snafu(display("node {node} has more than one saved match"))]
    DuplicateRecord { node: NodeId },

    #[snafu(display("invalid transformer configuration: {reason}"))]
    InvalidConfig { reason: String },

    // =========================================================================
    // Per-node apply failures (the graph is left untouched)
    // =========================================================================
    #[snafu(display("rule '{rule}': node {node} recorded in the match no longer exists"))]
    MissingGroupNode { rule: String, node: NodeId },

    #[snafu(display("{role} has no value at {arg} to move"))]
    MissingMoveSource { role: NodeRole, arg: ArgSlot },

    #[snafu(display("rule '{rule}': unexpected node group shape: {reason}"))]
    UnexpectedGroupShape { rule: String, reason: String },

    #[snafu(display("cannot repack block-quantized weight: {reason}"))]
    WeightRepack { reason: String },

    #[snafu(display("graph operation failed: {source}"))]
    Graph { source: qfuse_ir::Error },

    /// All per-node failures of one pass, reported together.
    #[snafu(display("{} rewrite(s) failed to apply", failures.len()))]
    ApplyFailures { failures: Vec<ApplyFailure> },
}
