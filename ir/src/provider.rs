//! Execution providers.
//!
//! Every node is assigned to exactly one execution provider before graph
//! rewriting runs. Rewrite rules use the assignment to stay inert on
//! providers that cannot run the fused operator they would produce.

use enumset::EnumSet;

/// Backend a node is assigned to.
#[derive(Debug, Default, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter)]
#[derive(enumset::EnumSetType)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExecutionProvider {
    #[default]
    #[strum(serialize = "CPUExecutionProvider")]
    Cpu,
    #[strum(serialize = "CUDAExecutionProvider")]
    Cuda,
    #[strum(serialize = "DmlExecutionProvider")]
    Dml,
    #[strum(serialize = "ACLExecutionProvider")]
    Acl,
    #[strum(serialize = "WebNNExecutionProvider")]
    WebNn,
    #[strum(serialize = "WebGpuExecutionProvider")]
    WebGpu,
    #[strum(serialize = "CoreMLExecutionProvider")]
    CoreMl,
    #[strum(serialize = "QNNExecutionProvider")]
    Qnn,
}

/// Set of execution providers.
pub type ProviderSet = EnumSet<ExecutionProvider>;
