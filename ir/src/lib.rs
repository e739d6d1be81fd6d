//! Mutable operator graph for quantization rewrites.
//!
//! The graph is a pair of arenas (nodes and values) with producer/consumer
//! bookkeeping on every value. Rewrites are expressed as [`GraphEdit`]
//! transactions which are validated as a whole before any mutation happens.
//!
//! # Module Organization
//!
//! - [`graph`] - Node/value arenas, neighborhood queries and primitive mutation
//! - [`edit`] - Batched edits with all-or-nothing commit
//! - [`order`] - Deterministic topological order
//! - [`tensor`] - Constant tensors stored as initializers
//! - [`provider`] - Execution provider assignment

pub mod edit;
pub mod error;
pub mod graph;
pub mod node;
pub mod order;
pub mod provider;
pub mod tensor;
pub mod value;


pub use edit::{EditOutcome, GraphEdit, ValueRef};
pub use error::{Error, Result};
pub use graph::Graph;
pub use node::{Attribute, Attributes, MS_DOMAIN, Node, NodeId, NodeSpec, ONNX_DOMAIN};
pub use provider::{ExecutionProvider, ProviderSet};
pub use tensor::{Dims, Tensor, TensorData};
pub use value::{ValueId, ValueInfo, ValueKind};

pub use qfuse_dtype::DType;
