//! Rule-based QDQ graph transformer.
//!
//! Recognizes small motifs of quantize (Q) and dequantize (DQ) nodes around a
//! target operator and rewrites them into quantized operators, or drops the
//! Q/DQ wrapper when the operator does not care about it.
//!
//! # Module Organization
//!
//! - [`group`] / [`moves`] - Matched motifs and declarative edge relocation
//! - [`selectors`] - Read-only motif matchers
//! - [`actions`] - Graph rewrites, including the 4-bit weight repack
//! - [`registry`] / [`rules`] - Named rules and the standard catalog
//! - [`matcher`] / [`driver`] - Discovery, save and replay passes
//!
//! # Example
//!
//! ```ignore
//! let transformer = Transformer::new(TransformConfig::from_env()?)?;
//! let report = transformer.apply(&mut graph)?.into_result()?;
//! ```

pub mod actions;
pub mod config;
pub mod driver;
pub mod error;
pub mod group;
pub mod matcher;
pub mod moves;
pub mod qdq_util;
pub mod record;
pub mod registry;
pub mod rules;
pub mod selectors;


pub use actions::{Action, AppliedResult};
pub use config::{AccuracyLevel, ApplyMode, TransformConfig};
pub use driver::{AppliedEntry, ApplyFailure, TransformReport, Transformer};
pub use error::{Error, Result};
pub use group::{NodeGroup, NodeRole};
pub use moves::{ArgKind, ArgSlot, EdgeMove};
pub use record::MatchRecord;
pub use registry::{OpVersion, Registry, RuleEntry};
pub use selectors::Selector;
