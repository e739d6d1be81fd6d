//! Selector/action registry.
//!
//! Rules are stored in registration order and indexed by target op type so
//! the driver only tries rules that can possibly apply to a node. The
//! registry is immutable once a [`crate::Transformer`] owns it.

use std::collections::HashMap;

use qfuse_ir::{Node, ONNX_DOMAIN, ProviderSet};
use smallvec::SmallVec;
use snafu::ensure;

use crate::actions::Action;
use crate::error::*;
use crate::selectors::Selector;

/// Operator type a rule targets, with the first opset version it supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpVersion {
    pub op_type: String,
    pub min_version: Option<u32>,
}

impl OpVersion {
    pub fn any(op_type: impl Into<String>) -> Self {
        Self { op_type: op_type.into(), min_version: None }
    }

    pub fn since(op_type: impl Into<String>, version: u32) -> Self {
        Self { op_type: op_type.into(), min_version: Some(version) }
    }

    fn accepts(&self, node: &Node) -> bool {
        node.op_type == self.op_type && self.min_version.is_none_or(|min| node.since_version >= min)
    }
}

/// One named rule.
///
/// A rule without a selector only exists in replay mode, where matching
/// already happened in an earlier run.
#[derive(Debug, Clone, bon::Builder)]
#[builder(on(String, into))]
pub struct RuleEntry {
    pub name: String,
    pub target_ops: Vec<OpVersion>,
    pub selector: Option<Selector>,
    pub action: Action,
    pub providers: ProviderSet,
}

impl RuleEntry {
    /// Op type, version and provider filter applied before the selector runs.
    pub fn accepts(&self, node: &Node) -> bool {
        node.domain == ONNX_DOMAIN
            && self.providers.contains(node.provider)
            && self.target_ops.iter().any(|op| op.accepts(node))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    rules: Vec<RuleEntry>,
    by_name: HashMap<String, usize>,
    by_op: HashMap<String, SmallVec<[usize; 2]>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: RuleEntry) -> Result<()> {
        ensure!(!entry.target_ops.is_empty(), EmptyTargetOpsSnafu { name: entry.name.clone() });
        ensure!(!self.by_name.contains_key(&entry.name), DuplicateRuleSnafu { name: entry.name.clone() });

        let index = self.rules.len();
        for op in &entry.target_ops {
            let rules = self.by_op.entry(op.op_type.clone()).or_default();
            if !rules.contains(&index) {
                rules.push(index);
            }
        }
        tracing::trace!(rule = %entry.name, ops = entry.target_ops.len(), "rule registered");
        self.by_name.insert(entry.name.clone(), index);
        self.rules.push(entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RuleEntry> {
        self.by_name.get(name).map(|&index| &self.rules[index])
    }

    /// Rules targeting `op_type`, in registration order.
    pub fn candidates(&self, op_type: &str) -> impl Iterator<Item = &RuleEntry> + '_ {
        self.by_op.get(op_type).into_iter().flatten().map(|&index| &self.rules[index])
    }

    pub fn lookup_candidates(&self, op_type: &str) -> Vec<&str> {
        self.candidates(op_type).map(|rule| rule.name.as_str()).collect()
    }

    pub fn rules(&self) -> &[RuleEntry] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
