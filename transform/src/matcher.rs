//! Match sources for the driver.
//!
//! [`SelectorMatcher`] runs the registry's selectors; [`ReplayMatcher`]
//! trusts a table of previously saved matches. The driver is written against
//! [`Matcher`] and does not know which one it uses.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use qfuse_ir::{Graph, NodeId, ProviderSet};
use snafu::OptionExt;

use crate::driver::ApplyFailure;
use crate::error::*;
use crate::group::NodeGroup;
use crate::record::MatchRecord;
use crate::registry::{Registry, RuleEntry};

/// Rule chosen for a target together with its node group.
#[derive(Debug)]
pub struct Match<'r> {
    pub rule: &'r RuleEntry,
    pub group: NodeGroup,
}

pub trait Matcher<'r> {
    /// Rule and group for `node`, if any.
    fn find(&mut self, graph: &Graph, node: NodeId) -> Option<Match<'r>>;

    /// Failures discovered once the pass is over.
    fn finish(self: Box<Self>) -> Vec<ApplyFailure> {
        Vec::new()
    }
}

/// Runs the selectors of every candidate rule in registration order.
pub struct SelectorMatcher<'r> {
    registry: &'r Registry,
    compatible: ProviderSet,
}

impl<'r> SelectorMatcher<'r> {
    pub fn new(registry: &'r Registry, compatible: ProviderSet) -> Self {
        Self { registry, compatible }
    }
}

impl<'r> Matcher<'r> for SelectorMatcher<'r> {
    fn find(&mut self, graph: &Graph, id: NodeId) -> Option<Match<'r>> {
        let node = graph.node(id)?;
        if !self.compatible.contains(node.provider) {
            return None;
        }
        for rule in self.registry.candidates(&node.op_type) {
            if !rule.accepts(node) {
                continue;
            }
            let Some(selector) = &rule.selector else { continue };
            tracing::trace!(rule = %rule.name, node = %id, "trying selector");
            if let Some(group) = selector.select(graph, id) {
                tracing::debug!(rule = %rule.name, node = %id, op = %node.op_type, "rule matched");
                return Some(Match { rule, group });
            }
        }
        None
    }
}

/// Looks matches up by target id in a saved table.
pub struct ReplayMatcher<'r> {
    table: HashMap<NodeId, (&'r RuleEntry, NodeGroup)>,
}

impl<'r> ReplayMatcher<'r> {
    /// Fails with [`Error::UnknownRule`] if a record names a rule the registry does not have,
    /// and with [`Error::DuplicateRecord`] if two records share a target.
    pub fn new(registry: &'r Registry, records: &[MatchRecord]) -> Result<Self> {
        let mut table = HashMap::with_capacity(records.len());
        for record in records {
            let rule = registry.get(&record.rule).context(UnknownRuleSnafu { name: record.rule.clone() })?;
            match table.entry(record.group.target) {
                Entry::Occupied(_) => return DuplicateRecordSnafu { node: record.group.target }.fail(),
                Entry::Vacant(slot) => {
                    slot.insert((rule, record.group.clone()));
                }
            }
        }
        Ok(Self { table })
    }
}

impl<'r> Matcher<'r> for ReplayMatcher<'r> {
    fn find(&mut self, _graph: &Graph, node: NodeId) -> Option<Match<'r>> {
        self.table.remove(&node).map(|(rule, group)| Match { rule, group })
    }

    fn finish(self: Box<Self>) -> Vec<ApplyFailure> {
        let mut failures: Vec<ApplyFailure> = self
            .table
            .into_iter()
            .map(|(node, (rule, _))| ApplyFailure {
                rule: rule.name.clone(),
                node,
                error: Error::MissingGroupNode { rule: rule.name.clone(), node },
            })
            .collect();
        failures.sort_by_key(|failure| failure.node);
        failures
    }
}
