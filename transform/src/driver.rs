//! The transform pass.

use std::collections::HashSet;

use qfuse_ir::{Graph, NodeId};
use snafu::{ResultExt, ensure};

use crate::actions::AppliedResult;
use crate::config::{ApplyMode, TransformConfig};
use crate::error::*;
use crate::matcher::{Match, Matcher, ReplayMatcher, SelectorMatcher};
use crate::record::MatchRecord;
use crate::registry::Registry;
use crate::rules::qdq_rules;

/// One applied rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AppliedEntry {
    pub rule: String,
    pub target: NodeId,
    pub result: AppliedResult,
}

/// A rewrite that matched but could not be applied. The graph is unchanged for it.
#[derive(Debug)]
pub struct ApplyFailure {
    pub rule: String,
    pub node: NodeId,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct TransformReport {
    pub applied: Vec<AppliedEntry>,
    /// Matches found in save mode.
    pub records: Vec<MatchRecord>,
    pub failures: Vec<ApplyFailure>,
}

impl TransformReport {
    pub fn modified(&self) -> bool {
        !self.applied.is_empty()
    }

    /// Turn collected failures into a single [`Error::ApplyFailures`].
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        ApplyFailuresSnafu { failures: self.failures }.fail()
    }
}

/// Applies the QDQ rules to graphs.
///
/// Nodes are visited once, in topological order (ties by ascending id)
/// computed at the start of the pass. Nodes created by a rewrite are not
/// visited, removed nodes are skipped. This is a single pass, not a fixpoint.
#[derive(Debug)]
pub struct Transformer {
    config: TransformConfig,
    registry: Registry,
    records: Vec<MatchRecord>,
}

impl Transformer {
    /// Transformer with the standard rule catalog.
    pub fn new(config: TransformConfig) -> Result<Self> {
        let registry = qdq_rules(&config)?;
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: TransformConfig, registry: Registry) -> Result<Self> {
        if config.mode.uses_selectors()
            && let Some(rule) = registry.rules().iter().find(|rule| rule.selector.is_none())
        {
            return MissingSelectorSnafu { name: rule.name.clone() }.fail();
        }
        Ok(Self { config, registry, records: Vec::new() })
    }

    /// Saved matches to replay; every record must name a registered rule and
    /// no two records may share a target.
    pub fn with_records(mut self, records: Vec<MatchRecord>) -> Result<Self> {
        ensure!(
            self.config.mode == ApplyMode::Replay,
            InvalidConfigSnafu { reason: format!("match records given in {} mode", self.config.mode) }
        );
        ReplayMatcher::new(&self.registry, &records)?;
        self.records = records;
        Ok(self)
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run one pass over `graph`.
    ///
    /// Per-node failures are collected in the report; only a graph that cannot
    /// be ordered fails the whole pass.
    #[tracing::instrument(skip_all, fields(graph = %graph.name(), mode = %self.config.mode))]
    pub fn apply(&self, graph: &mut Graph) -> Result<TransformReport> {
        let order = graph.topological_order().context(GraphSnafu)?;
        let mut matcher: Box<dyn Matcher<'_> + '_> = match self.config.mode {
            ApplyMode::Replay => Box::new(ReplayMatcher::new(&self.registry, &self.records)?),
            ApplyMode::Direct | ApplyMode::Save => {
                Box::new(SelectorMatcher::new(&self.registry, self.config.compatible_providers))
            }
        };

        let mut report = TransformReport::default();
        // Save mode leaves the graph alone, so matched nodes must be claimed explicitly.
        let mut claimed: HashSet<NodeId> = HashSet::new();

        for id in order {
            if !graph.contains(id) || claimed.contains(&id) {
                continue;
            }
            let Some(Match { rule, group }) = matcher.find(graph, id) else { continue };

            if self.config.mode == ApplyMode::Save {
                let nodes = group.all_nodes();
                if nodes.iter().any(|node| claimed.contains(node)) {
                    tracing::trace!(rule = %rule.name, node = %id, "match overlaps an earlier one");
                    continue;
                }
                claimed.extend(nodes);
                report.records.push(MatchRecord::new(rule.name.clone(), group));
                continue;
            }

            match rule.action.apply(graph, &group, &rule.name) {
                Ok(result) => report.applied.push(AppliedEntry { rule: rule.name.clone(), target: id, result }),
                Err(error) => {
                    tracing::warn!(rule = %rule.name, node = %id, %error, "rewrite failed");
                    report.failures.push(ApplyFailure { rule: rule.name.clone(), node: id, error });
                }
            }
        }

        for failure in matcher.finish() {
            tracing::warn!(rule = %failure.rule, node = %failure.node, error = %failure.error, "saved match not applied");
            report.failures.push(failure);
        }

        tracing::debug!(
            applied = report.applied.len(),
            recorded = report.records.len(),
            failed = report.failures.len(),
            "transform pass finished"
        );
        Ok(report)
    }
}
