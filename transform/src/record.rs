//! Saved matches.

use crate::group::NodeGroup;

/// A match found by a save-mode pass, replayed later without selectors.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchRecord {
    pub rule: String,
    pub group: NodeGroup,
}

impl MatchRecord {
    pub fn new(rule: impl Into<String>, group: NodeGroup) -> Self {
        Self { rule: rule.into(), group }
    }
}
