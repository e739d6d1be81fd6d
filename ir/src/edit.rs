//! Transactional graph edits.
//!
//! A [`GraphEdit`] collects node removals, edge rewires, new constants and new
//! nodes without touching the graph. [`Graph::validate_edit`] checks the whole
//! batch against the current graph; [`Graph::apply_edit`] validates and then
//! commits it. Commit cannot fail once validation passed, so a rejected edit
//! always leaves the graph exactly as it was.

use std::collections::{HashMap, HashSet};

use snafu::{OptionExt, ensure};

use crate::error::*;
use crate::{Graph, NodeId, NodeSpec, Tensor, ValueId};

/// Handle to a value inside an edit: either already in the graph or a
/// constant staged by the same edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRef {
    Existing(ValueId),
    Staged(usize),
}

impl From<ValueId> for ValueRef {
    fn from(id: ValueId) -> Self {
        Self::Existing(id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphEdit {
    removals: Vec<NodeId>,
    input_rewires: Vec<(NodeId, usize, Option<ValueRef>)>,
    output_rewires: Vec<(NodeId, usize, ValueId)>,
    initializers: Vec<(String, Tensor)>,
    nodes: Vec<NodeSpec<ValueRef>>,
}

/// What a committed edit changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditOutcome {
    pub removed: Vec<NodeId>,
    pub added: Vec<NodeId>,
    pub added_values: Vec<ValueId>,
}

impl GraphEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.removals.is_empty()
            && self.input_rewires.is_empty()
            && self.output_rewires.is_empty()
            && self.initializers.is_empty()
            && self.nodes.is_empty()
    }

    pub fn remove_node(&mut self, id: NodeId) -> &mut Self {
        self.removals.push(id);
        self
    }

    pub fn set_input(&mut self, node: NodeId, slot: usize, value: Option<ValueRef>) -> &mut Self {
        self.input_rewires.push((node, slot, value));
        self
    }

    pub fn set_output(&mut self, node: NodeId, slot: usize, value: ValueId) -> &mut Self {
        self.output_rewires.push((node, slot, value));
        self
    }

    /// Stage a new constant; the returned handle can be used by later rewires and nodes of this edit.
    pub fn add_initializer(&mut self, name: impl Into<String>, tensor: Tensor) -> ValueRef {
        self.initializers.push((name.into(), tensor));
        ValueRef::Staged(self.initializers.len() - 1)
    }

    pub fn add_node(&mut self, spec: NodeSpec<ValueRef>) -> &mut Self {
        self.nodes.push(spec);
        self
    }

    pub fn removals(&self) -> &[NodeId] {
        &self.removals
    }

    pub fn new_nodes(&self) -> &[NodeSpec<ValueRef>] {
        &self.nodes
    }
}

impl Graph {
    fn check_ref(&self, edit: &GraphEdit, value: ValueRef) -> Result<()> {
        match value {
            ValueRef::Existing(id) => self.value(id).map(|_| ()).context(UnknownValueSnafu { id }),
            ValueRef::Staged(index) => {
                ensure!(index < edit.initializers.len(), UnknownStagedValueSnafu { index });
                Ok(())
            }
        }
    }

    /// Claim `value` as the new output of some node in the edit.
    fn check_claim(&self, value: ValueId, removed: &HashSet<NodeId>, slot_owner: Option<(NodeId, usize)>) -> Result<()> {
        let info = self.value(value).context(UnknownValueSnafu { id: value })?;
        ensure!(info.is_producible(), ValueNotProducibleSnafu { value: info.name.clone() });
        if let Some((producer, producer_slot)) = info.producer()
            && !removed.contains(&producer)
            && slot_owner != Some((producer, producer_slot))
        {
            return ValueAlreadyProducedSnafu { value: info.name.clone(), producer }.fail();
        }
        Ok(())
    }

    /// Check that `edit` can be committed without leaving the graph inconsistent.
    pub fn validate_edit(&self, edit: &GraphEdit) -> Result<()> {
        let mut removed = HashSet::new();
        for &id in &edit.removals {
            ensure!(self.contains(id), UnknownNodeSnafu { id });
            ensure!(removed.insert(id), DuplicateRemovalSnafu { id });
        }

        let mut claimed: HashMap<ValueId, NodeId> = HashMap::new();
        let mut orphaned: HashSet<ValueId> = removed
            .iter()
            .filter_map(|&id| self.node(id))
            .flat_map(|node| node.outputs.iter().copied())
            .collect();

        for &(id, slot, value) in &edit.output_rewires {
            ensure!(!removed.contains(&id), EditOnRemovedNodeSnafu { id });
            let node = self.node(id).context(UnknownNodeSnafu { id })?;
            let len = node.outputs.len();
            ensure!(slot < len, OutputSlotOutOfRangeSnafu { node: id, slot, len });
            self.check_claim(value, &removed, Some((id, slot)))?;
            if claimed.insert(value, id).is_some() {
                return ValueAlreadyProducedSnafu { value: self.value_name(value), producer: id }.fail();
            }
            if node.outputs[slot] != value {
                orphaned.insert(node.outputs[slot]);
            }
        }

        let mut rewired_slots = HashSet::new();
        for &(id, slot, value) in &edit.input_rewires {
            ensure!(!removed.contains(&id), EditOnRemovedNodeSnafu { id });
            let len = self.node(id).context(UnknownNodeSnafu { id })?.inputs.len();
            ensure!(slot < len, InputSlotOutOfRangeSnafu { node: id, slot, len });
            if let Some(value) = value {
                self.check_ref(edit, value)?;
            }
            rewired_slots.insert((id, slot));
        }

        let mut staged_names = HashSet::new();
        for (name, _) in &edit.initializers {
            let fresh = self.value_by_name(name).is_none() && staged_names.insert(name.as_str());
            ensure!(fresh, DuplicateValueNameSnafu { name: name.clone() });
        }

        let pending = self.next_node_id();
        for (offset, spec) in edit.nodes.iter().enumerate() {
            let id = NodeId(pending.0 + offset as u32);
            for &value in spec.inputs.iter().flatten() {
                self.check_ref(edit, value)?;
            }
            for &value in &spec.outputs {
                self.check_claim(value, &removed, None)?;
                if claimed.insert(value, id).is_some() {
                    return ValueAlreadyProducedSnafu { value: self.value_name(value), producer: id }.fail();
                }
            }
        }

        // A value whose producer goes away must either be re-produced or have no readers left.
        for value in orphaned {
            if claimed.contains_key(&value) {
                continue;
            }
            let Some(info) = self.value(value) else { continue };
            let read_by_survivor = info
                .consumers()
                .iter()
                .any(|&(node, slot)| !removed.contains(&node) && !rewired_slots.contains(&(node, slot)));
            let read_by_rewire =
                edit.input_rewires.iter().any(|&(_, _, v)| v == Some(ValueRef::Existing(value)));
            let read_by_new_node =
                edit.nodes.iter().any(|spec| spec.inputs.contains(&Some(ValueRef::Existing(value))));
            ensure!(
                !(read_by_survivor || read_by_rewire || read_by_new_node || self.is_graph_output(value)),
                DanglingValueSnafu { value: info.name.clone() }
            );
        }

        Ok(())
    }

    /// Validate and commit `edit`.
    ///
    /// On error the graph is left untouched.
    pub fn apply_edit(&mut self, edit: GraphEdit) -> Result<EditOutcome> {
        self.validate_edit(&edit)?;
        Ok(self.commit(edit))
    }

    fn commit(&mut self, edit: GraphEdit) -> EditOutcome {
        let GraphEdit { removals, input_rewires, output_rewires, initializers, nodes } = edit;

        for &id in &removals {
            self.remove_node_unchecked(id);
        }

        let staged: Vec<ValueId> = initializers
            .into_iter()
            .map(|(name, tensor)| self.insert_initializer_unchecked(name, tensor))
            .collect();
        let resolve = |value: ValueRef| match value {
            ValueRef::Existing(id) => id,
            ValueRef::Staged(index) => staged[index],
        };

        for (node, slot, value) in output_rewires {
            self.set_output_unchecked(node, slot, value);
        }
        for (node, slot, value) in input_rewires {
            self.set_input_unchecked(node, slot, value.map(resolve));
        }

        let mut added = Vec::with_capacity(nodes.len());
        for spec in nodes {
            let id = self.next_node_id();
            let spec = NodeSpec {
                name: spec.name,
                op_type: spec.op_type,
                domain: spec.domain,
                since_version: spec.since_version,
                inputs: spec.inputs.into_iter().map(|input| input.map(resolve)).collect(),
                outputs: spec.outputs,
                attributes: spec.attributes,
                provider: spec.provider,
            };
            self.insert_node_unchecked(id, spec);
            added.push(id);
        }

        tracing::debug!(removed = removals.len(), added = added.len(), constants = staged.len(), "edit committed");
        EditOutcome { removed: removals, added, added_values: staged }
    }

    fn value_name(&self, id: ValueId) -> String {
        self.value(id).map(|info| info.name.clone()).unwrap_or_else(|| id.to_string())
    }
}
