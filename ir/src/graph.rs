//! Arena-backed operator graph.
//!
//! Nodes and values live in append-only tables indexed by [`NodeId`] and
//! [`ValueId`]. Removing a node leaves a tombstone, so ids held by in-flight
//! matches can never alias a different node. Every value records its producer
//! `(node, output slot)` and its consumers `(node, input slot)`; all mutation
//! goes through methods that keep both sides of an edge in sync.

use std::collections::{HashMap, HashSet};

use qfuse_dtype::DType;
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use crate::error::*;
use crate::tensor::{Dims, Tensor};
use crate::value::{ValueInfo, ValueKind};
use crate::{Node, NodeId, NodeSpec, ValueId};

#[derive(Debug, Clone, Default)]
pub struct Graph {
    name: String,
    nodes: Vec<Option<Node>>,
    values: Vec<ValueInfo>,
    names: HashMap<String, ValueId>,
    initializers: HashMap<ValueId, Tensor>,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
    live_nodes: usize,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Declare an intermediate value (to be produced by a node).
    pub fn add_value(&mut self, name: impl Into<String>, dtype: DType, shape: Option<&[usize]>) -> Result<ValueId> {
        self.push_value(name.into(), dtype, shape.map(Dims::from_slice), ValueKind::Intermediate)
    }

    /// Declare a graph input.
    pub fn add_input(&mut self, name: impl Into<String>, dtype: DType, shape: Option<&[usize]>) -> Result<ValueId> {
        let id = self.push_value(name.into(), dtype, shape.map(Dims::from_slice), ValueKind::GraphInput)?;
        self.inputs.push(id);
        Ok(id)
    }

    /// Store a constant tensor and return the value that carries it.
    pub fn add_initializer(&mut self, name: impl Into<String>, tensor: Tensor) -> Result<ValueId> {
        let shape = Some(Dims::from_slice(tensor.dims()));
        let id = self.push_value(name.into(), tensor.dtype(), shape, ValueKind::Initializer)?;
        self.initializers.insert(id, tensor);
        Ok(id)
    }

    pub fn mark_output(&mut self, value: ValueId) -> Result<()> {
        self.value(value).context(UnknownValueSnafu { id: value })?;
        if !self.outputs.contains(&value) {
            self.outputs.push(value);
        }
        Ok(())
    }

    fn push_value(&mut self, name: String, dtype: DType, shape: Option<Dims>, kind: ValueKind) -> Result<ValueId> {
        ensure!(!self.names.contains_key(&name), DuplicateValueNameSnafu { name });
        Ok(self.push_value_unchecked(name, dtype, shape, kind))
    }

    fn push_value_unchecked(&mut self, name: String, dtype: DType, shape: Option<Dims>, kind: ValueKind) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.names.insert(name.clone(), id);
        self.values.push(ValueInfo::new(name, dtype, shape, kind));
        id
    }

    /// Store a constant whose name was validated by the caller.
    pub(crate) fn insert_initializer_unchecked(&mut self, name: String, tensor: Tensor) -> ValueId {
        let shape = Some(Dims::from_slice(tensor.dims()));
        let id = self.push_value_unchecked(name, tensor.dtype(), shape, ValueKind::Initializer);
        self.initializers.insert(id, tensor);
        id
    }

    pub fn value(&self, id: ValueId) -> Option<&ValueInfo> {
        self.values.get(id.index())
    }

    pub fn value_by_name(&self, name: &str) -> Option<ValueId> {
        self.names.get(name).copied()
    }

    pub fn dtype_of(&self, id: ValueId) -> Option<DType> {
        self.value(id).map(|info| info.dtype)
    }

    pub fn initializer(&self, id: ValueId) -> Option<&Tensor> {
        self.initializers.get(&id)
    }

    pub fn is_graph_input(&self, id: ValueId) -> bool {
        self.inputs.contains(&id)
    }

    pub fn is_graph_output(&self, id: ValueId) -> bool {
        self.outputs.contains(&id)
    }

    pub fn graph_inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn graph_outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// First name of the form `base`, `base_1`, `base_2`, ... not yet taken.
    pub fn unique_value_name(&self, base: &str) -> String {
        if !self.names.contains_key(base) {
            return base.to_string();
        }
        (1..).map(|i| format!("{base}_{i}")).find(|name| !self.names.contains_key(name)).unwrap_or_default()
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.live_nodes
    }

    /// Live node ids in ascending (creation) order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes().map(|node| node.id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    /// Id the next created node will receive.
    pub fn next_node_id(&self) -> NodeId {
        NodeId(self.nodes.len() as u32)
    }

    pub fn add_node(&mut self, spec: NodeSpec) -> Result<NodeId> {
        let id = self.next_node_id();
        for &input in spec.inputs.iter().flatten() {
            self.value(input).context(UnknownValueSnafu { id: input })?;
        }
        let mut claimed = HashSet::new();
        for &output in &spec.outputs {
            let info = self.value(output).context(UnknownValueSnafu { id: output })?;
            ensure!(info.is_producible(), ValueNotProducibleSnafu { value: info.name.clone() });
            if let Some((producer, _)) = info.producer {
                return ValueAlreadyProducedSnafu { value: info.name.clone(), producer }.fail();
            }
            ensure!(claimed.insert(output), ValueAlreadyProducedSnafu { value: info.name.clone(), producer: id });
        }

        self.insert_node_unchecked(id, spec);
        Ok(id)
    }

    /// Insert a node whose edges were validated by the caller.
    pub(crate) fn insert_node_unchecked(&mut self, id: NodeId, spec: NodeSpec) {
        debug_assert_eq!(id, self.next_node_id());
        let node = Node {
            id,
            name: spec.name,
            op_type: spec.op_type,
            domain: spec.domain,
            since_version: spec.since_version,
            inputs: spec.inputs.into_iter().collect(),
            outputs: spec.outputs.into_iter().collect(),
            attributes: spec.attributes,
            provider: spec.provider,
        };
        for (slot, input) in node.inputs.iter().enumerate() {
            if let Some(input) = input {
                self.values[input.index()].consumers.push((id, slot));
            }
        }
        for (slot, output) in node.outputs.iter().enumerate() {
            self.values[output.index()].producer = Some((id, slot));
        }
        tracing::trace!(node.id = %id, node.op = %node.op_type, "node added");
        self.nodes.push(Some(node));
        self.live_nodes += 1;
    }

    /// Remove a node and detach all its edges.
    ///
    /// Values the node produced keep their other consumers; it is up to the
    /// caller to give them a new producer (see [`crate::GraphEdit`] for the
    /// checked variant).
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        ensure!(self.contains(id), UnknownNodeSnafu { id });
        Ok(self.remove_node_unchecked(id))
    }

    pub(crate) fn remove_node_unchecked(&mut self, id: NodeId) -> Node {
        let node = self.nodes[id.index()].take().unwrap_or_else(|| unreachable!("node {id} validated as live"));
        for (slot, input) in node.inputs.iter().enumerate() {
            if let Some(input) = input {
                self.detach_consumer(*input, id, slot);
            }
        }
        for output in &node.outputs {
            self.values[output.index()].producer = None;
        }
        self.live_nodes -= 1;
        tracing::trace!(node.id = %id, node.op = %node.op_type, "node removed");
        node
    }

    /// Point input `slot` of `node` at `value` (or disconnect it).
    pub fn set_input(&mut self, node: NodeId, slot: usize, value: Option<ValueId>) -> Result<()> {
        let len = self.node(node).context(UnknownNodeSnafu { id: node })?.inputs.len();
        ensure!(slot < len, InputSlotOutOfRangeSnafu { node, slot, len });
        if let Some(value) = value {
            self.value(value).context(UnknownValueSnafu { id: value })?;
        }
        self.set_input_unchecked(node, slot, value);
        Ok(())
    }

    pub(crate) fn set_input_unchecked(&mut self, node: NodeId, slot: usize, value: Option<ValueId>) {
        let Some(target) = self.nodes[node.index()].as_mut() else { return };
        let previous = std::mem::replace(&mut target.inputs[slot], value);
        if let Some(previous) = previous {
            self.detach_consumer(previous, node, slot);
        }
        if let Some(value) = value {
            self.values[value.index()].consumers.push((node, slot));
        }
    }

    /// Make `node` produce `value` at output `slot`; the previous output value loses its producer.
    pub fn set_output(&mut self, node: NodeId, slot: usize, value: ValueId) -> Result<()> {
        let len = self.node(node).context(UnknownNodeSnafu { id: node })?.outputs.len();
        ensure!(slot < len, OutputSlotOutOfRangeSnafu { node, slot, len });
        let info = self.value(value).context(UnknownValueSnafu { id: value })?;
        ensure!(info.is_producible(), ValueNotProducibleSnafu { value: info.name.clone() });
        if let Some((producer, producer_slot)) = info.producer
            && (producer, producer_slot) != (node, slot)
        {
            return ValueAlreadyProducedSnafu { value: info.name.clone(), producer }.fail();
        }
        self.set_output_unchecked(node, slot, value);
        Ok(())
    }

    pub(crate) fn set_output_unchecked(&mut self, node: NodeId, slot: usize, value: ValueId) {
        let Some(target) = self.nodes[node.index()].as_mut() else { return };
        let previous = std::mem::replace(&mut target.outputs[slot], value);
        if self.values[previous.index()].producer == Some((node, slot)) {
            self.values[previous.index()].producer = None;
        }
        self.values[value.index()].producer = Some((node, slot));
    }

    fn detach_consumer(&mut self, value: ValueId, node: NodeId, slot: usize) {
        let consumers = &mut self.values[value.index()].consumers;
        if let Some(pos) = consumers.iter().position(|&edge| edge == (node, slot)) {
            consumers.remove(pos);
        }
    }

    // =========================================================================
    // Neighborhood queries
    // =========================================================================

    pub fn producer(&self, value: ValueId) -> Option<NodeId> {
        self.value(value).and_then(|info| info.producer).map(|(node, _)| node)
    }

    /// Distinct consumer nodes of `value` in ascending id order.
    pub fn consumers(&self, value: ValueId) -> SmallVec<[NodeId; 2]> {
        let mut nodes: SmallVec<[NodeId; 2]> =
            self.value(value).map(|info| info.consumers.iter().map(|&(node, _)| node).collect()).unwrap_or_default();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    /// Node producing input `slot` of `node`.
    pub fn input_producer(&self, node: NodeId, slot: usize) -> Option<&Node> {
        let value = self.node(node)?.input(slot)?;
        self.producer(value).and_then(|id| self.node(id))
    }

    /// Nodes consuming output `slot` of `node`.
    pub fn output_consumers(&self, node: NodeId, slot: usize) -> SmallVec<[NodeId; 2]> {
        self.node(node).and_then(|n| n.output(slot)).map(|value| self.consumers(value)).unwrap_or_default()
    }

    pub fn produces_graph_output(&self, node: NodeId) -> bool {
        self.node(node).is_some_and(|n| n.outputs.iter().any(|&v| self.is_graph_output(v)))
    }

    // =========================================================================
    // Consistency
    // =========================================================================

    /// Check that producer/consumer bookkeeping agrees with node edges.
    pub fn verify(&self) -> Result<()> {
        let mut expected_consumers: HashMap<ValueId, Vec<(NodeId, usize)>> = HashMap::new();
        for node in self.nodes() {
            for (slot, input) in node.inputs.iter().enumerate() {
                if let Some(input) = input {
                    let info = self.value(*input).context(UnknownValueSnafu { id: *input })?;
                    let readable = info.producer.is_some() || info.kind != ValueKind::Intermediate;
                    ensure!(
                        readable,
                        InconsistentSnafu { reason: format!("{} reads '{}' which has no producer", node.id, info.name) }
                    );
                    expected_consumers.entry(*input).or_default().push((node.id, slot));
                }
            }
            for (slot, output) in node.outputs.iter().enumerate() {
                let info = self.value(*output).context(UnknownValueSnafu { id: *output })?;
                ensure!(
                    info.producer == Some((node.id, slot)),
                    InconsistentSnafu { reason: format!("'{}' does not record {} as producer", info.name, node.id) }
                );
            }
        }

        for (index, info) in self.values.iter().enumerate() {
            let id = ValueId(index as u32);
            let mut actual = info.consumers.to_vec();
            let mut expected = expected_consumers.remove(&id).unwrap_or_default();
            actual.sort_unstable();
            expected.sort_unstable();
            ensure!(
                actual == expected,
                InconsistentSnafu { reason: format!("consumer list of '{}' is stale", info.name) }
            );
            if let Some((producer, _)) = info.producer {
                ensure!(
                    self.contains(producer),
                    InconsistentSnafu { reason: format!("'{}' is produced by removed node {producer}", info.name) }
                );
            }
        }

        for &output in &self.outputs {
            let info = self.value(output).context(UnknownValueSnafu { id: output })?;
            ensure!(
                info.producer.is_some() || info.kind != ValueKind::Intermediate,
                InconsistentSnafu { reason: format!("graph output '{}' has no producer", info.name) }
            );
        }
        Ok(())
    }
}
