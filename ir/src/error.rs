use qfuse_dtype::DType;
use snafu::Snafu;

use crate::{NodeId, ValueId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Node id does not refer to a live node.
    #[snafu(display("unknown node {id}"))]
    UnknownNode { id: NodeId },

    /// Value id is not part of the graph.
    #[snafu(display("unknown value {id}"))]
    UnknownValue { id: ValueId },

    /// Staged value handle points past the staged initializers of an edit.
    #[snafu(display("staged value #{index} does not exist in the edit"))]
    UnknownStagedValue { index: usize },

    /// Value names are graph-wide unique.
    #[snafu(display("value name '{name}' is already taken"))]
    DuplicateValueName { name: String },

    #[snafu(display("input slot {slot} out of range for node {node} with {len} inputs"))]
    InputSlotOutOfRange { node: NodeId, slot: usize, len: usize },

    #[snafu(display("output slot {slot} out of range for node {node} with {len} outputs"))]
    OutputSlotOutOfRange { node: NodeId, slot: usize, len: usize },

    /// A value can only have one producer.
    #[snafu(display("value '{value}' is already produced by node {producer}"))]
    ValueAlreadyProduced { value: String, producer: NodeId },

    /// Graph inputs and constants cannot be node outputs.
    #[snafu(display("value '{value}' is a graph input or constant and cannot be produced by a node"))]
    ValueNotProducible { value: String },

    /// An edit would leave a live reader of a value that no longer has a producer.
    #[snafu(display("edit leaves value '{value}' without a producer while it is still read"))]
    DanglingValue { value: String },

    #[snafu(display("node {id} is removed twice by the same edit"))]
    DuplicateRemoval { id: NodeId },

    #[snafu(display("edit touches node {id} which the same edit removes"))]
    EditOnRemovedNode { id: NodeId },

    #[snafu(display("tensor payload has {actual} elements but shape needs {expected}"))]
    TensorLength { expected: usize, actual: usize },

    #[snafu(display("value {value} does not fit in {dtype}"))]
    IntOutOfRange { dtype: DType, value: i64 },

    #[snafu(display("{payload} payload cannot hold {dtype} data"))]
    PayloadType { dtype: DType, payload: &'static str },

    #[snafu(display("graph has a cycle; {remaining} nodes could not be ordered"))]
    Cycle { remaining: usize },

    /// Internal producer/consumer bookkeeping disagrees with node edges.
    #[snafu(display("graph is inconsistent: {reason}"))]
    Inconsistent { reason: String },
}
