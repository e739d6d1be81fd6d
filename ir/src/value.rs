//! Values (tensors flowing along graph edges).

use qfuse_dtype::DType;
use smallvec::SmallVec;

use crate::NodeId;
use crate::tensor::Dims;

/// Arena index of a value. Ids are never reused within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[display("v{_0}")]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Fed by the caller at run time.
    GraphInput,
    /// Constant tensor stored in the graph.
    Initializer,
    /// Produced by a node (or currently by nothing, after a removal).
    Intermediate,
}

/// Static information about a value plus its edge bookkeeping.
#[derive(Debug, Clone)]
pub struct ValueInfo {
    pub name: String,
    pub dtype: DType,
    pub shape: Option<Dims>,
    pub kind: ValueKind,
    pub(crate) producer: Option<(NodeId, usize)>,
    pub(crate) consumers: SmallVec<[(NodeId, usize); 2]>,
}

impl ValueInfo {
    pub(crate) fn new(name: String, dtype: DType, shape: Option<Dims>, kind: ValueKind) -> Self {
        Self { name, dtype, shape, kind, producer: None, consumers: SmallVec::new() }
    }

    /// Producing node and its output slot.
    pub fn producer(&self) -> Option<(NodeId, usize)> {
        self.producer
    }

    /// Consuming nodes and the input slot they read this value at.
    pub fn consumers(&self) -> &[(NodeId, usize)] {
        &self.consumers
    }

    pub fn is_constant(&self) -> bool {
        self.kind == ValueKind::Initializer
    }

    pub(crate) fn is_producible(&self) -> bool {
        self.kind == ValueKind::Intermediate
    }
}
