//! Operator nodes.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::{ExecutionProvider, ValueId};

/// Default ONNX operator domain.
pub const ONNX_DOMAIN: &str = "";
/// Domain of the contrib operators (fused and quantized kernels).
pub const MS_DOMAIN: &str = "com.microsoft";

/// Arena index of a node. Ids are never reused within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[display("n{_0}")]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Node attribute value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Attribute {
    Int(i64),
    Float(f32),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    String(String),
}

impl Attribute {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Self::Ints(v) => Some(v),
            _ => None,
        }
    }
}

pub type Attributes = BTreeMap<String, Attribute>;

/// An operator node.
///
/// Optional inputs that are not provided are kept as `None` so that slot
/// positions stay meaningful (ONNX encodes them as empty names).
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op_type: String,
    pub domain: String,
    /// Opset version the node's operator schema was introduced in.
    pub since_version: u32,
    pub inputs: SmallVec<[Option<ValueId>; 4]>,
    pub outputs: SmallVec<[ValueId; 1]>,
    pub attributes: Attributes,
    pub provider: ExecutionProvider,
}

impl Node {
    pub fn input(&self, slot: usize) -> Option<ValueId> {
        self.inputs.get(slot).copied().flatten()
    }

    pub fn output(&self, slot: usize) -> Option<ValueId> {
        self.outputs.get(slot).copied()
    }

    /// Number of input slots that are actually connected.
    pub fn connected_inputs(&self) -> usize {
        self.inputs.iter().filter(|input| input.is_some()).count()
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn int_attribute(&self, name: &str) -> Option<i64> {
        self.attribute(name).and_then(Attribute::as_int)
    }

    pub fn is_op(&self, op_type: &str, domain: &str) -> bool {
        self.op_type == op_type && self.domain == domain
    }
}

/// Description of a node to create.
///
/// `V` is the value handle type: plain [`ValueId`] when adding directly to a
/// graph, [`crate::ValueRef`] when staging inside a [`crate::GraphEdit`].
#[derive(Debug, Clone, PartialEq, bon::Builder)]
#[builder(on(String, into))]
pub struct NodeSpec<V = ValueId> {
    pub name: String,
    pub op_type: String,
    #[builder(default)]
    pub domain: String,
    #[builder(default = 1)]
    pub since_version: u32,
    #[builder(default)]
    pub inputs: Vec<Option<V>>,
    #[builder(default)]
    pub outputs: Vec<ValueId>,
    #[builder(default)]
    pub attributes: Attributes,
    #[builder(default)]
    pub provider: ExecutionProvider,
}
