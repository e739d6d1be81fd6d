//! Constant tensors (graph initializers).
//!
//! Integer tensors of every width keep one unpacked `i64` per element so that
//! 4-bit data can be inspected without bit twiddling. Already-packed byte
//! payloads, such as the weights of a block-quantized matmul, use
//! [`TensorData::Bytes`].

use qfuse_dtype::DType;
use smallvec::SmallVec;
use snafu::ensure;

use crate::error::{IntOutOfRangeSnafu, PayloadTypeSnafu, Result, TensorLengthSnafu};

pub type Dims = SmallVec<[usize; 4]>;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TensorData {
    Float(Vec<f32>),
    Int(Vec<i64>),
    Bytes(Vec<u8>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Int(_) => "int",
            Self::Bytes(_) => "bytes",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tensor {
    dtype: DType,
    dims: Dims,
    data: TensorData,
}

impl Tensor {
    /// Create a tensor, checking that the payload matches `dtype` and `dims`.
    pub fn new(dtype: DType, dims: &[usize], data: TensorData) -> Result<Self> {
        let dims = Dims::from_slice(dims);
        let expected: usize = dims.iter().product();
        ensure!(data.len() == expected, TensorLengthSnafu { expected, actual: data.len() });

        match &data {
            TensorData::Float(_) => ensure!(dtype.is_float(), PayloadTypeSnafu { dtype, payload: data.kind() }),
            TensorData::Int(values) => {
                ensure!(dtype.is_int() || dtype.is_bool(), PayloadTypeSnafu { dtype, payload: data.kind() });
                if let Some(&value) = values.iter().find(|&&v| !dtype.is_bool() && !dtype.contains_int(v)) {
                    return IntOutOfRangeSnafu { dtype, value }.fail();
                }
            }
            TensorData::Bytes(_) => ensure!(dtype == DType::UInt8, PayloadTypeSnafu { dtype, payload: data.kind() }),
        }

        Ok(Self { dtype, dims, data })
    }

    pub fn from_f32(dims: &[usize], values: Vec<f32>) -> Result<Self> {
        Self::new(DType::Float32, dims, TensorData::Float(values))
    }

    pub fn from_ints(dtype: DType, dims: &[usize], values: Vec<i64>) -> Result<Self> {
        Self::new(dtype, dims, TensorData::Int(values))
    }

    pub fn from_bytes(dims: &[usize], bytes: Vec<u8>) -> Result<Self> {
        Self::new(DType::UInt8, dims, TensorData::Bytes(bytes))
    }

    pub fn scalar_f32(value: f32) -> Self {
        Self { dtype: DType::Float32, dims: Dims::new(), data: TensorData::Float(vec![value]) }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn is_scalar(&self) -> bool {
        self.numel() == 1
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::Float(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::Int(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            TensorData::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Integer element at `index` for both unpacked and byte payloads.
    pub fn int_at(&self, index: usize) -> Option<i64> {
        match &self.data {
            TensorData::Int(values) => values.get(index).copied(),
            TensorData::Bytes(bytes) => bytes.get(index).map(|&b| b as i64),
            TensorData::Float(_) => None,
        }
    }

    pub fn f32_at(&self, index: usize) -> Option<f32> {
        self.as_f32().and_then(|values| values.get(index).copied())
    }
}
