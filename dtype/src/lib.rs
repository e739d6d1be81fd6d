//! Tensor element types.
//!
//! Element types follow the ONNX `TensorProto.DataType` enumeration. The
//! quantization rewriter mostly cares about three properties of a type: its
//! bit width, whether it is signed, and whether it is a small integer type
//! that can carry quantized data (4, 8 or 16 bits).


use enumset::EnumSet;

/// Element type of a tensor.
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumCount, strum::EnumIter, strum::EnumString, strum::VariantArray)]
#[derive(enumset::EnumSetType)]
#[cfg_attr(any(test, feature = "proptest"), derive(proptest_derive::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[enumset(repr = "u32")]
#[strum(serialize_all = "lowercase")]
pub enum DType {
    Bool,

    Int4,
    UInt4,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,

    Float16,
    BFloat16,
    Float32,
    Float64,
}

/// Set of element types, used by selectors to describe what they accept.
pub type DTypeSet = EnumSet<DType>;

/// Width class of an integer type that can carry quantized values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantWidth {
    Bits4,
    Bits8,
    Bits16,
}

impl DType {
    /// Width of a single element in bits.
    pub const fn bits(&self) -> usize {
        match self {
            Self::Bool => 8,
            Self::Int4 | Self::UInt4 => 4,
            Self::Int8 | Self::UInt8 => 8,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 16,
            Self::Int32 | Self::UInt32 | Self::Float32 => 32,
            Self::Int64 | Self::UInt64 | Self::Float64 => 64,
        }
    }

    /// Storage size in bytes when elements are not packed (4-bit types round up to a byte).
    pub const fn bytes(&self) -> usize {
        self.bits().div_ceil(8)
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int4 | Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt4 | Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }

    /// Quantized width class, or `None` for types that never carry quantized data.
    pub const fn quant_width(&self) -> Option<QuantWidth> {
        match self {
            Self::Int4 | Self::UInt4 => Some(QuantWidth::Bits4),
            Self::Int8 | Self::UInt8 => Some(QuantWidth::Bits8),
            Self::Int16 | Self::UInt16 => Some(QuantWidth::Bits16),
            _ => None,
        }
    }

    pub const fn is_quantized(&self) -> bool {
        self.quant_width().is_some()
    }

    pub const fn is_4bit(&self) -> bool {
        matches!(self.quant_width(), Some(QuantWidth::Bits4))
    }

    pub const fn is_8bit(&self) -> bool {
        matches!(self.quant_width(), Some(QuantWidth::Bits8))
    }

    pub const fn is_16bit(&self) -> bool {
        matches!(self.quant_width(), Some(QuantWidth::Bits16))
    }

    /// Smallest representable integer value, `None` for non-integer types.
    pub const fn int_min(&self) -> Option<i64> {
        match self {
            Self::Int4 => Some(-8),
            Self::Int8 => Some(i8::MIN as i64),
            Self::Int16 => Some(i16::MIN as i64),
            Self::Int32 => Some(i32::MIN as i64),
            Self::Int64 => Some(i64::MIN),
            Self::UInt4 | Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64 => Some(0),
            _ => None,
        }
    }

    /// Largest representable integer value (saturated to `i64::MAX` for `UInt64`).
    pub const fn int_max(&self) -> Option<i64> {
        match self {
            Self::Int4 => Some(7),
            Self::UInt4 => Some(15),
            Self::Int8 => Some(i8::MAX as i64),
            Self::UInt8 => Some(u8::MAX as i64),
            Self::Int16 => Some(i16::MAX as i64),
            Self::UInt16 => Some(u16::MAX as i64),
            Self::Int32 => Some(i32::MAX as i64),
            Self::UInt32 => Some(u32::MAX as i64),
            Self::Int64 | Self::UInt64 => Some(i64::MAX),
            _ => None,
        }
    }

    /// Whether `value` fits in this integer type.
    pub fn contains_int(&self, value: i64) -> bool {
        match (self.int_min(), self.int_max()) {
            (Some(min), Some(max)) => (min..=max).contains(&value),
            _ => false,
        }
    }

    /// ONNX `TensorProto.DataType` code.
    pub const fn onnx_code(&self) -> i32 {
        match self {
            Self::Float32 => 1,
            Self::UInt8 => 2,
            Self::Int8 => 3,
            Self::UInt16 => 4,
            Self::Int16 => 5,
            Self::Int32 => 6,
            Self::Int64 => 7,
            Self::Bool => 9,
            Self::Float16 => 10,
            Self::Float64 => 11,
            Self::UInt32 => 12,
            Self::UInt64 => 13,
            Self::BFloat16 => 16,
            Self::UInt4 => 21,
            Self::Int4 => 22,
        }
    }

    /// Inverse of [`DType::onnx_code`].
    pub fn from_onnx_code(code: i32) -> Option<Self> {
        <Self as strum::VariantArray>::VARIANTS.iter().copied().find(|dtype| dtype.onnx_code() == code)
    }

    /// All quantizable integer types.
    pub fn quantized_types() -> DTypeSet {
        Self::Int4 | Self::UInt4 | Self::Int8 | Self::UInt8 | Self::Int16 | Self::UInt16
    }
}
