//! TFLite model files: a writer for exported classifiers and a
//! bounds-checked reader used for verification.
//!
//! Field and enum numbering follows the TFLite flatbuffer schema
//! (`schema.fbs`, version 3).

pub mod reader;
pub mod writer;

use serde::{Deserialize, Serialize};

/// File identifier stored at bytes 4..8 of every TFLite model.
pub const FILE_IDENTIFIER: &str = "TFL3";
pub const SCHEMA_VERSION: u32 = 3;

/// `TensorType` from the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i8)]
pub enum TensorType {
    Float32,
    Float16,
    Int32,
    Uint8,
    Int64,
    String,
    Bool,
    Int16,
    Complex64,
    Int8,
    Float64,
    Complex128,
    Uint64,
    Resource,
    Variant,
    Uint32,
    Uint16,
    Int4,
}

impl TensorType {
    #[must_use]
    pub fn from_code(code: i8) -> Option<Self> {
        let ty = match code {
            0 => Self::Float32,
            1 => Self::Float16,
            2 => Self::Int32,
            3 => Self::Uint8,
            4 => Self::Int64,
            5 => Self::String,
            6 => Self::Bool,
            7 => Self::Int16,
            8 => Self::Complex64,
            9 => Self::Int8,
            10 => Self::Float64,
            11 => Self::Complex128,
            12 => Self::Uint64,
            13 => Self::Resource,
            14 => Self::Variant,
            15 => Self::Uint32,
            16 => Self::Uint16,
            17 => Self::Int4,
            _ => return None,
        };
        Some(ty)
    }

    #[must_use]
    pub fn code(self) -> i8 {
        self as i8
    }

    /// Size of one element in bytes, for types with a fixed width.
    #[must_use]
    pub fn element_size(self) -> Option<usize> {
        match self {
            Self::Bool | Self::Int8 | Self::Uint8 => Some(1),
            Self::Float16 | Self::Int16 | Self::Uint16 => Some(2),
            Self::Float32 | Self::Int32 | Self::Uint32 => Some(4),
            Self::Float64 | Self::Int64 | Self::Uint64 | Self::Complex64 => Some(8),
            Self::Complex128 => Some(16),
            Self::String | Self::Resource | Self::Variant | Self::Int4 => None,
        }
    }
}

impl std::fmt::Display for TensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Float32 => "float32",
            Self::Float16 => "float16",
            Self::Int32 => "int32",
            Self::Uint8 => "uint8",
            Self::Int64 => "int64",
            Self::String => "string",
            Self::Bool => "bool",
            Self::Int16 => "int16",
            Self::Complex64 => "complex64",
            Self::Int8 => "int8",
            Self::Float64 => "float64",
            Self::Complex128 => "complex128",
            Self::Uint64 => "uint64",
            Self::Resource => "resource",
            Self::Variant => "variant",
            Self::Uint32 => "uint32",
            Self::Uint16 => "uint16",
            Self::Int4 => "int4",
        };
        f.write_str(name)
    }
}

/// `BuiltinOperator` codes used by exported classifiers.
pub mod builtin_op {
    pub const ADD: i32 = 0;
    pub const CONV_2D: i32 = 3;
    pub const DEPTHWISE_CONV_2D: i32 = 4;
    pub const FULLY_CONNECTED: i32 = 9;
    pub const SOFTMAX: i32 = 25;
    pub const PAD: i32 = 34;
    pub const MEAN: i32 = 40;
}

/// `BuiltinOptions` union discriminants.
pub mod builtin_options {
    pub const CONV_2D: u8 = 1;
    pub const DEPTHWISE_CONV_2D: u8 = 2;
    pub const FULLY_CONNECTED: u8 = 8;
    pub const SOFTMAX: u8 = 9;
    pub const ADD: u8 = 11;
    pub const PAD: u8 = 22;
    pub const REDUCER: u8 = 27;
}

/// `Padding` enum.
pub const PADDING_SAME: i8 = 0;
pub const PADDING_VALID: i8 = 1;

/// `ActivationFunctionType` enum.
pub const ACTIVATION_NONE: i8 = 0;
pub const ACTIVATION_RELU6: i8 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_type_codes_round_trip() {
        for code in 0..=17 {
            let ty = TensorType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
        }
        assert!(TensorType::from_code(18).is_none());
        assert!(TensorType::from_code(-1).is_none());
    }

    #[test]
    fn test_tensor_type_names() {
        assert_eq!(TensorType::Float32.to_string(), "float32");
        assert_eq!(TensorType::Uint8.to_string(), "uint8");
        assert_eq!(TensorType::Float32.element_size(), Some(4));
    }
}
