//! Numeric element types that an index can store.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Tag identifying the element type of a saved index.
///
/// The discriminants are written into every index header and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Int8 = 0,
    Int16 = 1,
    Int32 = 2,
    Int64 = 3,
    UInt8 = 4,
    UInt16 = 5,
    UInt32 = 6,
    UInt64 = 7,
    Float32 = 8,
    Float64 = 9,
}

impl ElementType {
    /// The persisted tag value.
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Decode a persisted tag, returning `None` for unknown values.
    pub fn from_tag(tag: u32) -> Option<Self> {
        let ty = match tag {
            0 => ElementType::Int8,
            1 => ElementType::Int16,
            2 => ElementType::Int32,
            3 => ElementType::Int64,
            4 => ElementType::UInt8,
            5 => ElementType::UInt16,
            6 => ElementType::UInt32,
            7 => ElementType::UInt64,
            8 => ElementType::Float32,
            9 => ElementType::Float64,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Int8 => "i8",
            ElementType::Int16 => "i16",
            ElementType::Int32 => "i32",
            ElementType::Int64 => "i64",
            ElementType::UInt8 => "u8",
            ElementType::UInt16 => "u16",
            ElementType::UInt32 => "u32",
            ElementType::UInt64 => "u64",
            ElementType::Float32 => "f32",
            ElementType::Float64 => "f64",
        };
        f.write_str(name)
    }
}

/// A scalar that can be stored in an index.
///
/// Distances are always computed in `f32`, so every element converts to it.
pub trait Element:
    Copy + Default + Send + Sync + PartialEq + fmt::Debug + Serialize + DeserializeOwned + 'static
{
    /// Tag written to the header of saved indexes holding this type.
    const TYPE: ElementType;

    fn to_f32(self) -> f32;
}

macro_rules! impl_element {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const TYPE: ElementType = ElementType::$tag;

                #[inline]
                fn to_f32(self) -> f32 {
                    self as f32
                }
            }
        )*
    };
}

impl_element! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
}
