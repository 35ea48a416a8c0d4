//! Scalar (primitive) types and their native sizes

use std::fmt;

/// Size in bytes of an address on the target platform.
///
/// `ref` slots, array handles and the `pointer` scalar all occupy one word.
pub const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// Alignment of an address on the target platform.
pub const POINTER_ALIGN: usize = std::mem::align_of::<usize>();

/// Primitive value types
///
/// Every scalar is naturally aligned: its alignment equals its size, which is
/// what the platform C ABI does for the matching C types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    /// `bool` (1 byte, 0 or 1)
    Bool,
    /// `byte` (signed 8-bit)
    Byte,
    /// `ubyte` (unsigned 8-bit)
    UByte,
    /// `short` (signed 16-bit)
    Short,
    /// `ushort` (unsigned 16-bit)
    UShort,
    /// `int` (signed 32-bit)
    Int,
    /// `uint` (unsigned 32-bit)
    UInt,
    /// `long` (signed 64-bit)
    Long,
    /// `ulong` (unsigned 64-bit)
    ULong,
    /// `float` (IEEE 754 single precision)
    Float,
    /// `double` (IEEE 754 double precision)
    Double,
    /// `pointer` (raw foreign address, never traced by the collector)
    Pointer,
}

impl Scalar {
    /// All scalar types, in declaration order
    pub const ALL: [Scalar; 12] = [
        Scalar::Bool,
        Scalar::Byte,
        Scalar::UByte,
        Scalar::Short,
        Scalar::UShort,
        Scalar::Int,
        Scalar::UInt,
        Scalar::Long,
        Scalar::ULong,
        Scalar::Float,
        Scalar::Double,
        Scalar::Pointer,
    ];

    /// Size in bytes
    pub const fn size(self) -> usize {
        match self {
            Scalar::Bool | Scalar::Byte | Scalar::UByte => 1,
            Scalar::Short | Scalar::UShort => 2,
            Scalar::Int | Scalar::UInt | Scalar::Float => 4,
            Scalar::Long | Scalar::ULong | Scalar::Double => 8,
            Scalar::Pointer => POINTER_SIZE,
        }
    }

    /// Natural alignment in bytes
    pub const fn align(self) -> usize {
        match self {
            Scalar::Pointer => POINTER_ALIGN,
            other => other.size(),
        }
    }

    /// Whether values of this type are stored as IEEE floats
    pub const fn is_float(self) -> bool {
        matches!(self, Scalar::Float | Scalar::Double)
    }

    /// Whether values of this type are sign-extended integers
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            Scalar::Byte | Scalar::Short | Scalar::Int | Scalar::Long
        )
    }

    /// Source-level name
    pub const fn name(self) -> &'static str {
        match self {
            Scalar::Bool => "bool",
            Scalar::Byte => "byte",
            Scalar::UByte => "ubyte",
            Scalar::Short => "short",
            Scalar::UShort => "ushort",
            Scalar::Int => "int",
            Scalar::UInt => "uint",
            Scalar::Long => "long",
            Scalar::ULong => "ulong",
            Scalar::Float => "float",
            Scalar::Double => "double",
            Scalar::Pointer => "pointer",
        }
    }

    /// Look up a scalar by its source-level name
    pub fn from_name(name: &str) -> Option<Scalar> {
        Scalar::ALL.iter().copied().find(|s| s.name() == name)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
