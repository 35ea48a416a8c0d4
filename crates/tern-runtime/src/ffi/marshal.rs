//! Value marshalling at raw addresses
//!
//! Loads and stores of scalars and references at byte addresses, plus the
//! conversion of values into C-ABI argument words. Every access is
//! unaligned-safe so the same code serves packed records, frame storage and
//! foreign buffers.

use crate::gc::GcRef;
use crate::value::Value;
use std::marker::PhantomData;
use tern_layout::{Scalar, POINTER_SIZE};
use thiserror::Error;

/// Errors that can occur during marshalling
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MarshalError {
    /// Value kind does not fit the destination
    #[error("Cannot store a {found} value into {expected} storage")]
    TypeMismatch {
        /// Destination kind
        expected: &'static str,
        /// Value kind
        found: &'static str,
    },

    /// Aggregates cannot be passed by value
    #[error("`{what}` is an aggregate and cannot be passed by value")]
    Unmarshallable {
        /// Description of the value
        what: String,
    },
}

/// Raw address of a reference, as a foreign function receives it
pub fn to_foreign(r: Option<GcRef>) -> *mut u8 {
    r.map_or(std::ptr::null_mut(), GcRef::as_ptr)
}

/// Check that `value` can be stored into `scalar` storage
pub fn check_scalar(scalar: Scalar, value: Value) -> Result<(), MarshalError> {
    let fits = match scalar {
        Scalar::Bool => value.as_bool().is_some(),
        Scalar::Float | Scalar::Double => value.as_f64().is_some(),
        Scalar::Pointer => matches!(value, Value::UInt(_) | Value::Ref(_)),
        _ => value.as_i64().is_some(),
    };
    if fits {
        Ok(())
    } else {
        Err(MarshalError::TypeMismatch {
            expected: scalar.name(),
            found: value.kind_name(),
        })
    }
}

/// Load a scalar stored at `addr`
///
/// # Safety
///
/// `addr` must be valid for reads of `scalar.size()` bytes.
pub unsafe fn load_scalar(addr: *const u8, scalar: Scalar) -> Value {
    match scalar {
        Scalar::Bool => Value::Bool(addr.read() != 0),
        Scalar::Byte => Value::Int((addr as *const i8).read_unaligned() as i64),
        Scalar::UByte => Value::UInt(addr.read() as u64),
        Scalar::Short => Value::Int((addr as *const i16).read_unaligned() as i64),
        Scalar::UShort => Value::UInt((addr as *const u16).read_unaligned() as u64),
        Scalar::Int => Value::Int((addr as *const i32).read_unaligned() as i64),
        Scalar::UInt => Value::UInt((addr as *const u32).read_unaligned() as u64),
        Scalar::Long => Value::Int((addr as *const i64).read_unaligned()),
        Scalar::ULong => Value::UInt((addr as *const u64).read_unaligned()),
        Scalar::Float => Value::Float((addr as *const f32).read_unaligned() as f64),
        Scalar::Double => Value::Float((addr as *const f64).read_unaligned()),
        Scalar::Pointer => Value::UInt((addr as *const usize).read_unaligned() as u64),
    }
}

/// Store a scalar at `addr`; integers are truncated to the scalar's width
///
/// # Safety
///
/// `addr` must be valid for writes of `scalar.size()` bytes.
pub unsafe fn store_scalar(addr: *mut u8, scalar: Scalar, value: Value) -> Result<(), MarshalError> {
    let mismatch = || MarshalError::TypeMismatch {
        expected: scalar.name(),
        found: value.kind_name(),
    };
    match scalar {
        Scalar::Bool => addr.write(value.as_bool().ok_or_else(mismatch)? as u8),
        Scalar::Float => {
            let v = value.as_f64().ok_or_else(mismatch)?;
            (addr as *mut f32).write_unaligned(v as f32);
        }
        Scalar::Double => {
            let v = value.as_f64().ok_or_else(mismatch)?;
            (addr as *mut f64).write_unaligned(v);
        }
        Scalar::Pointer => {
            let word = match value {
                Value::UInt(v) => v as usize,
                Value::Ref(r) => to_foreign(r) as usize,
                _ => return Err(mismatch()),
            };
            (addr as *mut usize).write_unaligned(word);
        }
        _ => {
            let v = value.as_i64().ok_or_else(mismatch)?;
            match scalar.size() {
                1 => addr.write(v as u8),
                2 => (addr as *mut u16).write_unaligned(v as u16),
                4 => (addr as *mut u32).write_unaligned(v as u32),
                _ => (addr as *mut u64).write_unaligned(v as u64),
            }
        }
    }
    Ok(())
}

/// Load a reference word
///
/// # Safety
///
/// `addr` must be valid for reads of one pointer.
pub unsafe fn load_ref(addr: *const u8) -> Option<GcRef> {
    GcRef::from_addr((addr as *const usize).read_unaligned())
}

/// Store a reference word
///
/// # Safety
///
/// `addr` must be valid for writes of one pointer.
pub unsafe fn store_ref(addr: *mut u8, r: Option<GcRef>) {
    (addr as *mut usize).write_unaligned(to_foreign(r) as usize);
}

/// One C-ABI argument
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ForeignArg {
    /// `int8_t`
    I8(i8),
    /// `uint8_t` (also `bool`)
    U8(u8),
    /// `int16_t`
    I16(i16),
    /// `uint16_t`
    U16(u16),
    /// `int32_t`
    I32(i32),
    /// `uint32_t`
    U32(u32),
    /// `int64_t`
    I64(i64),
    /// `uint64_t`
    U64(u64),
    /// `float`
    F32(f32),
    /// `double`
    F64(f64),
    /// Any pointer, including `ref T`
    Pointer(*mut u8),
}

impl ForeignArg {
    /// Convert a scalar value
    pub fn from_scalar(scalar: Scalar, value: Value) -> Result<Self, MarshalError> {
        let mismatch = || MarshalError::TypeMismatch {
            expected: scalar.name(),
            found: value.kind_name(),
        };
        let int = || value.as_i64().ok_or_else(mismatch);
        Ok(match scalar {
            Scalar::Bool => ForeignArg::U8(value.as_bool().ok_or_else(mismatch)? as u8),
            Scalar::Byte => ForeignArg::I8(int()? as i8),
            Scalar::UByte => ForeignArg::U8(int()? as u8),
            Scalar::Short => ForeignArg::I16(int()? as i16),
            Scalar::UShort => ForeignArg::U16(int()? as u16),
            Scalar::Int => ForeignArg::I32(int()? as i32),
            Scalar::UInt => ForeignArg::U32(int()? as u32),
            Scalar::Long => ForeignArg::I64(int()?),
            Scalar::ULong => ForeignArg::U64(int()? as u64),
            Scalar::Float => ForeignArg::F32(value.as_f64().ok_or_else(mismatch)? as f32),
            Scalar::Double => ForeignArg::F64(value.as_f64().ok_or_else(mismatch)?),
            Scalar::Pointer => match value {
                Value::UInt(v) => ForeignArg::Pointer(v as usize as *mut u8),
                Value::Ref(r) => ForeignArg::Pointer(to_foreign(r)),
                _ => return Err(mismatch()),
            },
        })
    }

    /// Convert a reference
    pub fn from_ref(r: Option<GcRef>) -> Self {
        ForeignArg::Pointer(to_foreign(r))
    }

    /// Whether the argument travels in a floating-point register
    pub fn is_float(&self) -> bool {
        matches!(self, ForeignArg::F32(_) | ForeignArg::F64(_))
    }

    /// Register image: integers sign- or zero-extended, floats as raw bits
    pub fn to_word(&self) -> u64 {
        match *self {
            ForeignArg::I8(v) => v as i64 as u64,
            ForeignArg::U8(v) => v as u64,
            ForeignArg::I16(v) => v as i64 as u64,
            ForeignArg::U16(v) => v as u64,
            ForeignArg::I32(v) => v as i64 as u64,
            ForeignArg::U32(v) => v as u64,
            ForeignArg::I64(v) => v as u64,
            ForeignArg::U64(v) => v,
            ForeignArg::F32(v) => v.to_bits() as u64,
            ForeignArg::F64(v) => v.to_bits(),
            ForeignArg::Pointer(p) => p as usize as u64,
        }
    }
}

/// Marshalled arguments for one foreign call
///
/// Borrows the runtime it was built from for `'frame`. While it exists the
/// runtime cannot allocate or collect, so every object passed by address
/// stays where it is and stays reachable through the caller's frame.
#[derive(Debug)]
pub struct ForeignArgs<'frame> {
    args: Vec<ForeignArg>,
    _frame: PhantomData<&'frame ()>,
}

impl<'frame> ForeignArgs<'frame> {
    pub(crate) fn new(args: Vec<ForeignArg>) -> Self {
        Self {
            args,
            _frame: PhantomData,
        }
    }

    /// Arguments in call order
    pub fn as_slice(&self) -> &[ForeignArg] {
        &self.args
    }

    /// Register images in call order
    pub fn words(&self) -> Vec<u64> {
        self.args.iter().map(ForeignArg::to_word).collect()
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Check if there are no arguments
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

const _: () = assert!(POINTER_SIZE <= 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_store_load() {
        let mut buf = [0u8; 16];
        let p = buf.as_mut_ptr();
        unsafe {
            store_scalar(p.add(1), Scalar::Short, Value::Int(-2)).unwrap();
            assert_eq!(load_scalar(p.add(1), Scalar::Short), Value::Int(-2));
            assert_eq!(load_scalar(p.add(1), Scalar::UShort), Value::UInt(0xfffe));

            store_scalar(p.add(3), Scalar::Double, Value::Float(2.5)).unwrap();
            assert_eq!(load_scalar(p.add(3), Scalar::Double), Value::Float(2.5));

            store_scalar(p, Scalar::Bool, Value::Bool(true)).unwrap();
            assert_eq!(load_scalar(p, Scalar::Bool), Value::Bool(true));
        }
    }

    #[test]
    fn test_integer_truncation() {
        let mut buf = [0u8; 4];
        unsafe {
            store_scalar(buf.as_mut_ptr(), Scalar::UByte, Value::Int(0x1ff)).unwrap();
            assert_eq!(load_scalar(buf.as_ptr(), Scalar::UByte), Value::UInt(0xff));
        }
    }

    #[test]
    fn test_type_mismatch() {
        let mut buf = [0u8; 8];
        let err = unsafe { store_scalar(buf.as_mut_ptr(), Scalar::Int, Value::Float(1.0)) }
            .unwrap_err();
        assert_eq!(
            err,
            MarshalError::TypeMismatch {
                expected: "int",
                found: "float"
            }
        );
    }

    #[test]
    fn test_ref_words() {
        let mut buf = [0u8; 16];
        let r = GcRef::from_addr(0x4000);
        unsafe {
            store_ref(buf.as_mut_ptr().add(3), r);
            assert_eq!(load_ref(buf.as_ptr().add(3)), r);
            store_ref(buf.as_mut_ptr().add(3), None);
            assert_eq!(load_ref(buf.as_ptr().add(3)), None);
        }
        assert!(to_foreign(None).is_null());
    }

    #[test]
    fn test_foreign_arg_words() {
        assert_eq!(
            ForeignArg::from_scalar(Scalar::Short, Value::Int(-1)).unwrap(),
            ForeignArg::I16(-1)
        );
        assert_eq!(ForeignArg::I16(-1).to_word(), u64::MAX);
        assert_eq!(ForeignArg::U16(0xffff).to_word(), 0xffff);
        assert_eq!(ForeignArg::F64(1.0).to_word(), 1.0f64.to_bits());
        assert!(ForeignArg::F32(0.0).is_float());
        assert_eq!(
            ForeignArg::from_ref(GcRef::from_addr(0x80)).to_word(),
            0x80
        );
    }
}
