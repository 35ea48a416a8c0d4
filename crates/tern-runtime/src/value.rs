//! Scalar and reference values
//!
//! [`Value`] is what flows in and out of variables, fields and elements.
//! Aggregates are never values: they live inline in their container or on
//! the heap behind a `ref`.

use crate::gc::GcRef;
use std::fmt;

/// A scalar or reference value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// `bool`
    Bool(bool),
    /// Signed integers of any width
    Int(i64),
    /// Unsigned integers of any width, and raw `pointer` words
    UInt(u64),
    /// `float` and `double`
    Float(f64),
    /// `ref T` (`None` is null)
    Ref(Option<GcRef>),
}

impl Value {
    /// The null reference
    pub fn null() -> Self {
        Value::Ref(None)
    }

    /// Reference to a heap object
    pub fn reference(r: GcRef) -> Self {
        Value::Ref(Some(r))
    }

    /// Kind name, for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Ref(_) => "ref",
        }
    }

    /// Integer view (signed or unsigned)
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            Value::UInt(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Float view
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean view
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Reference view (`Some(None)` for null)
    pub fn as_gc_ref(&self) -> Option<Option<GcRef>> {
        match *self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Ref(Some(r)) => write!(f, "ref {r}"),
            Value::Ref(None) => write!(f, "null"),
        }
    }
}
