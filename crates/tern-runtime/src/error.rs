//! Runtime errors

use crate::config::ConfigError;
use crate::ffi::MarshalError;
use tern_capture::CaptureError;
use tern_layout::LayoutError;
use thiserror::Error;

/// Errors raised by the heap allocator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeapError {
    /// The pool cannot satisfy the request, even after a collection
    #[error("Out of memory: requested {requested} bytes from a {capacity}-byte pool")]
    OutOfMemory {
        /// Block size requested (header and payload)
        requested: usize,
        /// Pool capacity
        capacity: usize,
    },

    /// The pool itself could not be reserved
    #[error("Failed to reserve a {bytes}-byte memory pool")]
    PoolUnavailable {
        /// Requested pool size
        bytes: usize,
    },

    /// Address does not name a live heap object
    #[error("Invalid object reference: {addr:#x}")]
    InvalidRef {
        /// Offending address
        addr: usize,
    },
}

/// Errors raised while running code against the heap
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Allocation or object lookup failed
    #[error(transparent)]
    Heap(#[from] HeapError),

    /// Type could not be laid out
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Capture analysis rejected an access
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Value could not be converted at a foreign boundary
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// Name is not a variable visible in the current activation
    #[error("Unknown variable `{name}`")]
    UnknownLocal {
        /// Variable name
        name: String,
    },

    /// Scope is not part of the analyzed program
    #[error("Unknown scope {scope}")]
    UnknownScope {
        /// Scope id
        scope: tern_capture::ScopeId,
    },

    /// No activation is active
    #[error("No active frame")]
    NoFrame,

    /// Record has no such field
    #[error("Unknown field `{field}`")]
    UnknownField {
        /// Field name
        field: String,
    },

    /// Record literal does not initialise a field
    #[error("Missing field `{field}` in record literal")]
    MissingField {
        /// Field name
        field: String,
    },

    /// Element index past the end of an array
    #[error("Index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Element count
        len: usize,
    },

    /// Value-level access to an aggregate stored inline
    #[error("`{what}` is not a scalar or reference")]
    NotScalar {
        /// Description of the accessed location
        what: String,
    },

    /// Store through a null reference
    #[error("Null reference `{name}`")]
    NullReference {
        /// Variable or field name
        name: String,
    },

    /// Descriptor of an object does not match its use
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected shape
        expected: String,
        /// Actual shape
        actual: String,
    },
}
