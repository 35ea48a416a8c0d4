//! Layout errors
//!
//! All of these are detected while compiling and abort compilation.

use thiserror::Error;

/// Errors that can occur while computing a type layout
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// `packed(N)` with an N that is zero, not a power of two, or too large
    #[error("Invalid packing: packed({packing}) must be a power of two between 1 and {max}")]
    InvalidPacking {
        /// Requested packing
        packing: u32,
        /// Largest accepted packing
        max: u32,
    },

    /// A field whose native alignment cannot be honoured by `packed(N)`
    #[error(
        "Field `{field}` needs {align}-byte alignment, which packed({packing}) cannot express as padding"
    )]
    IncompatiblePacking {
        /// Offending field
        field: String,
        /// Native alignment of the field
        align: usize,
        /// Requested packing
        packing: u32,
    },

    /// Value-only chain of aliases that never crosses a `ref`
    #[error("Type `{name}` contains itself by value; the cycle must cross a `ref`")]
    UnboundedCycle {
        /// Alias that re-entered itself
        name: String,
    },

    /// Alias whose whole body is a reference back to itself
    #[error("Type `{name}` is a reference to itself and has no pointee")]
    RecursiveReference {
        /// Alias being resolved
        name: String,
    },

    /// Undefined alias
    #[error("Undefined type: {name}")]
    UndefinedType {
        /// Alias name that was not found
        name: String,
    },

    /// Alias defined twice with different bodies
    #[error("Type `{name}` is already defined with a different body")]
    AliasRedefined {
        /// Alias name
        name: String,
    },

    /// Two fields with the same name in one record
    #[error("Duplicate field `{field}` in record")]
    DuplicateField {
        /// Field name
        field: String,
    },

    /// Union without variants
    #[error("Union must have at least one variant")]
    EmptyUnion,
}
