//! Tern Type Layout
//!
//! Computes the memory layout of every type a program uses: size,
//! alignment, field offsets and the pointer map the collector traces with.
//!
//! ```
//! use tern_layout::{Scalar, TypeExpr, TypeRegistry};
//!
//! let registry = TypeRegistry::new();
//! let point = TypeExpr::record([
//!     ("x", TypeExpr::scalar(Scalar::Int)),
//!     ("y", TypeExpr::scalar(Scalar::Int)),
//! ]);
//! assert_eq!(registry.size_of(&point).unwrap(), 8);
//! ```

#![warn(missing_docs)]

pub mod descriptor;
pub mod error;
pub mod expr;
pub mod pointer_map;
pub mod registry;
pub mod scalar;

pub use descriptor::{
    ArrayLayout, DescriptorId, FieldLayout, RecordLayout, Slot, TypeDescriptor, TypeKind,
    UnionLayout,
};
pub use error::LayoutError;
pub use expr::{FieldExpr, RecordExpr, TypeExpr};
pub use pointer_map::PointerMap;
pub use registry::{align_up, global, TypeRegistry, CELL_FIELD, MAX_PACKING};
pub use scalar::{Scalar, POINTER_ALIGN, POINTER_SIZE};
