//! Type descriptors
//!
//! A [`TypeDescriptor`] is the immutable result of laying out one structurally
//! distinct type expression. Descriptors refer to each other by
//! [`DescriptorId`] so that recursive types (through `ref`) need no cyclic
//! ownership.

use crate::pointer_map::PointerMap;
use crate::scalar::{Scalar, POINTER_ALIGN, POINTER_SIZE};
use std::fmt;

/// Index of a descriptor in its [`TypeRegistry`](crate::TypeRegistry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorId(pub(crate) u32);

impl DescriptorId {
    /// Raw index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DescriptorId({})", self.0)
    }
}

/// How a type is stored at a point of use
///
/// Fields, union variants, array elements, locals and captures all store a
/// type either inline (`is_ref == false`) or as an address (`is_ref == true`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    /// Stored type (the pointee when `is_ref`)
    pub ty: DescriptorId,
    /// Stored as an address
    pub is_ref: bool,
}

impl Slot {
    /// Inline value slot
    pub fn value(ty: DescriptorId) -> Self {
        Self { ty, is_ref: false }
    }

    /// Address slot
    pub fn reference(ty: DescriptorId) -> Self {
        Self { ty, is_ref: true }
    }
}

/// Laid-out record field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    /// Field name
    pub name: String,
    /// Byte offset from the start of the record
    pub offset: usize,
    /// Field type (the pointee for `ref` fields)
    pub ty: DescriptorId,
    /// Stored as an address
    pub is_ref: bool,
    /// Bytes occupied by the field itself
    pub size: usize,
}

impl FieldLayout {
    /// The field's storage slot
    pub fn slot(&self) -> Slot {
        Slot {
            ty: self.ty,
            is_ref: self.is_ref,
        }
    }

    /// First byte after the field
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Record layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    /// Fields in declaration order
    pub fields: Vec<FieldLayout>,
    /// `packed(N)` directive the layout was computed with
    pub packing: Option<u32>,
}

impl RecordLayout {
    /// Find a field by name
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Array handle layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayLayout {
    /// Element storage
    pub element: Slot,
    /// Distance between consecutive elements
    pub element_size: usize,
}

impl ArrayLayout {
    /// Byte offset of element `index` from the buffer base
    pub fn element_offset(&self, index: usize) -> usize {
        index * self.element_size
    }
}

/// Untagged union storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionLayout {
    /// Variants in declaration order
    pub variants: Vec<Slot>,
}

/// Descriptor kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// Scalar value
    Primitive(Scalar),
    /// Record (named or anonymous)
    Record(RecordLayout),
    /// Array handle
    Array(ArrayLayout),
    /// Union storage (no synthesized discriminator)
    Union(UnionLayout),
}

/// Immutable layout of one structurally distinct type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub(crate) id: DescriptorId,
    pub(crate) kind: TypeKind,
    pub(crate) size: usize,
    pub(crate) align: usize,
    pub(crate) pointer_map: PointerMap,
}

impl TypeDescriptor {
    /// Registry index of this descriptor
    #[inline]
    pub fn id(&self) -> DescriptorId {
        self.id
    }

    /// Descriptor kind
    #[inline]
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Size in bytes (always a multiple of [`align`](Self::align))
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment in bytes
    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    /// Traced words in one instance
    #[inline]
    pub fn pointer_map(&self) -> &PointerMap {
        &self.pointer_map
    }

    /// Whether instances contain traced words
    #[inline]
    pub fn has_pointers(&self) -> bool {
        self.pointer_map.has_pointers()
    }

    /// Scalar type, for primitives
    pub fn as_scalar(&self) -> Option<Scalar> {
        match &self.kind {
            TypeKind::Primitive(s) => Some(*s),
            _ => None,
        }
    }

    /// Record layout, for records
    pub fn as_record(&self) -> Option<&RecordLayout> {
        match &self.kind {
            TypeKind::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Array layout, for array handles
    pub fn as_array(&self) -> Option<&ArrayLayout> {
        match &self.kind {
            TypeKind::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Union layout, for union storage
    pub fn as_union(&self) -> Option<&UnionLayout> {
        match &self.kind {
            TypeKind::Union(u) => Some(u),
            _ => None,
        }
    }

    /// Record fields (empty for non-records)
    pub fn fields(&self) -> &[FieldLayout] {
        self.as_record().map(|r| r.fields.as_slice()).unwrap_or(&[])
    }

    /// Find a record field by name
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.as_record().and_then(|r| r.field(name))
    }

    /// Bytes occupied by a slot of this type
    pub fn slot_size(&self, is_ref: bool) -> usize {
        if is_ref { POINTER_SIZE } else { self.size }
    }

    /// Alignment of a slot of this type
    pub fn slot_align(&self, is_ref: bool) -> usize {
        if is_ref { POINTER_ALIGN } else { self.align }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            TypeKind::Primitive(s) => s.name(),
            TypeKind::Record(_) => "record",
            TypeKind::Array(_) => "array",
            TypeKind::Union(_) => "union",
        };
        write!(
            f,
            "{}#{} (size {}, align {}, pointers {})",
            kind, self.id.0, self.size, self.align, self.pointer_map
        )
    }
}
