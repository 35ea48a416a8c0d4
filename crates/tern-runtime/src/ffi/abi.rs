//! C layout verification
//!
//! Computes where a C compiler would place each field of a record and checks
//! the registry's layout against it. `packed(N)` corresponds to a C struct
//! whose fields are each wrapped to `align(N)`: every field starts at a
//! multiple of `max(natural align, N)`, and the packed layout requires that
//! every field's natural alignment is at most `N`.

use std::sync::Arc;
use tern_layout::{
    align_up, DescriptorId, Slot, TypeDescriptor, TypeKind, TypeRegistry, POINTER_ALIGN,
    POINTER_SIZE,
};
use thiserror::Error;

/// Errors that can occur while checking a C layout
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AbiError {
    /// A field is not where a C compiler would put it
    #[error("Field `{field}` is at offset {actual}, C places it at {expected}")]
    OffsetMismatch {
        /// Field name
        field: String,
        /// C offset
        expected: usize,
        /// Registry offset
        actual: usize,
    },

    /// Record size differs from `sizeof`
    #[error("Size is {actual}, C size is {expected}")]
    SizeMismatch {
        /// C size
        expected: usize,
        /// Registry size
        actual: usize,
    },

    /// Record alignment differs from `alignof`
    #[error("Alignment is {actual}, C alignment is {expected}")]
    AlignMismatch {
        /// C alignment
        expected: usize,
        /// Registry alignment
        actual: usize,
    },

    /// Only records have a field layout to check
    #[error("{kind} is not a record")]
    NotARecord {
        /// Description of the descriptor
        kind: String,
    },

    /// Descriptor id not present in the registry
    #[error("Unknown descriptor {id}")]
    UnknownDescriptor {
        /// Offending id
        id: DescriptorId,
    },
}

/// Layout a C compiler gives a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CLayout {
    /// Field offsets in declaration order
    pub offsets: Vec<usize>,
    /// `sizeof`
    pub size: usize,
    /// `alignof`
    pub align: usize,
}

fn lookup(registry: &TypeRegistry, id: DescriptorId) -> Result<Arc<TypeDescriptor>, AbiError> {
    registry
        .descriptor(id)
        .ok_or(AbiError::UnknownDescriptor { id })
}

/// C size and alignment of a slot
fn c_extent(registry: &TypeRegistry, slot: Slot) -> Result<(usize, usize), AbiError> {
    if slot.is_ref {
        return Ok((POINTER_SIZE, POINTER_ALIGN));
    }
    let desc = lookup(registry, slot.ty)?;
    match desc.kind() {
        TypeKind::Primitive(s) => Ok((s.size(), s.align())),
        TypeKind::Array(_) => Ok((POINTER_SIZE, POINTER_ALIGN)),
        TypeKind::Record(_) => {
            let c = c_layout(registry, &desc)?;
            Ok((c.size, c.align))
        }
        TypeKind::Union(union) => {
            let mut size = 0;
            let mut align = 1;
            for variant in &union.variants {
                let (s, a) = c_extent(registry, *variant)?;
                size = size.max(s);
                align = align.max(a);
            }
            Ok((align_up(size, align), align))
        }
    }
}

/// Compute the C layout of a record descriptor
pub fn c_layout(registry: &TypeRegistry, desc: &TypeDescriptor) -> Result<CLayout, AbiError> {
    let record = desc.as_record().ok_or_else(|| AbiError::NotARecord {
        kind: desc.to_string(),
    })?;
    let packing = record.packing.map(|n| n as usize);

    let mut offset = 0;
    let mut align = packing.unwrap_or(1);
    let mut offsets = Vec::with_capacity(record.fields.len());
    for field in &record.fields {
        let (size, natural) = c_extent(registry, field.slot())?;
        let field_align = packing.map_or(natural, |n| natural.max(n));
        offset = align_up(offset, field_align);
        offsets.push(offset);
        offset += size;
        align = align.max(field_align);
    }
    Ok(CLayout {
        offsets,
        size: align_up(offset, align),
        align,
    })
}

/// Check a record's layout against C, including nested inline records
pub fn verify_c_layout(registry: &TypeRegistry, desc: &TypeDescriptor) -> Result<CLayout, AbiError> {
    let c = c_layout(registry, desc)?;
    for (field, &expected) in desc.fields().iter().zip(&c.offsets) {
        if field.offset != expected {
            return Err(AbiError::OffsetMismatch {
                field: field.name.clone(),
                expected,
                actual: field.offset,
            });
        }
        if !field.is_ref {
            let nested = lookup(registry, field.ty)?;
            if nested.as_record().is_some() {
                verify_c_layout(registry, &nested)?;
            }
        }
    }
    if desc.size() != c.size {
        return Err(AbiError::SizeMismatch {
            expected: c.size,
            actual: desc.size(),
        });
    }
    if desc.align() != c.align {
        return Err(AbiError::AlignMismatch {
            expected: c.align,
            actual: desc.align(),
        });
    }
    tracing::trace!(%desc, size = c.size, align = c.align, "C layout verified");
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_layout::{Scalar, TypeExpr};

    #[test]
    fn test_unpacked_matches_c() {
        let registry = TypeRegistry::new();
        let desc = registry
            .layout(&TypeExpr::record([
                ("a", TypeExpr::scalar(Scalar::Byte)),
                ("b", TypeExpr::scalar(Scalar::Long)),
                ("c", TypeExpr::scalar(Scalar::Short)),
            ]))
            .unwrap();
        let c = verify_c_layout(&registry, &desc).unwrap();
        assert_eq!(c.offsets, vec![0, 8, 16]);
        assert_eq!(c.size, 24);
    }

    #[test]
    fn test_packed_fields_start_on_packing() {
        let registry = TypeRegistry::new();
        let desc = registry
            .layout(&TypeExpr::packed_record(
                4,
                [
                    ("a", TypeExpr::scalar(Scalar::Byte)),
                    ("b", TypeExpr::scalar(Scalar::Short)),
                    ("c", TypeExpr::scalar(Scalar::Int)),
                ],
            ))
            .unwrap();
        let c = verify_c_layout(&registry, &desc).unwrap();
        assert_eq!(c.offsets, vec![0, 4, 8]);
        assert_eq!((c.size, c.align), (12, 4));
    }

    #[test]
    fn test_not_a_record() {
        let registry = TypeRegistry::new();
        let desc = registry.layout(&TypeExpr::scalar(Scalar::Int)).unwrap();
        assert!(matches!(
            verify_c_layout(&registry, &desc),
            Err(AbiError::NotARecord { .. })
        ));
    }
}
