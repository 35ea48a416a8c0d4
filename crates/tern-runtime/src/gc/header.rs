//! Heap object header
//!
//! Every heap object is preceded by a header that stores collector metadata.

use std::sync::Arc;
use tern_layout::TypeDescriptor;

/// Header stored immediately before each object payload
///
/// Layout in memory:
/// ```text
/// ┌─────────────────────────────────────────┐
/// │ ObjectHeader (32 bytes, 16-byte aligned)│
/// │  - marked: bool (1 byte)                │
/// │  - padding: [u8; 3]                     │
/// │  - object: u32 (object table index)     │
/// │  - descriptor: *const TypeDescriptor    │
/// │  - count: usize (elements)              │
/// │  - size: usize (payload bytes)          │
/// ├─────────────────────────────────────────┤  ← GcRef points here
/// │ Payload: count × descriptor.size bytes  │
/// └─────────────────────────────────────────┘
/// ```
#[repr(C, align(16))]
#[derive(Debug)]
pub struct ObjectHeader {
    /// Mark bit (true = reachable in the current collection)
    marked: bool,

    /// Padding for alignment
    _padding: [u8; 3],

    /// Index into the heap's object table
    object: u32,

    /// Back-reference to the payload's descriptor (kept alive by the object table)
    descriptor: *const TypeDescriptor,

    /// Number of consecutive instances in the payload
    count: usize,

    /// Payload size in bytes
    size: usize,
}

/// Size of the header in bytes
pub const HEADER_SIZE: usize = std::mem::size_of::<ObjectHeader>();

impl ObjectHeader {
    /// Create an unmarked header
    pub fn new(object: u32, descriptor: &Arc<TypeDescriptor>, count: usize, size: usize) -> Self {
        Self {
            marked: false,
            _padding: [0; 3],
            object,
            descriptor: Arc::as_ptr(descriptor),
            count,
            size,
        }
    }

    /// Check if this object is marked
    #[inline]
    pub fn is_marked(&self) -> bool {
        self.marked
    }

    /// Mark this object as reachable
    #[inline]
    pub fn mark(&mut self) {
        self.marked = true;
    }

    /// Unmark this object (for the next collection)
    #[inline]
    pub fn unmark(&mut self) {
        self.marked = false;
    }

    /// Object table index
    #[inline]
    pub fn object(&self) -> u32 {
        self.object
    }

    /// Raw descriptor back-reference
    #[inline]
    pub fn descriptor(&self) -> *const TypeDescriptor {
        self.descriptor
    }

    /// Element count
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Payload size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_layout::{Scalar, TypeExpr, TypeRegistry};

    #[test]
    fn test_header_size() {
        assert_eq!(HEADER_SIZE, 32);
    }

    #[test]
    fn test_header_alignment() {
        assert_eq!(std::mem::align_of::<ObjectHeader>(), 16);
    }

    #[test]
    fn test_header_mark_unmark() {
        let registry = TypeRegistry::new();
        let desc = registry.layout(&TypeExpr::scalar(Scalar::Int)).unwrap();
        let mut header = ObjectHeader::new(7, &desc, 3, 12);
        assert!(!header.is_marked());
        assert_eq!(header.object(), 7);
        assert_eq!(header.count(), 3);
        assert_eq!(header.size(), 12);
        assert_eq!(header.descriptor(), Arc::as_ptr(&desc));

        header.mark();
        assert!(header.is_marked());

        header.unmark();
        assert!(!header.is_marked());
    }
}
