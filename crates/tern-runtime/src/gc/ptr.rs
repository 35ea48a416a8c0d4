//! Heap object references

use std::fmt;
use std::ptr::NonNull;

/// Address of a heap object's payload
///
/// This is the value a `ref T` slot holds. It is a plain address: the heap
/// validates it against its object table before dereferencing, and the
/// collector only follows words that are exactly the payload address of a
/// live object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcRef(NonNull<u8>);

impl GcRef {
    pub(crate) fn new(payload: NonNull<u8>) -> Self {
        Self(payload)
    }

    /// Reinterpret a raw word as a reference (`None` for null)
    pub fn from_addr(addr: usize) -> Option<Self> {
        NonNull::new(addr as *mut u8).map(Self)
    }

    /// Payload address
    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Raw payload pointer
    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }
}

impl fmt::Debug for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcRef({:#x})", self.addr())
    }
}

impl fmt::Display for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_addr() {
        assert!(GcRef::from_addr(0).is_none());
        let r = GcRef::from_addr(0x1000).unwrap();
        assert_eq!(r.addr(), 0x1000);
        assert_eq!(r.to_string(), "0x1000");
    }
}
