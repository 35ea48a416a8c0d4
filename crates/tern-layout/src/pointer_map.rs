//! Pointer maps for precise tracing
//!
//! A pointer map lists the byte offsets, within one instance of a type, of
//! every word the collector has to treat as a potential reference. Nested
//! value fields are flattened into their parent's map at layout time, so the
//! collector never has to walk the field tree while marking.

use std::fmt;

/// Pointer locations inside one instance of a type
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PointerMap {
    /// No traced words (scalars, records of scalars)
    #[default]
    None,

    /// Sorted, de-duplicated byte offsets of traced words
    Offsets(Vec<usize>),
}

impl PointerMap {
    /// Create a pointer map with no pointers
    pub fn none() -> Self {
        PointerMap::None
    }

    /// Create a pointer map from arbitrary offsets (sorted and de-duplicated)
    pub fn offsets(mut offsets: Vec<usize>) -> Self {
        offsets.sort_unstable();
        offsets.dedup();
        if offsets.is_empty() {
            PointerMap::None
        } else {
            PointerMap::Offsets(offsets)
        }
    }

    /// Map with a single traced word at offset 0
    pub fn single() -> Self {
        PointerMap::Offsets(vec![0])
    }

    /// Check if this map contains any pointers
    pub fn has_pointers(&self) -> bool {
        match self {
            PointerMap::None => false,
            PointerMap::Offsets(offsets) => !offsets.is_empty(),
        }
    }

    /// Get the number of traced words in one instance
    pub fn pointer_count(&self) -> usize {
        match self {
            PointerMap::None => 0,
            PointerMap::Offsets(offsets) => offsets.len(),
        }
    }

    /// Offsets as a slice
    pub fn as_slice(&self) -> &[usize] {
        match self {
            PointerMap::None => &[],
            PointerMap::Offsets(offsets) => offsets,
        }
    }

    /// Calls `f` for each byte offset that holds a traced word, relative to `base_offset`
    pub fn for_each_pointer_offset<F>(&self, base_offset: usize, mut f: F)
    where
        F: FnMut(usize),
    {
        for &offset in self.as_slice() {
            f(base_offset + offset);
        }
    }

    /// Calls `f` for every traced word of `count` consecutive instances laid out `stride` bytes apart
    pub fn for_each_in_array<F>(&self, count: usize, stride: usize, mut f: F)
    where
        F: FnMut(usize),
    {
        if !self.has_pointers() {
            return;
        }
        for i in 0..count {
            self.for_each_pointer_offset(i * stride, &mut f);
        }
    }

    /// Builder helper: append this map's offsets, shifted by `base`, to `out`
    pub(crate) fn extend_shifted(&self, base: usize, out: &mut Vec<usize>) {
        self.for_each_pointer_offset(base, |offset| out.push(offset));
    }
}

impl fmt::Display for PointerMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointerMap::None => write!(f, "None"),
            PointerMap::Offsets(offsets) => write!(f, "Offsets({:?})", offsets),
        }
    }
}
