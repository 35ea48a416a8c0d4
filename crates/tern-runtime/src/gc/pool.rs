//! Fixed-capacity memory pool
//!
//! One contiguous, 16-byte aligned region reserved up front. Blocks are
//! handed out from an address-ordered free list (first fit) and, when no
//! free block fits, by bumping into the untouched tail. Freed blocks are
//! coalesced with their neighbours; a free block that reaches the bump
//! pointer is given back to the tail. Blocks never move.
//!
//! ```text
//! base                                  bump              capacity
//! ├──────┬──────┬──────┬──────┬──────────┼──────────────────┤
//! │ used │ free │ used │ used │   free   │    untouched     │
//! └──────┴──────┴──────┴──────┴──────────┴──────────────────┘
//! ```

use crate::defaults::POOL_ALIGN;
use crate::error::HeapError;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use tern_layout::align_up;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeBlock {
    offset: usize,
    size: usize,
}

impl FreeBlock {
    fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Fixed-capacity block allocator
pub struct MemoryPool {
    base: NonNull<u8>,
    layout: Layout,
    bump: usize,
    /// Sorted by offset, never adjacent to each other or to `bump`
    free: Vec<FreeBlock>,
    in_use: usize,
}

impl MemoryPool {
    /// Reserve a pool of at least `capacity` bytes
    pub fn new(capacity: usize) -> Result<Self, HeapError> {
        let capacity = align_up(capacity.max(POOL_ALIGN), POOL_ALIGN);
        let layout = Layout::from_size_align(capacity, POOL_ALIGN)
            .map_err(|_| HeapError::PoolUnavailable { bytes: capacity })?;
        // Zeroed so that every byte handed out is initialized
        let ptr = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or(HeapError::PoolUnavailable { bytes: capacity })?;
        Ok(Self {
            base,
            layout,
            bump: 0,
            free: Vec::new(),
            in_use: 0,
        })
    }

    /// Round a request to the block granularity
    #[inline]
    pub fn block_size(size: usize) -> usize {
        align_up(size.max(POOL_ALIGN), POOL_ALIGN)
    }

    /// Allocate a 16-byte aligned block of at least `size` bytes
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        // Checked first so that rounding cannot wrap
        if size > self.capacity() {
            return None;
        }
        let size = Self::block_size(size);

        let offset = if let Some(i) = self.free.iter().position(|b| b.size >= size) {
            let block = &mut self.free[i];
            let offset = block.offset;
            if block.size == size {
                self.free.remove(i);
            } else {
                block.offset += size;
                block.size -= size;
            }
            offset
        } else if self.capacity() - self.bump >= size {
            let offset = self.bump;
            self.bump += size;
            offset
        } else {
            return None;
        };

        self.in_use += size;
        // SAFETY: offset + size <= capacity
        Some(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) })
    }

    /// Return a block obtained from [`allocate`](Self::allocate) with the same `size`
    pub fn free(&mut self, ptr: NonNull<u8>, size: usize) {
        let size = Self::block_size(size);
        let offset = ptr.as_ptr() as usize - self.base.as_ptr() as usize;
        debug_assert!(offset + size <= self.bump);
        self.in_use -= size;

        let i = self.free.partition_point(|b| b.offset < offset);
        let mut block = FreeBlock { offset, size };

        // Coalesce with the following block
        if i < self.free.len() && self.free[i].offset == block.end() {
            block.size += self.free[i].size;
            self.free.remove(i);
        }
        // Coalesce with the preceding block
        let i = if i > 0 && self.free[i - 1].end() == block.offset {
            let prev = self.free.remove(i - 1);
            block.offset = prev.offset;
            block.size += prev.size;
            i - 1
        } else {
            i
        };

        if block.end() == self.bump {
            self.bump = block.offset;
        } else {
            self.free.insert(i, block);
        }
    }

    /// Check if an address falls inside the pool
    pub fn contains(&self, addr: usize) -> bool {
        let base = self.base.as_ptr() as usize;
        addr >= base && addr < base + self.capacity()
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// Bytes held by live blocks
    pub fn used(&self) -> usize {
        self.in_use
    }

    /// Bytes not held by live blocks
    pub fn available(&self) -> usize {
        self.capacity() - self.in_use
    }

    /// Number of free-list holes below the bump pointer
    pub fn free_blocks(&self) -> usize {
        self.free.len()
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("capacity", &self.capacity())
            .field("used", &self.in_use)
            .field("bump", &self.bump)
            .field("free_blocks", &self.free.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounded() {
        let pool = MemoryPool::new(100).unwrap();
        assert_eq!(pool.capacity(), 112);
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_blocks_are_aligned() {
        let mut pool = MemoryPool::new(1024).unwrap();
        for size in [1, 17, 33, 48] {
            let p = pool.allocate(size).unwrap();
            assert_eq!(p.as_ptr() as usize % POOL_ALIGN, 0);
        }
        assert_eq!(pool.used(), 16 + 32 + 48 + 48);
    }

    #[test]
    fn test_exhaustion() {
        let mut pool = MemoryPool::new(64).unwrap();
        assert!(pool.allocate(48).is_some());
        assert!(pool.allocate(32).is_none());
        assert!(pool.allocate(16).is_some());
        assert!(pool.allocate(1).is_none());
    }

    #[test]
    fn test_oversized_request_is_refused() {
        let mut pool = MemoryPool::new(4096).unwrap();
        assert!(pool.allocate(usize::MAX).is_none());
        assert!(pool.allocate(usize::MAX - 40).is_none());
        assert!(pool.allocate(4097).is_none());
        assert_eq!(pool.used(), 0);
        assert!(pool.allocate(4096).is_some());
    }

    #[test]
    fn test_free_reuses_and_coalesces() {
        let mut pool = MemoryPool::new(128).unwrap();
        let a = pool.allocate(32).unwrap();
        let b = pool.allocate(32).unwrap();
        let c = pool.allocate(32).unwrap();
        let _d = pool.allocate(32).unwrap();
        assert!(pool.allocate(16).is_none());

        pool.free(a, 32);
        pool.free(c, 32);
        assert_eq!(pool.free_blocks(), 2);
        // Neither hole fits 64 bytes until b joins them
        assert!(pool.allocate(64).is_none());
        pool.free(b, 32);
        assert_eq!(pool.free_blocks(), 1);

        let big = pool.allocate(96).unwrap();
        assert_eq!(big, a);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_free_at_tail_returns_to_bump() {
        let mut pool = MemoryPool::new(128).unwrap();
        let a = pool.allocate(32).unwrap();
        let b = pool.allocate(32).unwrap();
        pool.free(b, 32);
        assert_eq!(pool.free_blocks(), 0);
        pool.free(a, 32);
        assert_eq!(pool.free_blocks(), 0);
        assert_eq!(pool.used(), 0);
        assert!(pool.allocate(128).is_some());
    }

    #[test]
    fn test_contains() {
        let mut pool = MemoryPool::new(64).unwrap();
        let p = pool.allocate(16).unwrap();
        assert!(pool.contains(p.as_ptr() as usize));
        assert!(!pool.contains(p.as_ptr() as usize + 64));
    }
}
