//! Heap allocator for collector-managed objects
//!
//! Objects are carved from a [`MemoryPool`] and registered in an object
//! table. The table owns each object's descriptor (an `Arc` into the type
//! registry) and indexes objects by payload address, which is how the
//! collector decides whether a word is a live reference.

use super::header::{ObjectHeader, HEADER_SIZE};
use super::pool::MemoryPool;
use super::ptr::GcRef;
use crate::defaults::POOL_ALIGN;
use crate::error::HeapError;
use rustc_hash::FxHashMap;
use std::ptr::NonNull;
use std::sync::Arc;
use tern_layout::{align_up, TypeDescriptor};

/// Object table index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) u32);

impl ObjectId {
    /// Raw index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A live heap object
#[derive(Debug)]
pub struct HeapObject {
    descriptor: Arc<TypeDescriptor>,
    block: NonNull<u8>,
    block_size: usize,
    payload: NonNull<u8>,
    count: usize,
}

impl HeapObject {
    /// Descriptor of one element
    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    /// Element count
    pub fn count(&self) -> usize {
        self.count
    }

    /// Payload size in bytes
    pub fn payload_len(&self) -> usize {
        self.count * self.descriptor.size()
    }

    /// Reference to the payload
    pub fn gc_ref(&self) -> GcRef {
        GcRef::new(self.payload)
    }

    /// Payload base pointer
    pub fn payload(&self) -> *mut u8 {
        self.payload.as_ptr()
    }

    fn header(&self) -> *mut ObjectHeader {
        // SAFETY: the header is written HEADER_SIZE bytes before the payload
        unsafe { self.payload.as_ptr().sub(HEADER_SIZE) as *mut ObjectHeader }
    }
}

/// Heap statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Live objects
    pub live_objects: usize,
    /// Live payload bytes
    pub live_bytes: usize,
    /// Pool capacity
    pub pool_capacity: usize,
    /// Pool bytes held by live blocks (headers, padding and payloads)
    pub pool_used: usize,
    /// Free-list holes
    pub free_blocks: usize,
}

/// Heap of descriptor-typed objects
#[derive(Debug)]
pub struct Heap {
    pool: MemoryPool,
    objects: Vec<Option<HeapObject>>,
    vacant: Vec<u32>,
    by_addr: FxHashMap<usize, ObjectId>,
    live_objects: usize,
    live_bytes: usize,
}

impl Heap {
    /// Create a heap over a pool of `pool_bytes`
    pub fn new(pool_bytes: usize) -> Result<Self, HeapError> {
        Ok(Self {
            pool: MemoryPool::new(pool_bytes)?,
            objects: Vec::new(),
            vacant: Vec::new(),
            by_addr: FxHashMap::default(),
            live_objects: 0,
            live_bytes: 0,
        })
    }

    /// Pool block size needed for `count` instances of `descriptor`
    fn block_size(descriptor: &TypeDescriptor, count: usize) -> Option<usize> {
        let payload = count.checked_mul(descriptor.size())?;
        let slack = descriptor.align().saturating_sub(POOL_ALIGN);
        HEADER_SIZE.checked_add(slack)?.checked_add(payload)
    }

    /// Allocate `count` consecutive instances of `descriptor`
    ///
    /// Never collects. Payloads that contain traced words are zeroed.
    pub fn try_allocate(
        &mut self,
        descriptor: &Arc<TypeDescriptor>,
        count: usize,
    ) -> Result<GcRef, HeapError> {
        let capacity = self.pool.capacity();
        let block_size = Self::block_size(descriptor, count).ok_or(HeapError::OutOfMemory {
            requested: usize::MAX,
            capacity,
        })?;
        let block = self
            .pool
            .allocate(block_size)
            .ok_or(HeapError::OutOfMemory {
                requested: block_size,
                capacity,
            })?;

        let payload_len = count * descriptor.size();
        let block_addr = block.as_ptr() as usize;
        let payload_addr = align_up(block_addr + HEADER_SIZE, descriptor.align().max(POOL_ALIGN));
        // SAFETY: payload_addr lies inside the block (slack covers the alignment)
        let payload = unsafe { NonNull::new_unchecked(block.as_ptr().add(payload_addr - block_addr)) };

        let id = match self.vacant.pop() {
            Some(index) => ObjectId(index),
            None => {
                self.objects.push(None);
                ObjectId((self.objects.len() - 1) as u32)
            }
        };

        unsafe {
            let header = payload.as_ptr().sub(HEADER_SIZE) as *mut ObjectHeader;
            header.write(ObjectHeader::new(id.0, descriptor, count, payload_len));
            if descriptor.has_pointers() {
                std::ptr::write_bytes(payload.as_ptr(), 0, payload_len);
            }
        }

        self.objects[id.index()] = Some(HeapObject {
            descriptor: Arc::clone(descriptor),
            block,
            block_size,
            payload,
            count,
        });
        self.by_addr.insert(payload_addr, id);
        self.live_objects += 1;
        self.live_bytes += payload_len;
        Ok(GcRef::new(payload))
    }

    /// Free an object, returning its payload size
    pub fn free(&mut self, id: ObjectId) -> usize {
        let Some(object) = self.objects.get_mut(id.index()).and_then(Option::take) else {
            return 0;
        };
        let payload_len = object.payload_len();
        self.by_addr.remove(&(object.payload.as_ptr() as usize));
        self.pool.free(object.block, object.block_size);
        self.vacant.push(id.0);
        self.live_objects -= 1;
        self.live_bytes -= payload_len;
        payload_len
    }

    /// Object whose payload starts exactly at `addr`
    #[inline]
    pub fn object_at(&self, addr: usize) -> Option<ObjectId> {
        self.by_addr.get(&addr).copied()
    }

    /// Look up a live object
    pub fn get(&self, id: ObjectId) -> Option<&HeapObject> {
        self.objects.get(id.index()).and_then(Option::as_ref)
    }

    /// Look up the live object a reference points to
    pub fn resolve(&self, r: GcRef) -> Result<&HeapObject, HeapError> {
        self.object_at(r.addr())
            .and_then(|id| self.get(id))
            .ok_or(HeapError::InvalidRef { addr: r.addr() })
    }

    /// Check if a reference names a live object
    pub fn is_live(&self, r: GcRef) -> bool {
        self.object_at(r.addr()).is_some()
    }

    /// Ids of all live objects
    pub fn object_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_some())
            .map(|(i, _)| ObjectId(i as u32))
    }

    /// Set the mark bit; returns false if it was already set
    pub(crate) fn mark(&mut self, id: ObjectId) -> bool {
        let Some(object) = self.get(id) else {
            return false;
        };
        // SAFETY: live objects always have a written header
        let header = unsafe { &mut *object.header() };
        debug_assert_eq!(header.object(), id.0);
        if header.is_marked() {
            false
        } else {
            header.mark();
            true
        }
    }

    /// Check the mark bit
    pub(crate) fn is_marked(&self, id: ObjectId) -> bool {
        self.get(id)
            .map(|object| unsafe { (*object.header()).is_marked() })
            .unwrap_or(false)
    }

    /// Clear the mark bit
    pub(crate) fn unmark(&mut self, id: ObjectId) {
        if let Some(object) = self.get(id) {
            unsafe { (*object.header()).unmark() };
        }
    }

    /// Live object count
    pub fn live_objects(&self) -> usize {
        self.live_objects
    }

    /// Live payload bytes
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Pool capacity
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live_objects: self.live_objects,
            live_bytes: self.live_bytes,
            pool_capacity: self.pool.capacity(),
            pool_used: self.pool.used(),
            free_blocks: self.pool.free_blocks(),
        }
    }
}
