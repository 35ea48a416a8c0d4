//! Garbage collection system
//!
//! This module provides the heap and the mark-sweep collector.
//!
//! # Architecture
//!
//! - **MemoryPool**: fixed-capacity region with a coalescing free list
//! - **ObjectHeader**: metadata stored before each payload (32 bytes)
//! - **GcRef**: payload address of a heap object
//! - **Heap**: object table over the pool
//! - **RootSet** / **RootSource**: collector-owned and mutator-supplied roots
//! - **GarbageCollector**: threshold-driven mark-sweep collection
//!
//! # Memory Layout
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ ObjectHeader (32 bytes, 16-byte aligned)│
//! │  - marked, object index                 │
//! │  - descriptor, count, size              │
//! ├─────────────────────────────────────────┤  ← GcRef points here
//! │ Payload (count × descriptor.size)       │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The payload is traced with the descriptor's pointer map, applied to each
//! of the `count` elements.

pub mod collector;
pub mod header;
pub mod heap;
pub mod pool;
pub mod ptr;
pub mod roots;

pub use collector::{CollectionSummary, GarbageCollector, GcStats};
pub use header::{ObjectHeader, HEADER_SIZE};
pub use heap::{Heap, HeapObject, HeapStats, ObjectId};
pub use pool::MemoryPool;
pub use ptr::GcRef;
pub use roots::{RootSet, RootSource};
