//! Mark-sweep garbage collector
//!
//! Non-moving, non-generational, stop-the-world. A collection marks every
//! object reachable from the roots using an explicit worklist (so deep or
//! cyclic graphs cannot overflow the native stack), then frees every
//! unmarked object and clears the marks of the survivors.

use super::heap::{Heap, HeapStats, ObjectId};
use super::ptr::GcRef;
use super::roots::{RootSet, RootSource};
use crate::config::GcConfig;
use crate::error::HeapError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tern_layout::TypeDescriptor;

/// Outcome of one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    /// Objects reached from the roots
    pub marked: usize,
    /// Objects freed
    pub freed: usize,
    /// Payload bytes freed
    pub freed_bytes: usize,
    /// Objects left after the sweep
    pub live_objects: usize,
    /// Payload bytes left after the sweep
    pub live_bytes: usize,
    /// Stop-the-world pause
    pub pause: Duration,
}

impl CollectionSummary {
    /// Fraction of the objects present at this collection that survived it
    pub fn survival_rate(&self) -> f64 {
        let before = self.marked + self.freed;
        if before == 0 {
            return 0.0;
        }
        self.marked as f64 / before as f64
    }
}

/// Totals over every collection, plus the most recent one
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Number of collections
    pub collections: usize,
    /// Objects freed by all collections
    pub objects_freed: usize,
    /// Payload bytes freed by all collections
    pub bytes_freed: usize,
    /// Sum of all pauses
    pub total_pause: Duration,
    /// Shortest pause
    pub min_pause: Duration,
    /// Longest pause
    pub max_pause: Duration,
    /// The most recent collection
    pub last: CollectionSummary,
}

impl GcStats {
    fn record(&mut self, summary: CollectionSummary) {
        self.collections += 1;
        self.objects_freed += summary.freed;
        self.bytes_freed += summary.freed_bytes;
        self.total_pause += summary.pause;
        self.max_pause = self.max_pause.max(summary.pause);
        self.min_pause = if self.collections == 1 {
            summary.pause
        } else {
            self.min_pause.min(summary.pause)
        };
        self.last = summary;
    }

    /// Mean pause over all collections
    pub fn avg_pause(&self) -> Duration {
        match u32::try_from(self.collections) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_pause / n,
            Err(_) => self.total_pause.div_f64(self.collections as f64),
        }
    }
}

/// Mark-sweep garbage collector
#[derive(Debug)]
pub struct GarbageCollector {
    heap: Heap,
    roots: RootSet,
    config: GcConfig,
    stats: GcStats,
}

impl GarbageCollector {
    /// Create a collector with its own memory pool
    pub fn new(config: GcConfig) -> Result<Self, HeapError> {
        Ok(Self {
            heap: Heap::new(config.pool_bytes)?,
            roots: RootSet::new(),
            config,
            stats: GcStats::default(),
        })
    }

    /// Set the live-object threshold
    pub fn set_max_objects(&mut self, max_objects: usize) {
        self.config.max_objects = max_objects;
    }

    /// Set the live-byte threshold
    pub fn set_max_bytes(&mut self, max_bytes: usize) {
        self.config.max_bytes = max_bytes;
    }

    /// Active configuration
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Allocate `count` instances of `descriptor`
    ///
    /// If the pool is exhausted, collects once and retries. If the request
    /// leaves the heap above a threshold, collects before returning with the
    /// new object protected. `extra` supplies the mutator's roots.
    pub fn allocate(
        &mut self,
        descriptor: &Arc<TypeDescriptor>,
        count: usize,
        extra: &dyn RootSource,
    ) -> Result<GcRef, HeapError> {
        let r = match self.heap.try_allocate(descriptor, count) {
            Ok(r) => r,
            Err(HeapError::OutOfMemory { requested, .. }) => {
                tracing::warn!(
                    requested,
                    live_objects = self.heap.live_objects(),
                    "memory pool exhausted, collecting"
                );
                self.collect_with(extra, None);
                self.heap.try_allocate(descriptor, count)?
            }
            Err(e) => return Err(e),
        };

        if self.should_collect() {
            self.collect_with(extra, Some(r));
        }
        Ok(r)
    }

    /// Allocate or terminate the process
    ///
    /// Out-of-memory is fatal to the running program; this logs the failure
    /// and aborts.
    pub fn allocate_or_trap(
        &mut self,
        descriptor: &Arc<TypeDescriptor>,
        count: usize,
        extra: &dyn RootSource,
    ) -> GcRef {
        match self.allocate(descriptor, count, extra) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, %descriptor, count, "allocation failed");
                std::process::abort();
            }
        }
    }

    fn should_collect(&self) -> bool {
        self.heap.live_objects() > self.config.max_objects
            || self.heap.live_bytes() > self.config.max_bytes
    }

    /// Hold a reference as a root
    pub fn add_root(&mut self, r: GcRef) {
        self.roots.add_root(r);
    }

    /// Release one hold on a root
    pub fn remove_root(&mut self, r: GcRef) -> bool {
        self.roots.remove_root(r)
    }

    /// Release all host-held roots
    pub fn clear_host_roots(&mut self) {
        self.roots.clear_host_roots();
    }

    /// Bind a named persistent global
    pub fn set_global(&mut self, name: impl Into<String>, value: Option<GcRef>) {
        self.roots.set_global(name, value);
    }

    /// Look up a named persistent global
    pub fn global(&self, name: &str) -> Option<GcRef> {
        self.roots.global(name)
    }

    /// Run a collection with only the collector's own roots
    pub fn collect(&mut self) {
        self.collect_with(&(), None);
    }

    /// Run a collection with additional mutator roots
    pub fn collect_roots(&mut self, extra: &dyn RootSource) {
        self.collect_with(extra, None);
    }

    fn collect_with(&mut self, extra: &dyn RootSource, pinned: Option<GcRef>) {
        let start = Instant::now();
        tracing::debug!(
            live_objects = self.heap.live_objects(),
            live_bytes = self.heap.live_bytes(),
            "collection started"
        );

        let marked = self.mark(extra, pinned);
        let (freed, freed_bytes) = self.sweep();

        let duration = start.elapsed();
        self.stats.record(CollectionSummary {
            marked,
            freed,
            freed_bytes,
            live_objects: self.heap.live_objects(),
            live_bytes: self.heap.live_bytes(),
            pause: duration,
        });
        tracing::info!(
            marked,
            freed,
            freed_bytes,
            pause_us = duration.as_micros() as u64,
            "collection finished"
        );
    }

    /// Mark phase: returns number of objects marked
    fn mark(&mut self, extra: &dyn RootSource, pinned: Option<GcRef>) -> usize {
        let mut worklist: Vec<ObjectId> = Vec::new();
        let mut marked = 0;

        {
            let heap = &mut self.heap;
            let mut visit = |word: usize| {
                if let Some(id) = heap.object_at(word) {
                    if heap.mark(id) {
                        marked += 1;
                        worklist.push(id);
                    }
                }
            };
            self.roots.for_each_root(&mut visit);
            extra.for_each_root(&mut visit);
            if let Some(r) = pinned {
                visit(r.addr());
            }
        }
        tracing::debug!(roots = worklist.len(), "roots marked");

        let mut children = Vec::new();
        while let Some(id) = worklist.pop() {
            let Some(object) = self.heap.get(id) else {
                continue;
            };
            let descriptor = object.descriptor();
            let base = object.payload();
            descriptor.pointer_map().for_each_in_array(
                object.count(),
                descriptor.size(),
                |offset| {
                    // SAFETY: pointer map offsets lie inside the payload
                    let word = unsafe { (base.add(offset) as *const usize).read_unaligned() };
                    children.push(word);
                },
            );

            for word in children.drain(..) {
                if let Some(child) = self.heap.object_at(word) {
                    if self.heap.mark(child) {
                        marked += 1;
                        worklist.push(child);
                    }
                }
            }
        }
        marked
    }

    /// Sweep phase: returns (objects freed, payload bytes freed)
    fn sweep(&mut self) -> (usize, usize) {
        let ids: Vec<ObjectId> = self.heap.object_ids().collect();
        let mut freed = 0;
        let mut freed_bytes = 0;
        for id in ids {
            if self.heap.is_marked(id) {
                self.heap.unmark(id);
            } else {
                freed_bytes += self.heap.free(id);
                freed += 1;
            }
        }
        tracing::debug!(freed, freed_bytes, "sweep finished");
        (freed, freed_bytes)
    }

    /// Get collection statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Get heap statistics
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Get the heap
    pub fn heap(&self) -> &Heap {
        &self.heap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_layout::{Scalar, TypeExpr, TypeRegistry};

    fn collector(config: GcConfig) -> GarbageCollector {
        GarbageCollector::new(config).unwrap()
    }

    fn node(registry: &TypeRegistry) -> Arc<TypeDescriptor> {
        registry
            .define_alias(
                "Node",
                TypeExpr::record([
                    ("value", TypeExpr::scalar(Scalar::Long)),
                    ("next", TypeExpr::reference(TypeExpr::named("Node"))),
                ]),
            )
            .unwrap();
        registry.layout(&TypeExpr::named("Node")).unwrap()
    }

    fn set_next(desc: &TypeDescriptor, from: GcRef, to: GcRef) {
        let offset = desc.field("next").unwrap().offset;
        unsafe { (from.as_ptr().add(offset) as *mut usize).write_unaligned(to.addr()) };
    }

    #[test]
    fn test_unrooted_objects_are_freed() {
        let registry = TypeRegistry::new();
        let desc = node(&registry);
        let mut gc = collector(GcConfig::default());

        for _ in 0..10 {
            gc.allocate(&desc, 1, &()).unwrap();
        }
        assert_eq!(gc.heap().live_objects(), 10);
        gc.collect();
        assert_eq!(gc.heap().live_objects(), 0);
        assert_eq!(gc.stats().last.freed, 10);
        assert_eq!(gc.stats().last.survival_rate(), 0.0);
    }

    #[test]
    fn test_reachable_chain_survives() {
        let registry = TypeRegistry::new();
        let desc = node(&registry);
        let mut gc = collector(GcConfig::default());

        let head = gc.allocate(&desc, 1, &()).unwrap();
        let mut tail = head;
        for _ in 0..100 {
            let next = gc.allocate(&desc, 1, &head).unwrap();
            set_next(&desc, tail, next);
            tail = next;
        }
        let _garbage = gc.allocate(&desc, 1, &()).unwrap();

        gc.add_root(head);
        gc.collect();
        assert_eq!(gc.heap().live_objects(), 101);
        assert_eq!(gc.stats().last.marked, 101);
        assert_eq!(gc.stats().last.freed, 1);
    }

    #[test]
    fn test_interior_pointer_does_not_retain() {
        let registry = TypeRegistry::new();
        let desc = node(&registry);
        let mut gc = collector(GcConfig::default());

        let a = gc.allocate(&desc, 1, &()).unwrap();
        let b = gc.allocate(&desc, 1, &()).unwrap();
        let offset = desc.field("next").unwrap().offset;
        unsafe { (a.as_ptr().add(offset) as *mut usize).write_unaligned(b.addr() + 8) };

        gc.add_root(a);
        gc.collect();
        assert!(gc.heap().is_live(a));
        assert!(!gc.heap().is_live(b));
    }

    #[test]
    fn test_threshold_triggers_collection() {
        let registry = TypeRegistry::new();
        let desc = node(&registry);
        let mut gc = collector(GcConfig::default().with_max_objects(3));

        for _ in 0..5 {
            gc.allocate(&desc, 1, &()).unwrap();
        }
        // The fourth allocation crossed the threshold; only it survived
        assert_eq!(gc.stats().collections, 1);
        assert_eq!(gc.heap().live_objects(), 2);
    }

    #[test]
    fn test_new_object_survives_triggered_collection() {
        let registry = TypeRegistry::new();
        let desc = node(&registry);
        let mut gc = collector(GcConfig::default().with_max_objects(0));

        let r = gc.allocate(&desc, 1, &()).unwrap();
        assert_eq!(gc.stats().collections, 1);
        assert!(gc.heap().is_live(r));
    }

    #[test]
    fn test_byte_threshold() {
        let registry = TypeRegistry::new();
        let desc = registry.layout(&TypeExpr::scalar(Scalar::Int)).unwrap();
        let mut gc = collector(GcConfig::default().with_max_bytes(100));

        gc.allocate(&desc, 20, &()).unwrap();
        assert_eq!(gc.stats().collections, 0);
        gc.allocate(&desc, 10, &()).unwrap();
        assert_eq!(gc.stats().collections, 1);
        assert_eq!(gc.heap().live_bytes(), 40);
    }

    #[test]
    fn test_exhaustion_collects_and_retries() {
        let registry = TypeRegistry::new();
        let desc = registry.layout(&TypeExpr::scalar(Scalar::Long)).unwrap();
        let mut gc = collector(GcConfig::default().with_pool_bytes(1024));

        for _ in 0..100 {
            gc.allocate(&desc, 8, &()).unwrap();
        }
        assert!(gc.stats().collections > 0);
    }

    #[test]
    fn test_out_of_memory_when_everything_is_live() {
        let registry = TypeRegistry::new();
        let desc = registry.layout(&TypeExpr::scalar(Scalar::Long)).unwrap();
        let mut gc = collector(GcConfig::default().with_pool_bytes(1024));

        let mut result = Ok(());
        for _ in 0..100 {
            match gc.allocate(&desc, 8, &()) {
                Ok(r) => gc.add_root(r),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        assert!(matches!(result, Err(HeapError::OutOfMemory { .. })));
    }

    #[test]
    fn test_huge_request_is_out_of_memory() {
        let registry = TypeRegistry::new();
        let desc = registry.layout(&TypeExpr::scalar(Scalar::Byte)).unwrap();
        let mut gc = collector(GcConfig::default().with_pool_bytes(4096));

        let result = gc.allocate(&desc, usize::MAX - 40, &());
        assert!(matches!(result, Err(HeapError::OutOfMemory { .. })));
        assert_eq!(gc.heap().live_objects(), 0);
    }

    #[test]
    fn test_stats_pause_times() {
        let mut gc = collector(GcConfig::default());
        gc.collect();
        gc.collect();
        let stats = gc.stats();
        assert_eq!(stats.collections, 2);
        assert!(stats.min_pause <= stats.max_pause);
        assert_eq!(stats.total_pause / 2, stats.avg_pause());
        assert_eq!(stats.last.live_objects, 0);
        assert_eq!(stats.last.survival_rate(), 0.0);
    }
}
