//! Mark-sweep garbage collector
//!
//! Collection only runs at points where every live value is reachable from
//! a root the caller passes in: between scheduler slices, at the end of
//! `run_entry`, and after `terminate`/`restore`.

use super::heap::{GcRef, Heap, HeapError, HeapObject};
use crate::value::Value;
use std::time::{Duration, Instant};

/// Minimum collection threshold
const MIN_THRESHOLD: usize = 1024 * 1024;

/// Garbage collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Total bytes freed
    pub bytes_freed: usize,

    /// Total pause time
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,
}

/// Heap statistics
#[derive(Debug, Clone)]
pub struct HeapStats {
    /// Total allocated bytes
    pub allocated_bytes: usize,

    /// Number of live objects
    pub allocation_count: usize,

    /// GC threshold
    pub threshold: usize,
}

/// Mark-sweep garbage collector
pub struct GarbageCollector {
    heap: Heap,
    initial_threshold: usize,
    threshold: usize,
    stats: GcStats,
}

impl GarbageCollector {
    /// Create a collector over an empty heap
    pub fn new(threshold: usize) -> Self {
        Self::with_heap(Heap::new(), threshold)
    }

    /// Create a collector over an existing heap
    pub fn with_heap(heap: Heap, threshold: usize) -> Self {
        Self {
            heap,
            initial_threshold: threshold,
            threshold,
            stats: GcStats::default(),
        }
    }

    /// Set GC threshold
    pub fn set_threshold(&mut self, bytes: usize) {
        self.initial_threshold = bytes;
        self.threshold = bytes;
    }

    /// Set maximum heap size
    pub fn set_max_heap_size(&mut self, bytes: Option<usize>) {
        self.heap.set_max_heap_size(bytes);
    }

    /// Allocate an object
    pub fn allocate(&mut self, object: HeapObject) -> Result<GcRef, HeapError> {
        self.heap.allocate(object)
    }

    /// The heap
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The heap, mutably
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Swap in a new heap, keeping the configured limit
    pub fn replace_heap(&mut self, mut heap: Heap) {
        heap.set_max_heap_size(self.heap.max_heap_size());
        self.heap = heap;
        self.threshold = self.initial_threshold;
    }

    /// Whether allocation volume warrants a collection
    pub fn should_collect(&self) -> bool {
        self.heap.allocated_bytes() > self.threshold
    }

    /// Run a collection from the given roots, returning the number of objects freed
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Value>) -> usize {
        let start = Instant::now();

        self.mark(roots);
        let (freed, bytes) = self.sweep();

        let duration = start.elapsed();
        self.stats.collections += 1;
        self.stats.objects_freed += freed;
        self.stats.bytes_freed += bytes;
        self.stats.last_pause_time = duration;
        self.stats.total_pause_time += duration;

        // Grow with the surviving set
        self.threshold = (self.heap.allocated_bytes() * 2).max(self.initial_threshold);
        crate::vm_debug!(
            "gc: freed {} objects ({} bytes) in {:?}, {} live",
            freed,
            bytes,
            duration,
            self.heap.object_count()
        );
        freed
    }

    fn mark(&mut self, roots: impl IntoIterator<Item = Value>) {
        let mut worklist: Vec<GcRef> = roots.into_iter().filter_map(|v| v.as_ref()).collect();

        while let Some(r) = worklist.pop() {
            let Some(slot) = self.heap.slot_mut(r.index() as usize) else {
                continue;
            };
            if slot.marked {
                continue;
            }
            slot.marked = true;
            slot.object.for_each_child(|child| {
                if let Some(child) = child.as_ref() {
                    worklist.push(child);
                }
            });
        }
    }

    fn sweep(&mut self) -> (usize, usize) {
        let mut dead = Vec::new();
        for (index, slot) in self.heap.raw_slots_mut().iter_mut().enumerate() {
            if let Some(slot) = slot {
                if slot.marked {
                    slot.marked = false;
                } else {
                    dead.push(index);
                }
            }
        }

        let mut bytes = 0;
        for &index in &dead {
            bytes += self.heap.release(index);
        }
        (dead.len(), bytes)
    }

    /// Get GC statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Get heap statistics
    pub fn heap_stats(&self) -> HeapStats {
        HeapStats {
            allocated_bytes: self.heap.allocated_bytes(),
            allocation_count: self.heap.object_count(),
            threshold: self.threshold,
        }
    }
}

impl Default for GarbageCollector {
    fn default() -> Self {
        Self::new(MIN_THRESHOLD)
    }
}
