//! Garbage collection system
//!
//! A slot-arena heap plus a mark-sweep collector.
//!
//! # Architecture
//!
//! - **Heap**: slot arena of `HeapObject`s addressed by `GcRef`
//! - **GarbageCollector**: owns the heap, paces and runs mark-sweep
//!
//! Roots are supplied by the caller at collection time (globals and every
//! task's frames, operand stack and results), so the collector never has to
//! scan native stacks.
//!
//! # Example
//!
//! ```
//! use raya_core::gc::{GarbageCollector, HeapObject};
//! use raya_core::Value;
//!
//! let mut gc = GarbageCollector::default();
//! let kept = gc.allocate(HeapObject::String("kept".into())).unwrap();
//! gc.allocate(HeapObject::String("garbage".into())).unwrap();
//!
//! assert_eq!(gc.collect([Value::Ref(kept)]), 1);
//! ```

mod collector;
mod heap;

pub use collector::{GarbageCollector, GcStats, HeapStats};
pub use heap::{GcRef, Heap, HeapError, HeapObject};
