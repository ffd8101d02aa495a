//! Slot-arena heap for VM objects
//!
//! Objects are addressed by slot index (`GcRef`). Freed slots are reused, so
//! a `GcRef` is only meaningful while something reachable holds it; the
//! collector guarantees that for every reference stored in a root.

use crate::value::Value;
use std::fmt;

/// Per-object bookkeeping overhead counted against the heap limit
const OBJECT_OVERHEAD: usize = 24;

/// Reference to a heap slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcRef(u32);

impl GcRef {
    /// Build a reference from a raw slot index
    pub const fn from_index(index: u32) -> Self {
        GcRef(index)
    }

    /// Raw slot index
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// A heap-resident object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapObject {
    /// Immutable UTF-8 string
    String(String),
    /// Fixed-length array
    Array(Vec<Value>),
    /// Ordered field list
    Object(Vec<(String, Value)>),
    /// Error value carrying a message
    Error(String),
}

impl HeapObject {
    /// Approximate footprint used for limits and GC pacing
    pub fn size_bytes(&self) -> usize {
        let payload = match self {
            HeapObject::String(s) | HeapObject::Error(s) => s.len(),
            HeapObject::Array(items) => items.len() * std::mem::size_of::<Value>(),
            HeapObject::Object(fields) => fields
                .iter()
                .map(|(k, _)| OBJECT_OVERHEAD + k.len() + std::mem::size_of::<Value>())
                .sum(),
        };
        OBJECT_OVERHEAD + payload
    }

    /// Type name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            HeapObject::String(_) => "string",
            HeapObject::Array(_) => "array",
            HeapObject::Object(_) => "object",
            HeapObject::Error(_) => "error",
        }
    }

    pub(crate) fn for_each_child(&self, mut f: impl FnMut(Value)) {
        match self {
            HeapObject::Array(items) => items.iter().copied().for_each(&mut f),
            HeapObject::Object(fields) => fields.iter().for_each(|(_, v)| f(*v)),
            HeapObject::String(_) | HeapObject::Error(_) => {}
        }
    }
}

/// Allocation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    /// The configured heap limit would be exceeded
    #[error("Heap limit exceeded: {requested} bytes requested with {allocated} of {limit} bytes in use")]
    LimitExceeded {
        /// Size of the failed allocation
        requested: usize,
        /// Bytes in use
        allocated: usize,
        /// Configured limit
        limit: usize,
    },

    /// No slot index left
    #[error("Heap slot space exhausted")]
    SlotsExhausted,
}

#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub(crate) object: HeapObject,
    pub(crate) size: usize,
    pub(crate) marked: bool,
}

/// Heap allocator
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    allocated_bytes: usize,
    live_objects: usize,
    max_heap_bytes: Option<usize>,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            allocated_bytes: 0,
            live_objects: 0,
            max_heap_bytes: None,
        }
    }

    /// Rebuild a heap from a slot image, keeping every index in place
    pub fn from_slots(objects: Vec<Option<HeapObject>>) -> Self {
        let mut heap = Self::new();
        for (index, object) in objects.into_iter().enumerate() {
            match object {
                Some(object) => {
                    let size = object.size_bytes();
                    heap.allocated_bytes += size;
                    heap.live_objects += 1;
                    heap.slots.push(Some(Slot {
                        object,
                        size,
                        marked: false,
                    }));
                }
                None => {
                    heap.slots.push(None);
                    heap.free.push(index as u32);
                }
            }
        }
        heap
    }

    /// Set maximum heap size
    pub fn set_max_heap_size(&mut self, bytes: Option<usize>) {
        self.max_heap_bytes = bytes;
    }

    /// Maximum heap size, if limited
    pub fn max_heap_size(&self) -> Option<usize> {
        self.max_heap_bytes
    }

    /// Allocate an object
    pub fn allocate(&mut self, object: HeapObject) -> Result<GcRef, HeapError> {
        let size = object.size_bytes();
        if let Some(limit) = self.max_heap_bytes {
            if self.allocated_bytes + size > limit {
                return Err(HeapError::LimitExceeded {
                    requested: size,
                    allocated: self.allocated_bytes,
                    limit,
                });
            }
        }

        let slot = Slot {
            object,
            size,
            marked: false,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                index
            }
            None => {
                let index = u32::try_from(self.slots.len()).map_err(|_| HeapError::SlotsExhausted)?;
                self.slots.push(Some(slot));
                index
            }
        };

        self.allocated_bytes += size;
        self.live_objects += 1;
        Ok(GcRef(index))
    }

    /// Allocate a string
    pub fn alloc_string(&mut self, s: impl Into<String>) -> Result<Value, HeapError> {
        self.allocate(HeapObject::String(s.into())).map(Value::Ref)
    }

    /// Allocate an error value
    pub fn alloc_error(&mut self, message: impl Into<String>) -> Result<Value, HeapError> {
        self.allocate(HeapObject::Error(message.into())).map(Value::Ref)
    }

    /// Object behind a reference
    pub fn get(&self, r: GcRef) -> Option<&HeapObject> {
        self.slots
            .get(r.0 as usize)
            .and_then(Option::as_ref)
            .map(|slot| &slot.object)
    }

    /// Mutable object behind a reference
    pub fn get_mut(&mut self, r: GcRef) -> Option<&mut HeapObject> {
        self.slots
            .get_mut(r.0 as usize)
            .and_then(Option::as_mut)
            .map(|slot| &mut slot.object)
    }

    /// String contents if `value` references a string
    pub fn str(&self, value: Value) -> Option<&str> {
        match value {
            Value::Ref(r) => match self.get(r) {
                Some(HeapObject::String(s)) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Bytes in use
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.live_objects
    }

    /// Number of slots, live or free
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slot image in index order (`None` for free slots)
    pub fn slots(&self) -> impl Iterator<Item = Option<&HeapObject>> + '_ {
        self.slots.iter().map(|s| s.as_ref().map(|slot| &slot.object))
    }

    /// Drop every object
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.allocated_bytes = 0;
        self.live_objects = 0;
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub(crate) fn raw_slots_mut(&mut self) -> &mut [Option<Slot>] {
        &mut self.slots
    }

    pub(crate) fn release(&mut self, index: usize) -> usize {
        match self.slots.get_mut(index).and_then(Option::take) {
            Some(slot) => {
                self.free.push(index as u32);
                self.allocated_bytes -= slot.size;
                self.live_objects -= 1;
                slot.size
            }
            None => 0,
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("objects", &self.live_objects)
            .field("slots", &self.slots.len())
            .field("allocated_bytes", &self.allocated_bytes)
            .field("max_heap_bytes", &self.max_heap_bytes)
            .finish()
    }
}
