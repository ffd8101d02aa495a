//! Generation-checked handle tables
//!
//! Every opaque pointer handed across the C boundary is an encoded
//! `(index, generation)` pair, never a real address. A handle whose slot has
//! been freed, reused, or belongs to a different table fails the generation
//! check, so stale and double frees are detected instead of corrupting memory.
//!
//! ```text
//! bits = (generation << HALF) | (index + 1)
//! generation = (counter << KIND_BITS) | kind
//! ```
//!
//! Index `+ 1` keeps every valid handle non-null.

use std::fmt;

const HALF: u32 = usize::BITS / 2;
const LOW_MASK: usize = (1usize << HALF) - 1;
const KIND_BITS: u32 = 4;
const KIND_MASK: usize = (1 << KIND_BITS) - 1;
// Largest counter that still fits in the upper half next to the kind bits
const COUNTER_MAX: usize = LOW_MASK >> KIND_BITS;

/// Which table a handle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HandleKind {
    /// `RayaVM*`
    Vm = 1,
    /// `RayaValue*`
    Value = 2,
    /// `RayaContext*`
    Context = 3,
    /// `RayaError*`
    Error = 4,
    /// `RayaModuleBuilder*`
    Builder = 5,
    /// `RayaModule*`
    Module = 6,
    /// `RayaSnapshot*`
    Snapshot = 7,
}

/// Decoded form of an opaque handle
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: usize,
    generation: usize,
}

impl Handle {
    /// Encode as an opaque, non-zero pointer-sized integer
    pub fn to_bits(self) -> usize {
        (self.generation << HALF) | (self.index + 1)
    }

    /// Decode from pointer bits; `None` for null
    pub fn from_bits(bits: usize) -> Option<Self> {
        let low = bits & LOW_MASK;
        if low == 0 {
            return None;
        }
        Some(Self {
            index: low - 1,
            generation: bits >> HALF,
        })
    }

    /// Encode as a typed opaque pointer
    pub fn to_ptr<T>(self) -> *mut T {
        self.to_bits() as *mut T
    }

    /// Decode a typed opaque pointer
    pub fn from_ptr<T>(ptr: *const T) -> Option<Self> {
        Self::from_bits(ptr as usize)
    }

    /// Kind tag carried in the generation
    pub fn kind_tag(self) -> u8 {
        (self.generation & KIND_MASK) as u8
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: usize,
    value: Option<T>,
}

/// A slot arena addressed by generation-checked handles
pub struct HandleTable<T> {
    kind: HandleKind,
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    live: usize,
}

impl<T> HandleTable<T> {
    /// Create an empty table for one handle kind
    pub const fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    fn initial_generation(&self) -> usize {
        (1 << KIND_BITS) | self.kind as usize
    }

    fn next_generation(&self, generation: usize) -> usize {
        let counter = (generation >> KIND_BITS) % COUNTER_MAX + 1;
        (counter << KIND_BITS) | self.kind as usize
    }

    /// Store a value and return its handle
    ///
    /// Returns `None` only when the index space of the upper-half encoding is
    /// exhausted.
    pub fn insert(&mut self, value: T) -> Option<Handle> {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].value = Some(value);
                index
            }
            None => {
                let index = self.slots.len();
                if index >= LOW_MASK {
                    return None;
                }
                let generation = self.initial_generation();
                self.slots.push(Slot {
                    generation,
                    value: Some(value),
                });
                index
            }
        };
        self.live += 1;
        Some(Handle {
            index,
            generation: self.slots[index].generation,
        })
    }

    fn slot(&self, handle: Handle) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
    }

    /// Whether the handle refers to a live entry of this table
    pub fn contains(&self, handle: Handle) -> bool {
        self.slot(handle).is_some()
    }

    /// Borrow a live entry
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slot(handle).and_then(|slot| slot.value.as_ref())
    }

    /// Mutably borrow a live entry
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Remove a live entry; the handle and every copy of it become stale
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        let next = self.next_generation(handle.generation);
        let slot = &mut self.slots[handle.index];
        let value = slot.value.take();
        slot.generation = next;
        self.free.push(handle.index);
        self.live -= 1;
        value
    }

    /// Decode a pointer and borrow its entry
    pub fn get_ptr<P>(&self, ptr: *const P) -> Option<&T> {
        Handle::from_ptr(ptr).and_then(|h| self.get(h))
    }

    /// Decode a pointer and mutably borrow its entry
    pub fn get_ptr_mut<P>(&mut self, ptr: *const P) -> Option<&mut T> {
        Handle::from_ptr(ptr).and_then(move |h| self.get_mut(h))
    }

    /// Decode a pointer and remove its entry
    pub fn remove_ptr<P>(&mut self, ptr: *const P) -> Option<T> {
        Handle::from_ptr(ptr).and_then(|h| self.remove(h))
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the table has no live entries
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut table = HandleTable::new(HandleKind::Value);
        let h = table.insert("a").unwrap();
        assert_eq!(table.get(h), Some(&"a"));
        assert_eq!(table.remove(h), Some("a"));
        assert_eq!(table.get(h), None);
        assert_eq!(table.remove(h), None, "double remove is a no-op");
        assert!(table.is_empty());
    }

    #[test]
    fn test_reused_slot_rejects_stale_handle() {
        let mut table = HandleTable::new(HandleKind::Value);
        let old = table.insert(1).unwrap();
        table.remove(old);
        let new = table.insert(2).unwrap();
        assert_eq!(old.index, new.index);
        assert_ne!(old.to_bits(), new.to_bits());
        assert_eq!(table.get(old), None);
        assert_eq!(table.get(new), Some(&2));
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let mut values = HandleTable::new(HandleKind::Value);
        let mut errors = HandleTable::new(HandleKind::Error);
        let v = values.insert(1).unwrap();
        let _e = errors.insert(2).unwrap();
        assert_eq!(v.index, 0);
        assert_eq!(errors.get(v), None);
        assert_eq!(v.kind_tag(), HandleKind::Value as u8);
    }

    #[test]
    fn test_pointer_roundtrip() {
        let mut table = HandleTable::new(HandleKind::Snapshot);
        let h = table.insert(()).unwrap();
        let ptr: *mut u8 = h.to_ptr();
        assert!(!ptr.is_null());
        assert_eq!(Handle::from_ptr(ptr), Some(h));
        assert_eq!(Handle::from_ptr(std::ptr::null::<u8>()), None);
        assert!(table.get_ptr(ptr).is_some());
    }
}
