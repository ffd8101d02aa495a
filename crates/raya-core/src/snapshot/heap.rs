//! Heap serialization for snapshots
//!
//! The heap is written as its slot image: free slots stay free, so every
//! `GcRef` held by a global or a task resolves to the same object after
//! restore without any pointer rewriting.

use super::format::{
    read_count, read_string, read_u8, read_value, read_values, write_str, write_u64, write_u8,
    write_value, write_values, SnapshotError,
};
use crate::gc::{Heap, HeapObject};
use crate::value::Value;
use std::io::{Read, Write};

const SLOT_FREE: u8 = 0;
const SLOT_STRING: u8 = 1;
const SLOT_ARRAY: u8 = 2;
const SLOT_OBJECT: u8 = 3;
const SLOT_ERROR: u8 = 4;

/// Heap snapshot containing every slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeapSnapshot {
    slots: Vec<Option<HeapObject>>,
}

impl HeapSnapshot {
    /// Create an empty heap snapshot
    pub fn empty() -> Self {
        Self::default()
    }

    /// Copy the slot image of a heap
    pub fn capture(heap: &Heap) -> Self {
        Self {
            slots: heap.slots().map(|s| s.cloned()).collect(),
        }
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether `value` is a primitive or references a live slot
    pub fn resolves(&self, value: Value) -> bool {
        match value {
            Value::Ref(r) => matches!(self.slots.get(r.index() as usize), Some(Some(_))),
            _ => true,
        }
    }

    /// Check that every reference between objects resolves
    pub fn validate(&self) -> Result<(), SnapshotError> {
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(object) = slot else { continue };
            let mut dangling = None;
            object.for_each_child(|child| {
                if dangling.is_none() && !self.resolves(child) {
                    dangling = Some(child);
                }
            });
            if let Some(child) = dangling {
                return Err(SnapshotError::CorruptedData(format!(
                    "object #{} references missing {:?}",
                    index, child
                )));
            }
        }
        Ok(())
    }

    /// Build a heap with the same slot layout
    pub fn into_heap(self) -> Heap {
        Heap::from_slots(self.slots)
    }

    /// Encode heap snapshot to writer
    pub fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        write_u64(writer, self.slots.len() as u64)?;
        for slot in &self.slots {
            match slot {
                None => write_u8(writer, SLOT_FREE)?,
                Some(HeapObject::String(s)) => {
                    write_u8(writer, SLOT_STRING)?;
                    write_str(writer, s)?;
                }
                Some(HeapObject::Error(m)) => {
                    write_u8(writer, SLOT_ERROR)?;
                    write_str(writer, m)?;
                }
                Some(HeapObject::Array(items)) => {
                    write_u8(writer, SLOT_ARRAY)?;
                    write_values(writer, items)?;
                }
                Some(HeapObject::Object(fields)) => {
                    write_u8(writer, SLOT_OBJECT)?;
                    write_u64(writer, fields.len() as u64)?;
                    for (key, value) in fields {
                        write_str(writer, key)?;
                        write_value(writer, *value)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Decode heap snapshot from a segment of `len` bytes
    pub fn decode(reader: &mut impl Read, len: usize) -> Result<Self, SnapshotError> {
        let count = read_count(reader, len)?;
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            let slot = match read_u8(reader)? {
                SLOT_FREE => None,
                SLOT_STRING => Some(HeapObject::String(read_string(reader)?)),
                SLOT_ERROR => Some(HeapObject::Error(read_string(reader)?)),
                SLOT_ARRAY => Some(HeapObject::Array(read_values(reader, len)?)),
                SLOT_OBJECT => {
                    let fields = read_count(reader, len)?;
                    let mut entries = Vec::with_capacity(fields);
                    for _ in 0..fields {
                        let key = read_string(reader)?;
                        entries.push((key, read_value(reader)?));
                    }
                    Some(HeapObject::Object(entries))
                }
                tag => {
                    return Err(SnapshotError::CorruptedData(format!("unknown heap slot tag {}", tag)))
                }
            };
            slots.push(slot);
        }
        if slots.len() > u32::MAX as usize {
            return Err(SnapshotError::CorruptedData("too many heap slots".to_string()));
        }
        Ok(Self { slots })
    }
}
