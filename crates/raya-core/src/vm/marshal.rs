//! Data marshalling across the native boundary
//!
//! Native code never sees heap references. Values are deep-copied into the
//! self-contained `NativeValue` form on the way out and allocated afresh in
//! the VM heap on the way back, so a native module cannot keep a dangling
//! reference into a heap the collector is free to compact or clear.

use crate::gc::{Heap, HeapError, HeapObject};
use crate::value::Value;
use raya_sdk::NativeValue;
use thiserror::Error;

/// Maximum nesting depth for arrays and objects (also stops cycles)
pub const MAX_DEPTH: usize = 64;

/// Errors that can occur during marshalling
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    /// Value has no native representation
    #[error("Value cannot be marshalled: {0}")]
    Unmarshallable(String),

    /// Heap allocation failed during unmarshalling
    #[error("Heap allocation failed: {0}")]
    AllocationFailed(#[from] HeapError),

    /// Reference to a freed heap slot
    #[error("Dangling heap reference #{0}")]
    DanglingReference(u32),

    /// Maximum marshalling depth exceeded
    #[error("Maximum marshalling depth of {MAX_DEPTH} exceeded")]
    MaxDepthExceeded,
}

/// Copy a VM value out of the heap
pub fn marshal(value: Value, heap: &Heap) -> Result<NativeValue, MarshalError> {
    marshal_recursive(value, heap, 0)
}

fn marshal_recursive(value: Value, heap: &Heap, depth: usize) -> Result<NativeValue, MarshalError> {
    if depth >= MAX_DEPTH {
        return Err(MarshalError::MaxDepthExceeded);
    }

    match value {
        Value::Null => Ok(NativeValue::Null),
        Value::Bool(b) => Ok(NativeValue::Bool(b)),
        Value::I32(i) => Ok(NativeValue::I32(i)),
        Value::Task(id) => Err(MarshalError::Unmarshallable(format!("task handle {}", id))),
        Value::Ref(r) => match heap.get(r).ok_or(MarshalError::DanglingReference(r.index()))? {
            HeapObject::String(s) => Ok(NativeValue::String(s.clone())),
            HeapObject::Error(m) => Ok(NativeValue::Error(m.clone())),
            HeapObject::Array(items) => items
                .iter()
                .map(|item| marshal_recursive(*item, heap, depth + 1))
                .collect::<Result<Vec<_>, _>>()
                .map(NativeValue::Array),
            HeapObject::Object(fields) => fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), marshal_recursive(*v, heap, depth + 1)?)))
                .collect::<Result<Vec<_>, MarshalError>>()
                .map(NativeValue::Object),
        },
    }
}

/// Allocate a native value into the heap
pub fn unmarshal(value: &NativeValue, heap: &mut Heap) -> Result<Value, MarshalError> {
    unmarshal_recursive(value, heap, 0)
}

fn unmarshal_recursive(value: &NativeValue, heap: &mut Heap, depth: usize) -> Result<Value, MarshalError> {
    if depth >= MAX_DEPTH {
        return Err(MarshalError::MaxDepthExceeded);
    }

    let object = match value {
        NativeValue::Null => return Ok(Value::Null),
        NativeValue::Bool(b) => return Ok(Value::Bool(*b)),
        NativeValue::I32(i) => return Ok(Value::I32(*i)),
        NativeValue::String(s) => HeapObject::String(s.clone()),
        NativeValue::Error(m) => HeapObject::Error(m.clone()),
        NativeValue::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(unmarshal_recursive(item, heap, depth + 1)?);
            }
            HeapObject::Array(values)
        }
        NativeValue::Object(fields) => {
            let mut values = Vec::with_capacity(fields.len());
            for (k, v) in fields {
                values.push((k.clone(), unmarshal_recursive(v, heap, depth + 1)?));
            }
            HeapObject::Object(values)
        }
    };
    Ok(Value::Ref(heap.allocate(object)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TaskId;

    #[test]
    fn test_marshal_primitives() {
        let heap = Heap::new();
        assert_eq!(marshal(Value::null(), &heap).unwrap(), NativeValue::Null);
        assert_eq!(marshal(Value::bool(true), &heap).unwrap(), NativeValue::Bool(true));
        assert_eq!(marshal(Value::i32(-4), &heap).unwrap(), NativeValue::I32(-4));
    }

    #[test]
    fn test_nested_values_copy_in_and_out() {
        let mut heap = Heap::new();
        let native = NativeValue::Array(vec![
            NativeValue::from("a"),
            NativeValue::Object(vec![("n".to_string(), NativeValue::I32(1))]),
            NativeValue::error("bad"),
        ]);
        let value = unmarshal(&native, &mut heap).unwrap();
        assert_eq!(heap.object_count(), 4);
        assert_eq!(marshal(value, &heap).unwrap(), native);
    }

    #[test]
    fn test_cycle_hits_depth_limit() {
        let mut heap = Heap::new();
        let r = heap.allocate(HeapObject::Array(vec![Value::Null])).unwrap();
        if let Some(HeapObject::Array(items)) = heap.get_mut(r) {
            items[0] = Value::Ref(r);
        }
        assert_eq!(marshal(Value::Ref(r), &heap), Err(MarshalError::MaxDepthExceeded));
    }

    #[test]
    fn test_tasks_do_not_cross() {
        let heap = Heap::new();
        assert!(matches!(
            marshal(Value::Task(TaskId::from_u64(3)), &heap),
            Err(MarshalError::Unmarshallable(_))
        ));
    }

    #[test]
    fn test_allocation_failure_surfaces() {
        let mut heap = Heap::new();
        heap.set_max_heap_size(Some(8));
        assert!(matches!(
            unmarshal(&NativeValue::from("too big for the heap"), &mut heap),
            Err(MarshalError::AllocationFailed(_))
        ));
    }
}
