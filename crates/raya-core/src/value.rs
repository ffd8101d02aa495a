//! Engine value representation
//!
//! Primitive values live inline; strings, arrays, objects and errors live in
//! the context heap and are referenced by slot.
//!
//! ```text
//! Null | Bool(b) | I32(n)    inline
//! Ref(GcRef)                 heap slot (String, Array, Object, Error)
//! Task(TaskId)               handle to a spawned sub-task
//! ```

use crate::gc::GcRef;
use crate::scheduler::TaskId;
use std::fmt;

/// A VM value
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum Value {
    /// The null value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit signed integer
    I32(i32),
    /// Heap object
    Ref(GcRef),
    /// Spawned task
    Task(TaskId),
}

impl Value {
    /// Create a null value
    #[inline]
    pub const fn null() -> Self {
        Value::Null
    }

    /// Create a boolean value
    #[inline]
    pub const fn bool(b: bool) -> Self {
        Value::Bool(b)
    }

    /// Create an i32 value
    #[inline]
    pub const fn i32(i: i32) -> Self {
        Value::I32(i)
    }

    /// Check if this value is null
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the i32 payload
    #[inline]
    pub const fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the boolean payload
    #[inline]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the heap reference
    #[inline]
    pub const fn as_ref(&self) -> Option<GcRef> {
        match self {
            Value::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Branch truthiness: null, false and 0 are false, everything else true
    #[inline]
    pub const fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false) | Value::I32(0))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I32(i) => write!(f, "{}i32", i),
            Value::Ref(r) => write!(f, "ref#{}", r.index()),
            Value::Task(t) => write!(f, "task#{}", t.as_u64()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::I32(i)
    }
}
