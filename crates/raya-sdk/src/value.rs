//! NativeValue: self-contained values that cross the native boundary
//!
//! Engine heap values never leave the VM. Every argument handed to a native
//! function, and every result handed back, is a deep copy in this form.

use std::fmt;

/// Runtime type of a value, as reported by `raya_value_type`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `null`
    Null = 0,
    /// Boolean
    Bool = 1,
    /// 32-bit signed integer
    I32 = 2,
    /// UTF-8 string
    String = 3,
    /// Ordered array
    Array = 4,
    /// String-keyed object
    Object = 5,
    /// Error value carrying a message
    Error = 6,
}

impl ValueType {
    /// Lowercase name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::I32 => "i32",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::Object => "object",
            ValueType::Error => "error",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value owned outside the VM heap
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NativeValue {
    /// `null`
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit signed integer
    I32(i32),
    /// UTF-8 string
    String(String),
    /// Ordered array
    Array(Vec<NativeValue>),
    /// Object with insertion-ordered fields
    Object(Vec<(String, NativeValue)>),
    /// Error value; returned from a native function it is thrown into the calling task
    Error(String),
}

impl NativeValue {
    /// Create a null value
    pub fn null() -> Self {
        NativeValue::Null
    }

    /// Create an error value
    pub fn error(message: impl Into<String>) -> Self {
        NativeValue::Error(message.into())
    }

    /// Runtime type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            NativeValue::Null => ValueType::Null,
            NativeValue::Bool(_) => ValueType::Bool,
            NativeValue::I32(_) => ValueType::I32,
            NativeValue::String(_) => ValueType::String,
            NativeValue::Array(_) => ValueType::Array,
            NativeValue::Object(_) => ValueType::Object,
            NativeValue::Error(_) => ValueType::Error,
        }
    }

    /// Check if this is `null`
    pub fn is_null(&self) -> bool {
        matches!(self, NativeValue::Null)
    }

    /// Check if this is an error value
    pub fn is_error(&self) -> bool {
        matches!(self, NativeValue::Error(_))
    }

    /// Get as bool if this is a bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NativeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i32 if this is an i32
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            NativeValue::I32(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as str if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the elements if this is an array
    pub fn as_array(&self) -> Option<&[NativeValue]> {
        match self {
            NativeValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Error message if this is an error value
    pub fn error_message(&self) -> Option<&str> {
        match self {
            NativeValue::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// Look up an object field
    pub fn field(&self, name: &str) -> Option<&NativeValue> {
        match self {
            NativeValue::Object(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    // Sentinel accessors: a type mismatch reads as the zero value.
    // Callers that need to tell "absent" from "zero" check `value_type` first.

    /// `true` only for `Bool(true)`
    pub fn to_bool_or_false(&self) -> bool {
        self.as_bool().unwrap_or(false)
    }

    /// The integer, or 0 on type mismatch
    pub fn to_i32_or_zero(&self) -> i32 {
        self.as_i32().unwrap_or(0)
    }
}

impl fmt::Display for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeValue::Null => f.write_str("null"),
            NativeValue::Bool(b) => write!(f, "{}", b),
            NativeValue::I32(n) => write!(f, "{}", n),
            NativeValue::String(s) => write!(f, "{:?}", s),
            NativeValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            NativeValue::Object(fields) => {
                f.write_str("{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            NativeValue::Error(msg) => write!(f, "Error({})", msg),
        }
    }
}

impl From<bool> for NativeValue {
    fn from(b: bool) -> Self {
        NativeValue::Bool(b)
    }
}

impl From<i32> for NativeValue {
    fn from(n: i32) -> Self {
        NativeValue::I32(n)
    }
}

impl From<&str> for NativeValue {
    fn from(s: &str) -> Self {
        NativeValue::String(s.to_string())
    }
}

impl From<String> for NativeValue {
    fn from(s: String) -> Self {
        NativeValue::String(s)
    }
}

impl<T: Into<NativeValue>> From<Vec<T>> for NativeValue {
    fn from(items: Vec<T>) -> Self {
        NativeValue::Array(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_accessors() {
        assert_eq!(NativeValue::from("7").to_i32_or_zero(), 0);
        assert_eq!(NativeValue::I32(7).to_i32_or_zero(), 7);
        assert!(!NativeValue::I32(1).to_bool_or_false());
        assert!(NativeValue::Bool(true).to_bool_or_false());
    }

    #[test]
    fn test_value_types() {
        assert_eq!(NativeValue::Null.value_type(), ValueType::Null);
        assert_eq!(NativeValue::from(vec![1, 2]).value_type(), ValueType::Array);
        assert_eq!(NativeValue::error("boom").error_message(), Some("boom"));
        assert_eq!(ValueType::Object.to_string(), "object");
    }

    #[test]
    fn test_display() {
        let v = NativeValue::Object(vec![
            ("ok".to_string(), NativeValue::Bool(true)),
            ("items".to_string(), NativeValue::from(vec!["a"])),
        ]);
        assert_eq!(v.to_string(), "{ok: true, items: [\"a\"]}");
    }
}
