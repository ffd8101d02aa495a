//! Module constant pool
//!
//! Only strings live in the pool; integer constants are encoded inline.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use std::collections::HashMap;

/// Deduplicated string constants referenced by `CONST_STR`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantPool {
    strings: Vec<String>,
    index: HashMap<String, u32>,
}

impl ConstantPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its index
    pub fn add_string(&mut self, value: impl Into<String>) -> u32 {
        let value = value.into();
        if let Some(&idx) = self.index.get(&value) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.index.insert(value.clone(), idx);
        self.strings.push(value);
        idx
    }

    /// Look up a string by index
    pub fn get_string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Whether the pool has no entries
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Iterate over the pooled strings in index order
    pub fn strings(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }

    pub(crate) fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.strings.len() as u32);
        for s in &self.strings {
            writer.emit_string(s);
        }
    }

    pub(crate) fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.read_u32()? as usize;
        let mut pool = Self::new();
        for _ in 0..count {
            // Keep indices stable even if a producer stored duplicates
            let s = reader.read_string()?;
            let idx = pool.strings.len() as u32;
            pool.index.entry(s.clone()).or_insert(idx);
            pool.strings.push(s);
        }
        Ok(pool)
    }
}
