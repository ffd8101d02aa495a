//! Bytecode encoding and decoding utilities
//!
//! `BytecodeWriter` emits instructions and container fields, `BytecodeReader`
//! walks them back. Both are little-endian throughout.

use crate::opcode::Opcode;
use thiserror::Error;

/// Errors that can occur during bytecode decoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Unexpected end of bytecode stream
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// A length prefix does not fit in the remaining input
    #[error("Length {len} at offset {offset} exceeds remaining input")]
    LengthOverflow {
        /// Declared length
        len: usize,
        /// Offset of the length prefix
        offset: usize,
    },
}

/// A forward jump whose offset is filled in later with [`BytecodeWriter::patch_jump`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "an unpatched jump targets the next instruction"]
pub struct JumpPatch {
    operand_offset: usize,
}

/// Bytecode writer for encoding instructions
///
/// Provides methods for emitting opcodes and their operands into a binary buffer.
#[derive(Debug, Default, Clone)]
pub struct BytecodeWriter {
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new bytecode writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new bytecode writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current bytecode buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the bytecode buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current offset (length of bytecode so far)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit unsigned integer
    pub fn emit_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit raw bytes with no length prefix
    pub fn emit_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit a length-prefixed byte string
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.emit_u32(bytes.len() as u32);
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit a length-prefixed UTF-8 string
    pub fn emit_string(&mut self, value: &str) {
        self.emit_bytes(value.as_bytes());
    }

    /// Overwrite a previously emitted u32
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    // ===== Instructions =====

    /// Emit an opcode without operands
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    /// Emit CONST_I32
    pub fn emit_const_i32(&mut self, value: i32) {
        self.emit_opcode(Opcode::ConstI32);
        self.emit_i32(value);
    }

    /// Emit CONST_STR with a constant pool index
    pub fn emit_const_str(&mut self, index: u32) {
        self.emit_opcode(Opcode::ConstStr);
        self.emit_u32(index);
    }

    /// Emit LOAD_FIELD with the constant index of the field name
    pub fn emit_load_field(&mut self, name: u32) {
        self.emit_opcode(Opcode::LoadField);
        self.emit_u32(name);
    }

    /// Emit LOAD_LOCAL
    pub fn emit_load_local(&mut self, index: u16) {
        self.emit_opcode(Opcode::LoadLocal);
        self.emit_u16(index);
    }

    /// Emit STORE_LOCAL
    pub fn emit_store_local(&mut self, index: u16) {
        self.emit_opcode(Opcode::StoreLocal);
        self.emit_u16(index);
    }

    /// Emit LOAD_GLOBAL
    pub fn emit_load_global(&mut self, index: u32) {
        self.emit_opcode(Opcode::LoadGlobal);
        self.emit_u32(index);
    }

    /// Emit STORE_GLOBAL
    pub fn emit_store_global(&mut self, index: u32) {
        self.emit_opcode(Opcode::StoreGlobal);
        self.emit_u32(index);
    }

    /// Emit CALL to a function of the same module
    pub fn emit_call(&mut self, function: u32, argc: u16) {
        self.emit_opcode(Opcode::Call);
        self.emit_u32(function);
        self.emit_u16(argc);
    }

    /// Emit CALL_NATIVE through a flattened import slot
    pub fn emit_call_native(&mut self, slot: u32, argc: u16) {
        self.emit_opcode(Opcode::CallNative);
        self.emit_u32(slot);
        self.emit_u16(argc);
    }

    /// Emit NEW_ARRAY collecting `count` stack values
    pub fn emit_new_array(&mut self, count: u32) {
        self.emit_opcode(Opcode::NewArray);
        self.emit_u32(count);
    }

    /// Emit SPAWN of a sub-task
    pub fn emit_spawn(&mut self, function: u32, argc: u16) {
        self.emit_opcode(Opcode::Spawn);
        self.emit_u32(function);
        self.emit_u16(argc);
    }

    /// Emit RETURN
    pub fn emit_return(&mut self) {
        self.emit_opcode(Opcode::Return);
    }

    // ===== Jumps =====

    /// Emit a jump-carrying opcode with a placeholder offset
    ///
    /// # Panics
    ///
    /// Panics if `opcode` does not carry a branch offset.
    pub fn emit_jump(&mut self, opcode: Opcode) -> JumpPatch {
        assert!(opcode.is_jump(), "{} is not a jump", opcode);
        self.emit_opcode(opcode);
        let operand_offset = self.offset();
        self.emit_i32(0);
        JumpPatch { operand_offset }
    }

    /// Point a pending jump at the current offset
    pub fn patch_jump(&mut self, patch: JumpPatch) {
        let target = self.offset();
        self.patch_jump_to(patch, target);
    }

    /// Point a pending jump at an explicit offset
    pub fn patch_jump_to(&mut self, patch: JumpPatch, target: usize) {
        let next = patch.operand_offset + 4;
        let relative = target as i64 - next as i64;
        self.buffer[patch.operand_offset..next].copy_from_slice(&(relative as i32).to_le_bytes());
    }

    /// Emit a backward jump to an already-known offset
    pub fn emit_jump_back(&mut self, opcode: Opcode, target: usize) {
        let patch = self.emit_jump(opcode);
        self.patch_jump_to(patch, target);
    }
}

/// Bytecode reader for decoding instructions and container fields
#[derive(Debug)]
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new bytecode reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Remaining bytes in the buffer
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Check if there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    /// Seek to a specific position
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self
            .position
            .checked_add(N)
            .filter(|end| *end <= self.buffer.len())
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buffer[self.position..end]);
        self.position = end;
        Ok(out)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a 16-bit unsigned integer
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    /// Read a 32-bit unsigned integer
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    /// Read a 32-bit signed integer
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    /// Read a 64-bit unsigned integer
    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    /// Read `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::LengthOverflow {
                len,
                offset: self.position,
            });
        }
        let bytes = self.buffer[self.position..self.position + len].to_vec();
        self.position += len;
        Ok(bytes)
    }

    /// Read a length-prefixed byte string
    pub fn read_len_prefixed(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.position;
        let bytes = self.read_len_prefixed()?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read an opcode byte
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let offset = self.position;
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, offset))
    }
}
