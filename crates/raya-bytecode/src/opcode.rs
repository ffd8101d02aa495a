//! Bytecode opcodes for the Raya VM
//!
//! The embedding surface only needs a compact stack machine: enough to move
//! values in and out of native modules, keep global state that snapshots can
//! capture, and spawn sub-tasks that `run_entry` waits on.
//!
//! Opcodes are grouped by range:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Locals and globals
//! - 0x20-0x2F: Integer arithmetic
//! - 0x50-0x5F: Integer comparison
//! - 0x70-0x7F: Generic comparison & logical
//! - 0x80-0x8F: String operations
//! - 0x90-0x9F: Control flow
//! - 0xA0-0xAF: Function calls
//! - 0xC0-0xCF: Array operations
//! - 0xD0-0xDF: Task & concurrency
//! - 0xE0-0xEF: Error handling

/// Bytecode opcode enumeration
///
/// All opcodes are single bytes; operands follow in little-endian order.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Swap top two stack values
    Swap = 0x03,
    /// Push null constant
    ConstNull = 0x04,
    /// Push true constant
    ConstTrue = 0x05,
    /// Push false constant
    ConstFalse = 0x06,
    /// Push 32-bit integer constant (operand: i32)
    ConstI32 = 0x07,
    /// Push string constant from pool (operand: u32 index)
    ConstStr = 0x09,

    // ===== Locals & Globals (0x10-0x1F) =====
    /// Load local variable onto stack (operand: u16 index)
    LoadLocal = 0x10,
    /// Store top of stack to local variable (operand: u16 index)
    StoreLocal = 0x11,
    /// Load module global (operand: u32 index)
    LoadGlobal = 0x18,
    /// Store top of stack to module global (operand: u32 index)
    StoreGlobal = 0x19,

    // ===== Integer Arithmetic (0x20-0x2F) =====
    /// Integer addition: pop b, pop a, push a + b (wrapping)
    Iadd = 0x20,
    /// Integer subtraction: pop b, pop a, push a - b (wrapping)
    Isub = 0x21,
    /// Integer multiplication: pop b, pop a, push a * b (wrapping)
    Imul = 0x22,
    /// Integer division: pop b, pop a, push a / b
    Idiv = 0x23,
    /// Integer remainder: pop b, pop a, push a % b
    Imod = 0x24,
    /// Integer negation
    Ineg = 0x25,

    // ===== Integer Comparison (0x50-0x5F) =====
    /// Integer equal
    Ieq = 0x50,
    /// Integer not equal
    Ine = 0x51,
    /// Integer less than
    Ilt = 0x52,
    /// Integer less or equal
    Ile = 0x53,
    /// Integer greater than
    Igt = 0x54,
    /// Integer greater or equal
    Ige = 0x55,

    // ===== Generic Comparison & Logical (0x70-0x7F) =====
    /// Structural equality for any two values
    Eq = 0x70,
    /// Structural inequality for any two values
    Ne = 0x71,
    /// Logical not (operand must be bool)
    Not = 0x74,

    // ===== Strings (0x80-0x8F) =====
    /// Concatenate two strings
    Sconcat = 0x80,
    /// Length of a string in bytes
    Slen = 0x81,

    // ===== Control Flow (0x90-0x9F) =====
    /// Unconditional jump (operand: i32 offset relative to next instruction)
    Jmp = 0x90,
    /// Jump if top of stack is false (operand: i32)
    JmpIfFalse = 0x91,
    /// Jump if top of stack is true (operand: i32)
    JmpIfTrue = 0x92,

    // ===== Calls (0xA0-0xAF) =====
    /// Call a function in the same module (operands: u32 function index, u16 argc)
    Call = 0xA0,
    /// Return top of stack to caller
    Return = 0xA1,
    /// Call an imported native function (operands: u32 native slot, u16 argc)
    CallNative = 0xA8,

    // ===== Arrays (0xC0-0xCF) =====
    /// Build an array from the top N stack values (operand: u32 count)
    NewArray = 0xC0,
    /// Pop index, pop array, push element
    LoadElem = 0xC1,
    /// Pop value, pop index, pop array, store element
    StoreElem = 0xC2,
    /// Pop array, push its length
    ArrayLen = 0xC3,
    /// Pop object or error, push the named field or null (operand: u32 constant index)
    LoadField = 0xC4,

    // ===== Tasks (0xD0-0xDF) =====
    /// Spawn a sub-task (operands: u32 function index, u16 argc); pushes task id
    Spawn = 0xD0,
    /// Pop task id, wait for it and push its result
    Await = 0xD1,
    /// Give up the rest of the current time slice
    Yield = 0xD2,

    // ===== Error Handling (0xE0-0xEF) =====
    /// Install an exception handler (operand: i32 offset to handler)
    Try = 0xE0,
    /// Remove the innermost exception handler
    EndTry = 0xE1,
    /// Throw the top of stack as an error
    Throw = 0xE2,
}

impl Opcode {
    /// Convert a byte to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x03 => Some(Self::Swap),
            0x04 => Some(Self::ConstNull),
            0x05 => Some(Self::ConstTrue),
            0x06 => Some(Self::ConstFalse),
            0x07 => Some(Self::ConstI32),
            0x09 => Some(Self::ConstStr),

            0x10 => Some(Self::LoadLocal),
            0x11 => Some(Self::StoreLocal),
            0x18 => Some(Self::LoadGlobal),
            0x19 => Some(Self::StoreGlobal),

            0x20 => Some(Self::Iadd),
            0x21 => Some(Self::Isub),
            0x22 => Some(Self::Imul),
            0x23 => Some(Self::Idiv),
            0x24 => Some(Self::Imod),
            0x25 => Some(Self::Ineg),

            0x50 => Some(Self::Ieq),
            0x51 => Some(Self::Ine),
            0x52 => Some(Self::Ilt),
            0x53 => Some(Self::Ile),
            0x54 => Some(Self::Igt),
            0x55 => Some(Self::Ige),

            0x70 => Some(Self::Eq),
            0x71 => Some(Self::Ne),
            0x74 => Some(Self::Not),

            0x80 => Some(Self::Sconcat),
            0x81 => Some(Self::Slen),

            0x90 => Some(Self::Jmp),
            0x91 => Some(Self::JmpIfFalse),
            0x92 => Some(Self::JmpIfTrue),

            0xA0 => Some(Self::Call),
            0xA1 => Some(Self::Return),
            0xA8 => Some(Self::CallNative),

            0xC0 => Some(Self::NewArray),
            0xC1 => Some(Self::LoadElem),
            0xC2 => Some(Self::StoreElem),
            0xC3 => Some(Self::ArrayLen),
            0xC4 => Some(Self::LoadField),

            0xD0 => Some(Self::Spawn),
            0xD1 => Some(Self::Await),
            0xD2 => Some(Self::Yield),

            0xE0 => Some(Self::Try),
            0xE1 => Some(Self::EndTry),
            0xE2 => Some(Self::Throw),

            _ => None,
        }
    }

    /// Convert opcode to byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Size in bytes of the operands that follow this opcode
    pub fn operand_size(self) -> usize {
        match self {
            Self::LoadLocal | Self::StoreLocal => 2,
            Self::ConstI32
            | Self::ConstStr
            | Self::LoadGlobal
            | Self::StoreGlobal
            | Self::Jmp
            | Self::JmpIfFalse
            | Self::JmpIfTrue
            | Self::NewArray
            | Self::LoadField
            | Self::Try => 4,
            Self::Call | Self::CallNative | Self::Spawn => 6,
            _ => 0,
        }
    }

    /// Whether this opcode carries a relative i32 branch offset
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jmp | Self::JmpIfFalse | Self::JmpIfTrue | Self::Try
        )
    }

    /// Whether control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Return | Self::Jmp | Self::Throw)
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::Swap => "SWAP",
            Self::ConstNull => "CONST_NULL",
            Self::ConstTrue => "CONST_TRUE",
            Self::ConstFalse => "CONST_FALSE",
            Self::ConstI32 => "CONST_I32",
            Self::ConstStr => "CONST_STR",
            Self::LoadLocal => "LOAD_LOCAL",
            Self::StoreLocal => "STORE_LOCAL",
            Self::LoadGlobal => "LOAD_GLOBAL",
            Self::StoreGlobal => "STORE_GLOBAL",
            Self::Iadd => "IADD",
            Self::Isub => "ISUB",
            Self::Imul => "IMUL",
            Self::Idiv => "IDIV",
            Self::Imod => "IMOD",
            Self::Ineg => "INEG",
            Self::Ieq => "IEQ",
            Self::Ine => "INE",
            Self::Ilt => "ILT",
            Self::Ile => "ILE",
            Self::Igt => "IGT",
            Self::Ige => "IGE",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Not => "NOT",
            Self::Sconcat => "SCONCAT",
            Self::Slen => "SLEN",
            Self::Jmp => "JMP",
            Self::JmpIfFalse => "JMP_IF_FALSE",
            Self::JmpIfTrue => "JMP_IF_TRUE",
            Self::Call => "CALL",
            Self::Return => "RETURN",
            Self::CallNative => "CALL_NATIVE",
            Self::NewArray => "NEW_ARRAY",
            Self::LoadElem => "LOAD_ELEM",
            Self::StoreElem => "STORE_ELEM",
            Self::ArrayLen => "ARRAY_LEN",
            Self::LoadField => "LOAD_FIELD",
            Self::Spawn => "SPAWN",
            Self::Await => "AWAIT",
            Self::Yield => "YIELD",
            Self::Try => "TRY",
            Self::EndTry => "END_TRY",
            Self::Throw => "THROW",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_mapping() {
        for byte in 0..=255u8 {
            if let Some(op) = Opcode::from_u8(byte) {
                assert_eq!(op.to_u8(), byte, "{} maps back to a different byte", op);
            }
        }
    }

    #[test]
    fn test_unknown_bytes_rejected() {
        assert_eq!(Opcode::from_u8(0x08), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_operand_sizes() {
        assert_eq!(Opcode::Return.operand_size(), 0);
        assert_eq!(Opcode::LoadLocal.operand_size(), 2);
        assert_eq!(Opcode::ConstI32.operand_size(), 4);
        assert_eq!(Opcode::CallNative.operand_size(), 6);
    }

    #[test]
    fn test_terminators() {
        assert!(Opcode::Return.is_terminator());
        assert!(Opcode::Throw.is_terminator());
        assert!(!Opcode::JmpIfFalse.is_terminator());
        assert!(Opcode::Try.is_jump());
    }
}
