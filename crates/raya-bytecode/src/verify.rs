//! Bytecode verification
//!
//! Run at load time so the interpreter can trust operand indices and jump
//! targets without re-checking them on every dispatch.

use crate::encoder::{BytecodeReader, DecodeError};
use crate::module::{Function, Module, NATIVE_PREFIX};
use crate::opcode::Opcode;
use std::collections::HashSet;

/// Bytecode verification errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// Instruction stream could not be decoded
    #[error("in function '{function}': {source}")]
    Decode {
        /// Function being verified
        function: String,
        /// Underlying decode failure
        source: DecodeError,
    },

    /// Invalid jump target
    #[error("in function '{function}': jump at offset {offset} targets {target}, which is not an instruction boundary")]
    InvalidJumpTarget {
        /// Function being verified
        function: String,
        /// Offset of the jump instruction
        offset: usize,
        /// Resolved target offset
        target: i64,
    },

    /// Operand refers past the end of the table it indexes
    #[error("in function '{function}': {what} index {index} out of range (count {count}) at offset {offset}")]
    IndexOutOfRange {
        /// Function being verified
        function: String,
        /// Which table is indexed
        what: &'static str,
        /// Operand value
        index: u32,
        /// Number of entries in the table
        count: usize,
        /// Offset of the instruction
        offset: usize,
    },

    /// CALL/SPAWN argument count disagrees with the callee
    #[error("in function '{function}': call to '{callee}' passes {argc} arguments, expected {expected}")]
    ArityMismatch {
        /// Function being verified
        function: String,
        /// Callee name
        callee: String,
        /// Arguments passed
        argc: u16,
        /// Callee parameter count
        expected: usize,
    },

    /// Execution falls off end
    #[error("in function '{0}': execution falls off the end of the function")]
    FallOffEnd(String),

    /// Parameters do not fit in the declared locals
    #[error("function '{name}' declares {param_count} parameters but only {local_count} locals")]
    BadFrameLayout {
        /// Function name
        name: String,
        /// Declared parameters
        param_count: usize,
        /// Declared locals
        local_count: usize,
    },

    /// Two functions share a name
    #[error("duplicate function name '{0}'")]
    DuplicateFunction(String),

    /// Import specifier is not `native:<name>`
    #[error("unsupported import specifier '{0}' (only native:<name> imports are supported)")]
    UnsupportedImport(String),
}

/// Verify a module's structure and bytecode
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    for import in &module.imports {
        match import.specifier.strip_prefix(NATIVE_PREFIX) {
            Some(name) if !name.is_empty() => {}
            _ => return Err(VerifyError::UnsupportedImport(import.specifier.clone())),
        }
    }

    let mut names = HashSet::new();
    for function in &module.functions {
        if !names.insert(function.name.as_str()) {
            return Err(VerifyError::DuplicateFunction(function.name.clone()));
        }
        verify_function(function, module)?;
    }

    Ok(())
}

/// A decoded instruction with its raw operands
#[derive(Debug, Clone, Copy)]
struct Instruction {
    offset: usize,
    opcode: Opcode,
    /// Primary operand (index, count or jump offset)
    a: u32,
    /// Secondary operand (argc for calls)
    b: u16,
    /// Offset of the following instruction
    next: usize,
}

fn parse_instructions(code: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut instructions = Vec::new();
    let mut reader = BytecodeReader::new(code);

    while reader.has_more() {
        let offset = reader.position();
        let opcode = reader.read_opcode()?;
        let (a, b) = match opcode.operand_size() {
            0 => (0, 0),
            2 => (reader.read_u16()? as u32, 0),
            4 => (reader.read_u32()?, 0),
            _ => (reader.read_u32()?, reader.read_u16()?),
        };
        instructions.push(Instruction {
            offset,
            opcode,
            a,
            b,
            next: reader.position(),
        });
    }

    Ok(instructions)
}

fn verify_function(function: &Function, module: &Module) -> Result<(), VerifyError> {
    let name = || function.name.clone();

    if function.param_count > function.local_count || function.local_count > u16::MAX as usize + 1
    {
        return Err(VerifyError::BadFrameLayout {
            name: name(),
            param_count: function.param_count,
            local_count: function.local_count,
        });
    }

    let instructions = parse_instructions(&function.code).map_err(|source| VerifyError::Decode {
        function: name(),
        source,
    })?;

    let boundaries: HashSet<usize> = instructions.iter().map(|i| i.offset).collect();
    let native_slots = module.native_slot_count();

    for instr in &instructions {
        let check = |what: &'static str, count: usize| {
            if (instr.a as usize) < count {
                Ok(())
            } else {
                Err(VerifyError::IndexOutOfRange {
                    function: name(),
                    what,
                    index: instr.a,
                    count,
                    offset: instr.offset,
                })
            }
        };

        match instr.opcode {
            Opcode::ConstStr | Opcode::LoadField => check("constant", module.constants.len())?,
            Opcode::LoadLocal | Opcode::StoreLocal => check("local", function.local_count)?,
            Opcode::LoadGlobal | Opcode::StoreGlobal => check("global", module.globals.len())?,
            Opcode::CallNative => check("native import", native_slots)?,
            Opcode::Call | Opcode::Spawn => {
                check("function", module.functions.len())?;
                let callee = &module.functions[instr.a as usize];
                if callee.param_count != instr.b as usize {
                    return Err(VerifyError::ArityMismatch {
                        function: name(),
                        callee: callee.name.clone(),
                        argc: instr.b,
                        expected: callee.param_count,
                    });
                }
            }
            op if op.is_jump() => {
                let target = instr.next as i64 + (instr.a as i32) as i64;
                let valid = target >= 0 && boundaries.contains(&(target as usize));
                if !valid {
                    return Err(VerifyError::InvalidJumpTarget {
                        function: name(),
                        offset: instr.offset,
                        target,
                    });
                }
            }
            _ => {}
        }
    }

    match instructions.last() {
        Some(last) if last.opcode.is_terminator() => Ok(()),
        _ => Err(VerifyError::FallOffEnd(name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::BytecodeWriter;

    fn module_with(code: Vec<u8>, local_count: usize) -> Module {
        let mut module = Module::new("verify_test");
        module.add_function(Function {
            name: "main".to_string(),
            param_count: 0,
            local_count,
            code,
        });
        module
    }

    #[test]
    fn test_valid_function() {
        let mut w = BytecodeWriter::new();
        w.emit_const_i32(1);
        w.emit_store_local(0);
        w.emit_load_local(0);
        w.emit_return();
        assert!(verify_module(&module_with(w.into_bytes(), 1)).is_ok());
    }

    #[test]
    fn test_falls_off_end() {
        let mut w = BytecodeWriter::new();
        w.emit_const_i32(1);
        assert_eq!(
            verify_module(&module_with(w.into_bytes(), 0)),
            Err(VerifyError::FallOffEnd("main".to_string()))
        );
        assert!(verify_module(&module_with(Vec::new(), 0)).is_err());
    }

    #[test]
    fn test_truncated_operand() {
        let code = vec![Opcode::ConstI32 as u8, 1, 0];
        assert!(matches!(
            verify_module(&module_with(code, 0)),
            Err(VerifyError::Decode { .. })
        ));
    }

    #[test]
    fn test_local_out_of_range() {
        let mut w = BytecodeWriter::new();
        w.emit_load_local(3);
        w.emit_return();
        assert!(matches!(
            verify_module(&module_with(w.into_bytes(), 1)),
            Err(VerifyError::IndexOutOfRange { what: "local", index: 3, .. })
        ));
    }

    #[test]
    fn test_jump_into_operand() {
        let mut w = BytecodeWriter::new();
        let jump = w.emit_jump(Opcode::Jmp);
        w.emit_const_i32(7);
        w.emit_return();
        // Land in the middle of CONST_I32's operand
        w.patch_jump_to(jump, 7);
        assert!(matches!(
            verify_module(&module_with(w.into_bytes(), 0)),
            Err(VerifyError::InvalidJumpTarget { target: 7, .. })
        ));
    }

    #[test]
    fn test_native_slot_range() {
        let mut w = BytecodeWriter::new();
        w.emit_call_native(1, 0);
        w.emit_return();
        let mut module = module_with(w.into_bytes(), 0);
        module.add_native_import("crypto", &["hash"]);
        assert!(matches!(
            verify_module(&module),
            Err(VerifyError::IndexOutOfRange { what: "native import", .. })
        ));
    }

    #[test]
    fn test_call_arity_checked() {
        let mut w = BytecodeWriter::new();
        w.emit_const_i32(1);
        w.emit_call(1, 1);
        w.emit_return();
        let mut module = module_with(w.into_bytes(), 0);
        module.add_function(Function {
            name: "helper".to_string(),
            param_count: 2,
            local_count: 2,
            code: vec![Opcode::ConstNull as u8, Opcode::Return as u8],
        });
        assert!(matches!(
            verify_module(&module),
            Err(VerifyError::ArityMismatch { argc: 1, expected: 2, .. })
        ));
    }

    #[test]
    fn test_non_native_import_rejected() {
        let mut module = module_with(vec![Opcode::ConstNull as u8, Opcode::Return as u8], 0);
        module.imports.push(crate::module::Import {
            specifier: "std:math".to_string(),
            symbols: vec!["abs".to_string()],
        });
        assert_eq!(
            verify_module(&module),
            Err(VerifyError::UnsupportedImport("std:math".to_string()))
        );
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let code = vec![Opcode::ConstNull as u8, Opcode::Return as u8];
        let mut module = module_with(code.clone(), 0);
        module.add_function(Function {
            name: "main".to_string(),
            param_count: 0,
            local_count: 0,
            code,
        });
        assert_eq!(
            verify_module(&module),
            Err(VerifyError::DuplicateFunction("main".to_string()))
        );
    }
}
