//! Bytecode module format (`.rbin`)

use crate::constants::ConstantPool;
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use thiserror::Error;

/// Magic number for Raya bytecode files: "RAYA"
pub const MAGIC: [u8; 4] = *b"RAYA";

/// Current bytecode version
pub const VERSION: u32 = 1;

/// Size of the fixed header: magic + version + flags + checksum
pub const HEADER_SIZE: usize = 16;

/// Import specifier prefix for native modules
pub const NATIVE_PREFIX: &str = "native:";

/// Module encoding/decoding errors
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected RAYA, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum stored in the header
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// Bytes left over after the metadata section
    #[error("{0} trailing bytes after module payload")]
    TrailingBytes(usize),
}

/// A compiled Raya module
#[derive(Debug, Clone)]
pub struct Module {
    /// Magic number (must be "RAYA")
    pub magic: [u8; 4],
    /// Bytecode version
    pub version: u32,
    /// Module flags
    pub flags: u32,
    /// Constant pool
    pub constants: ConstantPool,
    /// Native imports, in declaration order
    pub imports: Vec<Import>,
    /// Global variable names; index is the `LOAD_GLOBAL` operand
    pub globals: Vec<String>,
    /// Function definitions
    pub functions: Vec<Function>,
    /// Module metadata
    pub metadata: Metadata,
}

/// Module flags
pub mod flags {
    /// Module has debug information
    pub const HAS_DEBUG_INFO: u32 = 1 << 0;
}

/// An import declaration such as `native:crypto` with the symbols it uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Full specifier, e.g. `native:crypto`
    pub specifier: String,
    /// Imported function names
    pub symbols: Vec<String>,
}

impl Import {
    /// Create a `native:<module>` import
    pub fn native(module: &str, symbols: &[&str]) -> Self {
        Self {
            specifier: format!("{NATIVE_PREFIX}{module}"),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Module name if this is a native import
    pub fn native_module(&self) -> Option<&str> {
        self.specifier.strip_prefix(NATIVE_PREFIX)
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.specifier);
        writer.emit_u32(self.symbols.len() as u32);
        for symbol in &self.symbols {
            writer.emit_string(symbol);
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let specifier = reader.read_string()?;
        let count = reader.read_u32()? as usize;
        let mut symbols = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            symbols.push(reader.read_string()?);
        }
        Ok(Self { specifier, symbols })
    }
}

/// One entry of the flattened native import table used by `CALL_NATIVE`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NativeSlot {
    /// Native module name (without the `native:` prefix)
    pub module: String,
    /// Function name inside that module
    pub symbol: String,
}

/// Function definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Function name
    pub name: String,
    /// Number of parameters
    pub param_count: usize,
    /// Number of local variables (parameters included)
    pub local_count: usize,
    /// Bytecode instructions
    pub code: Vec<u8>,
}

impl Function {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_u32(self.param_count as u32);
        writer.emit_u32(self.local_count as u32);
        writer.emit_bytes(&self.code);
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let param_count = reader.read_u32()? as usize;
        let local_count = reader.read_u32()? as usize;
        let code = reader.read_len_prefixed()?;
        Ok(Self {
            name,
            param_count,
            local_count,
            code,
        })
    }
}

/// Module metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Module name
    pub name: String,
    /// Source file path
    pub source_file: Option<String>,
}

impl Metadata {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        match &self.source_file {
            Some(path) => {
                writer.emit_u8(1);
                writer.emit_string(path);
            }
            None => writer.emit_u8(0),
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let source_file = match reader.read_u8()? {
            0 => None,
            _ => Some(reader.read_string()?),
        };
        Ok(Self { name, source_file })
    }
}

impl Module {
    /// Create a new empty module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            constants: ConstantPool::new(),
            imports: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            metadata: Metadata {
                name: name.into(),
                source_file: None,
            },
        }
    }

    /// Module name from metadata
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Append a function, returning its index for `CALL`/`SPAWN`
    pub fn add_function(&mut self, function: Function) -> u32 {
        self.functions.push(function);
        (self.functions.len() - 1) as u32
    }

    /// Declare a global, returning its index
    pub fn add_global(&mut self, name: impl Into<String>) -> u32 {
        self.globals.push(name.into());
        (self.globals.len() - 1) as u32
    }

    /// Declare a native import, returning the slot of its first symbol
    pub fn add_native_import(&mut self, module: &str, symbols: &[&str]) -> u32 {
        let base = self.native_slot_count() as u32;
        self.imports.push(Import::native(module, symbols));
        base
    }

    /// Index of a function by name
    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    /// Total number of `CALL_NATIVE` slots
    pub fn native_slot_count(&self) -> usize {
        self.imports.iter().map(|i| i.symbols.len()).sum()
    }

    /// Flatten imports into the slot table addressed by `CALL_NATIVE`
    ///
    /// Imports that are not `native:` specifiers are skipped; the verifier
    /// rejects them before a module is linked.
    pub fn native_slots(&self) -> Vec<NativeSlot> {
        self.imports
            .iter()
            .filter_map(|import| import.native_module().map(|m| (m, import)))
            .flat_map(|(module, import)| {
                import.symbols.iter().map(move |symbol| NativeSlot {
                    module: module.to_string(),
                    symbol: symbol.clone(),
                })
            })
            .collect()
    }

    /// Names of the native modules this module needs, deduplicated
    pub fn required_native_modules(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.imports.iter().filter_map(Import::native_module) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Encode the module to binary format (.rbin)
    ///
    /// Format:
    /// - Header: magic (4 bytes) + version (u32) + flags (u32) + CRC32 of payload (u32)
    /// - Constant pool
    /// - Import table
    /// - Global names
    /// - Function table
    /// - Metadata
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::new();

        writer.emit_raw(&self.magic);
        writer.emit_u32(self.version);
        writer.emit_u32(self.flags);
        let checksum_offset = writer.offset();
        writer.emit_u32(0);

        self.constants.encode(&mut writer);

        writer.emit_u32(self.imports.len() as u32);
        for import in &self.imports {
            import.encode(&mut writer);
        }

        writer.emit_u32(self.globals.len() as u32);
        for global in &self.globals {
            writer.emit_string(global);
        }

        writer.emit_u32(self.functions.len() as u32);
        for func in &self.functions {
            func.encode(&mut writer);
        }

        self.metadata.encode(&mut writer);

        let checksum = crc32fast::hash(&writer.buffer()[HEADER_SIZE..]);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode a module from binary format
    pub fn decode(data: &[u8]) -> Result<Self, ModuleError> {
        let mut reader = BytecodeReader::new(data);

        let magic_bytes = reader.read_bytes(4)?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&magic_bytes);
        if magic != MAGIC {
            return Err(ModuleError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ModuleError::UnsupportedVersion(version));
        }

        let flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;

        let calculated_checksum = crc32fast::hash(&data[HEADER_SIZE..]);
        if stored_checksum != calculated_checksum {
            return Err(ModuleError::ChecksumMismatch {
                expected: stored_checksum,
                actual: calculated_checksum,
            });
        }

        let constants = ConstantPool::decode(&mut reader)?;

        let import_count = reader.read_u32()? as usize;
        let mut imports = Vec::with_capacity(import_count.min(reader.remaining()));
        for _ in 0..import_count {
            imports.push(Import::decode(&mut reader)?);
        }

        let global_count = reader.read_u32()? as usize;
        let mut globals = Vec::with_capacity(global_count.min(reader.remaining()));
        for _ in 0..global_count {
            globals.push(reader.read_string()?);
        }

        let func_count = reader.read_u32()? as usize;
        let mut functions = Vec::with_capacity(func_count.min(reader.remaining()));
        for _ in 0..func_count {
            functions.push(Function::decode(&mut reader)?);
        }

        let metadata = Metadata::decode(&mut reader)?;

        if reader.has_more() {
            return Err(ModuleError::TrailingBytes(reader.remaining()));
        }

        Ok(Self {
            magic,
            version,
            flags,
            constants,
            imports,
            globals,
            functions,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn sample() -> Module {
        let mut module = Module::new("sample");
        module.constants.add_string("sha256");
        module.add_native_import("crypto", &["hash", "randomBytes"]);
        module.add_native_import("fs", &["exists"]);
        module.add_global("counter");
        module.add_function(Function {
            name: "main".to_string(),
            param_count: 0,
            local_count: 0,
            code: vec![Opcode::ConstNull as u8, Opcode::Return as u8],
        });
        module
    }

    #[test]
    fn test_module_roundtrip() {
        let module = sample();
        let decoded = Module::decode(&module.encode()).unwrap();
        assert_eq!(decoded.name(), "sample");
        assert_eq!(decoded.imports, module.imports);
        assert_eq!(decoded.globals, vec!["counter".to_string()]);
        assert_eq!(decoded.functions, module.functions);
        assert_eq!(decoded.constants.get_string(0), Some("sha256"));
    }

    #[test]
    fn test_native_slots_are_flattened_in_order() {
        let module = sample();
        let slots = module.native_slots();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[1].module, "crypto");
        assert_eq!(slots[1].symbol, "randomBytes");
        assert_eq!(slots[2].module, "fs");
        assert_eq!(module.required_native_modules(), vec!["crypto", "fs"]);
    }

    #[test]
    fn test_checksum_validation() {
        let mut bytes = sample().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            Module::decode(&bytes),
            Err(ModuleError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_magic_number() {
        let mut bytes = sample().encode();
        bytes[0] = b'X';
        assert!(matches!(
            Module::decode(&bytes),
            Err(ModuleError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut module = sample();
        module.version = 99;
        assert!(matches!(
            Module::decode(&module.encode()),
            Err(ModuleError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(
            Module::decode(b"RAY"),
            Err(ModuleError::DecodeError(_))
        ));
        let bytes = sample().encode();
        assert!(Module::decode(&bytes[..bytes.len() / 2]).is_err());
    }
}
