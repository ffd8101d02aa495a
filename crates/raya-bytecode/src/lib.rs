//! Raya VM Bytecode Definitions
//!
//! This crate provides the instruction set, the `.rbin` module container,
//! the constant pool and the load-time verifier used by the Raya VM.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod constants;
pub mod encoder;
pub mod module;
pub mod opcode;
pub mod verify;

pub use constants::ConstantPool;
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError, JumpPatch};
pub use module::{Function, Import, Metadata, Module, ModuleError, NativeSlot, NATIVE_PREFIX};
pub use opcode::Opcode;
pub use verify::{verify_module, VerifyError};
