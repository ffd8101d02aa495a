//! Module system
//!
//! Native modules are registered per VM before bytecode that imports them
//! is loaded; the linker binds every `native:<name>` import slot to a
//! function pointer at load time so execution never looks names up.

mod linker;
mod registry;

pub use linker::{LinkError, LinkedModule, ModuleLinker, ResolvedNative};
pub use registry::{NativeModuleRegistry, RegistryError};
