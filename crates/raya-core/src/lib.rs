//! Raya VM Core Runtime
//!
//! This crate provides the embeddable virtual machine:
//! - Bytecode interpreter with structured exceptions
//! - Task scheduler (cooperative green threads)
//! - Garbage collector
//! - Native module linking
//! - Snapshot and restore
//!
//! # Example
//!
//! ```
//! use raya_core::{Vm, VmOptions};
//!
//! let vm = Vm::new(VmOptions::default()).unwrap();
//! assert!(vm.run_entry("main").is_err());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod log;
pub mod value;
pub mod gc;
pub mod module;
pub mod scheduler;
pub mod snapshot;
pub mod vm;

pub use value::Value;
pub use gc::{GarbageCollector, Heap, HeapObject};
pub use module::{LinkError, NativeModuleRegistry, RegistryError};
pub use scheduler::{Scheduler, TaskId};
pub use snapshot::{SnapshotError, VmSnapshot};
pub use vm::marshal::{marshal, unmarshal};
pub use vm::{
    ResourceCounters, ResourceLimits, Vm, VmContext, VmContextId, VmError, VmOptions, VmStats,
};

/// Runtime version, `MAJOR.MINOR.PATCH`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
