//! VM Lifecycle & Control API
//!
//! High-level API for creating, loading, running and snapshotting a VM.
//! A `Vm` may be shared between host threads; every operation that touches
//! VM state takes the context lock, so `run_entry` calls on one VM are
//! serialized and a `snapshot` issued during a run waits for it to finish.

use super::context::{VmContext, VmContextId, VmOptions};
use super::interpreter::Interpreter;
use super::marshal::marshal;
use crate::module::{LinkError, RegistryError};
use crate::snapshot::{SnapshotError, VmSnapshot};
use crate::{vm_debug, vm_info};
use parking_lot::Mutex;
use raya_bytecode::{Module, ModuleError, VerifyError};
use raya_sdk::{ErrorKind, NativeModule, NativeValue};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during VM operations
#[derive(Debug, Error)]
pub enum VmError {
    /// Invalid options at creation
    #[error("VM initialization failed: {0}")]
    Init(String),

    /// IO error (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid binary format
    #[error("Invalid binary format: {0}")]
    InvalidBinaryFormat(#[from] ModuleError),

    /// Bytecode failed verification
    #[error("Bytecode verification failed: {0}")]
    Verification(#[from] VerifyError),

    /// A native import could not be resolved
    #[error("{0}")]
    Link(#[from] LinkError),

    /// A module with the same name is already loaded
    #[error("Module '{0}' is already loaded")]
    DuplicateModule(String),

    /// Native module registration failed
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// Entry point not found
    #[error("Entry point not found: {0}")]
    EntryPointNotFound(String),

    /// Entry point declares parameters
    #[error("Entry point '{name}' expects {expected} arguments; entry points take none")]
    EntryPointArity {
        /// Requested name
        name: String,
        /// Declared parameter count
        expected: usize,
    },

    /// Execution error
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Run stopped by `terminate`
    #[error("Execution terminated")]
    Terminated,

    /// Resource limit exceeded
    #[error("Resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    /// Snapshot capture, encoding or restore failed
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Built without snapshot support
    #[error("Snapshots are not supported by this build")]
    SnapshotUnsupported,
}

impl VmError {
    /// Error category reported across the C ABI
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmError::Init(_) => ErrorKind::Init,
            VmError::IoError(_)
            | VmError::InvalidBinaryFormat(_)
            | VmError::Verification(_)
            | VmError::Link(_)
            | VmError::DuplicateModule(_)
            | VmError::Registry(_) => ErrorKind::Load,
            VmError::EntryPointNotFound(_)
            | VmError::EntryPointArity { .. }
            | VmError::ExecutionError(_)
            | VmError::Terminated
            | VmError::ResourceLimitExceeded(_)
            | VmError::Snapshot(_) => ErrorKind::Runtime,
            VmError::SnapshotUnsupported => ErrorKind::Unsupported,
        }
    }
}

/// Statistics for a VM
#[derive(Debug, Clone)]
pub struct VmStats {
    /// Current heap usage in bytes
    pub heap_bytes_used: usize,

    /// Live heap objects
    pub heap_objects: usize,

    /// Maximum heap size limit (0 = unlimited)
    pub max_heap_bytes: usize,

    /// Maximum task limit (0 = unlimited)
    pub max_tasks: usize,

    /// Tasks spawned over the VM's lifetime
    pub tasks_spawned: u64,

    /// Total CPU steps executed
    pub steps_executed: u64,

    /// Entry points run
    pub entries_run: u64,

    /// Native functions invoked
    pub native_calls: u64,

    /// Garbage collections performed
    pub gc_collections: usize,

    /// Loaded bytecode modules
    pub modules_loaded: usize,
}

/// High-level VM handle
///
/// Owns a VmContext and provides:
/// - Loading bytecode (.rbin files)
/// - Executing entry points
/// - Cooperative termination
/// - Observing stats
/// - Snapshotting state
pub struct Vm {
    id: VmContextId,
    context: Arc<Mutex<VmContext>>,
    /// Bumped by `terminate`; a run started under an older value stops
    epoch: Arc<AtomicU64>,
}

impl Vm {
    /// Create a new isolated VM
    ///
    /// # Example
    /// ```
    /// use raya_core::{ResourceLimits, Vm, VmOptions};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let vm = Vm::new(VmOptions {
    ///     limits: ResourceLimits {
    ///         max_heap_bytes: Some(16 * 1024 * 1024),
    ///         ..Default::default()
    ///     },
    ///     ..Default::default()
    /// })?;
    /// assert_eq!(vm.get_stats().max_heap_bytes, 16 * 1024 * 1024);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(options: VmOptions) -> Result<Self, VmError> {
        if options.gc_threshold == 0 {
            return Err(VmError::Init("gc_threshold must be positive".to_string()));
        }
        if options.limits.max_heap_bytes == Some(0) {
            return Err(VmError::Init("max_heap_bytes must be positive".to_string()));
        }
        if options.limits.max_tasks == Some(0) {
            return Err(VmError::Init("max_tasks must be positive".to_string()));
        }

        let context = VmContext::with_options(options);
        let id = context.id();
        vm_debug!("created vm {}", id.as_u64());
        Ok(Self {
            id,
            context: Arc::new(Mutex::new(context)),
            epoch: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Get the context ID
    pub fn context_id(&self) -> VmContextId {
        self.id
    }

    /// Make a native module available to `native:<name>` imports
    ///
    /// Only code loaded afterwards can import it.
    pub fn register_native_module(&self, module: Arc<NativeModule>) -> Result<(), VmError> {
        vm_debug!("vm {}: registering native module {}", self.id.as_u64(), module.name());
        self.context.lock().register_native(module)
    }

    /// Load a .rbin file into this VM
    pub fn load_rbin(&self, path: &Path) -> Result<(), VmError> {
        let bytes = std::fs::read(path)?;
        self.load_rbin_bytes(&bytes)
    }

    /// Load a .rbin from bytes
    ///
    /// Decoding, verification and import resolution all happen before the
    /// VM is touched, so a failed load leaves it unchanged.
    pub fn load_rbin_bytes(&self, bytes: &[u8]) -> Result<(), VmError> {
        let module = Module::decode(bytes)?;
        self.load_module(module)
    }

    /// Load an already decoded module
    pub fn load_module(&self, module: Module) -> Result<(), VmError> {
        let name = module.name().to_string();
        let index = self.context.lock().load(module)?;
        vm_info!("vm {}: loaded module '{}' as #{}", self.id.as_u64(), name, index);
        Ok(())
    }

    /// Names of loaded modules in load order
    pub fn loaded_modules(&self) -> Vec<String> {
        self.context
            .lock()
            .modules()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Run an entry point to completion
    ///
    /// `name` is either a function name, resolved against modules in load
    /// order, or `module.function`. Blocks until the entry task and every
    /// task it spawned have finished, and returns the entry's result.
    ///
    /// # Example
    /// ```
    /// # use raya_core::{Vm, VmOptions, VmError};
    /// let vm = Vm::new(VmOptions::default()).unwrap();
    /// assert!(matches!(vm.run_entry("main"), Err(VmError::EntryPointNotFound(_))));
    /// ```
    pub fn run_entry(&self, name: &str) -> Result<NativeValue, VmError> {
        // Read before locking: a terminate that lands while this call waits
        // for the context must still stop it.
        let start_epoch = self.epoch.load(Ordering::Acquire);
        self.run_entry_since(name, start_epoch)
    }

    fn run_entry_since(&self, name: &str, start_epoch: u64) -> Result<NativeValue, VmError> {
        let mut context = self.context.lock();
        let (module, function) = context.resolve_entry(name)?;
        vm_debug!("vm {}: running {}", self.id.as_u64(), name);

        let result =
            Interpreter::new(&mut context, &self.epoch, start_epoch).run_entry(module, function);
        if let Err(e) = &result {
            vm_debug!("vm {}: {} failed: {}", self.id.as_u64(), name, e);
        }
        result
    }

    /// Stop running tasks
    ///
    /// Never blocks. A `run_entry` in progress on another thread returns
    /// `Terminated` at its next safepoint and drops its tasks; loaded modules
    /// and globals are kept, so the VM stays usable.
    pub fn terminate(&self) -> Result<(), VmError> {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(mut context) = self.context.try_lock() {
            context.reset_tasks();
        }
        vm_info!("vm {}: terminated", self.id.as_u64());
        Ok(())
    }

    /// Get statistics for this VM
    pub fn get_stats(&self) -> VmStats {
        let context = self.context.lock();
        let limits = context.limits();
        let counters = context.counters();
        let heap_stats = context.heap_stats();

        VmStats {
            heap_bytes_used: heap_stats.allocated_bytes,
            heap_objects: heap_stats.allocation_count,
            max_heap_bytes: limits.max_heap_bytes.unwrap_or(0),
            max_tasks: limits.max_tasks.unwrap_or(0),
            tasks_spawned: context.scheduler.stats().spawned,
            steps_executed: counters.total_steps(),
            entries_run: counters.entries_run(),
            native_calls: counters.native_calls(),
            gc_collections: context.gc_stats().collections,
            modules_loaded: context.modules().len(),
        }
    }

    /// Current value of a global, `name` or `module.name`
    pub fn global(&self, name: &str) -> Option<NativeValue> {
        let context = self.context.lock();
        let value = context.global(name)?;
        marshal(value, context.gc().heap()).ok()
    }

    /// Snapshot this VM's complete state
    ///
    /// Waits for a `run_entry` in progress to finish first.
    #[cfg(feature = "snapshot")]
    pub fn snapshot(&self) -> Result<VmSnapshot, VmError> {
        let mut context = self.context.lock();
        context.collect_garbage();
        let snapshot = VmSnapshot::capture(&context);
        vm_info!(
            "vm {}: snapshot with {} module(s), {} object(s)",
            self.id.as_u64(),
            snapshot.modules.len(),
            snapshot.object_count()
        );
        Ok(snapshot)
    }

    /// Snapshot this VM's complete state
    #[cfg(not(feature = "snapshot"))]
    pub fn snapshot(&self) -> Result<VmSnapshot, VmError> {
        Err(VmError::SnapshotUnsupported)
    }

    /// Replace this VM's state with a snapshot
    ///
    /// The snapshot is consumed. Every native module it names must already
    /// be registered here; on any failure the VM is left unchanged.
    #[cfg(feature = "snapshot")]
    pub fn restore(&self, snapshot: VmSnapshot) -> Result<(), VmError> {
        let mut context = self.context.lock();
        let state = snapshot.into_state(context.natives())?;
        context.install(state);
        vm_info!("vm {}: restored snapshot", self.id.as_u64());
        Ok(())
    }

    /// Replace this VM's state with a snapshot
    #[cfg(not(feature = "snapshot"))]
    pub fn restore(&self, _snapshot: VmSnapshot) -> Result<(), VmError> {
        Err(VmError::SnapshotUnsupported)
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm").field("id", &self.id.as_u64()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::ResourceLimits;
    use raya_bytecode::{BytecodeWriter, Function, Module, Opcode};

    #[test]
    fn test_vm_with_limits() {
        let options = VmOptions {
            limits: ResourceLimits::with_heap_limit(1024 * 1024),
            ..Default::default()
        };

        let vm = Vm::new(options).unwrap();
        let stats = vm.get_stats();

        assert_eq!(stats.max_heap_bytes, 1024 * 1024);
        assert_eq!(stats.heap_bytes_used, 0);
        assert_eq!(stats.steps_executed, 0);
    }

    #[test]
    fn test_invalid_options() {
        let options = VmOptions {
            gc_threshold: 0,
            ..Default::default()
        };
        let err = Vm::new(options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Init);
    }

    #[test]
    fn test_vm_terminate_idle() {
        let vm = Vm::new(VmOptions::default()).unwrap();
        vm.terminate().unwrap();
        vm.terminate().unwrap();
    }

    #[test]
    fn test_load_rbin_invalid_bytes() {
        let vm = Vm::new(VmOptions::default()).unwrap();
        let err = vm.load_rbin_bytes(&[0, 1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
    }

    #[test]
    fn test_terminate_before_lock_stops_entry() {
        let mut writer = BytecodeWriter::new();
        let top = writer.offset();
        writer.emit_opcode(Opcode::Nop);
        writer.emit_jump_back(Opcode::Jmp, top);
        let mut module = Module::new("spin");
        module.add_function(Function {
            name: "main".to_string(),
            param_count: 0,
            local_count: 0,
            code: writer.into_bytes(),
        });

        let vm = Vm::new(VmOptions::default()).unwrap();
        vm.load_module(module).unwrap();

        // The run has sampled the epoch but not yet taken the context lock
        let start = vm.epoch.load(Ordering::Acquire);
        vm.terminate().unwrap();
        assert!(matches!(vm.run_entry_since("main", start), Err(VmError::Terminated)));

        // A fresh call is unaffected by the earlier terminate
        assert!(matches!(vm.run_entry("missing"), Err(VmError::EntryPointNotFound(_))));
    }

    #[test]
    fn test_multiple_vms() {
        let vm1 = Vm::new(VmOptions::default()).unwrap();
        let vm2 = Vm::new(VmOptions::default()).unwrap();
        assert_ne!(vm1.context_id(), vm2.context_id());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(VmError::EntryPointNotFound("main".into()).kind(), ErrorKind::Runtime);
        assert_eq!(VmError::SnapshotUnsupported.kind(), ErrorKind::Unsupported);
        assert_eq!(VmError::DuplicateModule("a".into()).kind(), ErrorKind::Load);
        assert_eq!(
            VmError::Link(LinkError::ModuleNotFound("fs".into())).kind(),
            ErrorKind::Load
        );
    }
}
