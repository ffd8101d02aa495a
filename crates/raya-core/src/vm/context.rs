//! VM Execution Context
//!
//! Each VmContext represents an isolated execution environment with:
//! - Its own heap and garbage collector
//! - Loaded modules and their globals
//! - A task scheduler
//! - The native modules registered for linking
//! - Resource limits and accounting

use super::lifecycle::VmError;
use crate::gc::{GarbageCollector, GcStats, HeapStats};
use crate::module::{LinkedModule, ModuleLinker, NativeModuleRegistry};
use crate::scheduler::{Scheduler, SchedulerLimits};
use crate::snapshot::RestoredState;
use crate::value::Value;
use raya_bytecode::{verify_module, Module};
use raya_sdk::NativeModule;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a VmContext
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmContextId(u64);

impl VmContextId {
    /// Create a new unique context ID
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        VmContextId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for VmContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource limits for a VmContext
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    /// Maximum heap size in bytes (None = unlimited)
    pub max_heap_bytes: Option<usize>,

    /// Maximum number of unfinished tasks (None = unlimited)
    pub max_tasks: Option<usize>,

    /// Maximum instructions per `run_entry` (None = unlimited)
    pub max_step_budget: Option<u64>,
}

impl ResourceLimits {
    /// Create unlimited resource limits
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Create resource limits with specific heap size
    pub fn with_heap_limit(max_heap_bytes: usize) -> Self {
        Self {
            max_heap_bytes: Some(max_heap_bytes),
            ..Default::default()
        }
    }

    /// Create resource limits with task limit
    pub fn with_task_limit(max_tasks: usize) -> Self {
        Self {
            max_tasks: Some(max_tasks),
            ..Default::default()
        }
    }

    /// Create resource limits with CPU step budget
    pub fn with_step_budget(max_step_budget: u64) -> Self {
        Self {
            max_step_budget: Some(max_step_budget),
            ..Default::default()
        }
    }
}

/// Resource usage counters for a VmContext
#[derive(Debug, Default)]
pub struct ResourceCounters {
    /// Total instructions executed
    total_steps: AtomicU64,

    /// Entry points run
    entries_run: AtomicU64,

    /// Native functions invoked
    native_calls: AtomicU64,
}

impl ResourceCounters {
    /// Create new resource counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment step counter
    pub fn increment_steps(&self, count: u64) {
        self.total_steps.fetch_add(count, Ordering::Relaxed);
    }

    /// Get total steps executed
    pub fn total_steps(&self) -> u64 {
        self.total_steps.load(Ordering::Relaxed)
    }

    /// Count a `run_entry`
    pub fn record_entry(&self) {
        self.entries_run.fetch_add(1, Ordering::Relaxed);
    }

    /// Entry points run so far
    pub fn entries_run(&self) -> u64 {
        self.entries_run.load(Ordering::Relaxed)
    }

    /// Count a native call
    pub fn record_native_call(&self) {
        self.native_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Native calls so far
    pub fn native_calls(&self) -> u64 {
        self.native_calls.load(Ordering::Relaxed)
    }

    /// Reset counters
    pub fn reset(&self) {
        self.total_steps.store(0, Ordering::Relaxed);
        self.entries_run.store(0, Ordering::Relaxed);
        self.native_calls.store(0, Ordering::Relaxed);
    }
}

/// Options for creating a VM
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Resource limits
    pub limits: ResourceLimits,

    /// Initial GC threshold in bytes
    pub gc_threshold: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            gc_threshold: 1024 * 1024, // 1 MB
        }
    }
}

/// VM Execution Context
///
/// Fields are crate-visible so the interpreter can borrow the heap, the
/// scheduler and the module table independently.
pub struct VmContext {
    pub(crate) id: VmContextId,
    pub(crate) gc: GarbageCollector,
    pub(crate) modules: Vec<LinkedModule>,
    pub(crate) globals: Vec<Vec<Value>>,
    pub(crate) scheduler: Scheduler,
    pub(crate) natives: NativeModuleRegistry,
    limits: ResourceLimits,
    counters: ResourceCounters,
}

impl VmContext {
    /// Create a new VM context with default options
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a new VM context with specific options
    pub fn with_options(options: VmOptions) -> Self {
        let mut gc = GarbageCollector::new(options.gc_threshold);
        gc.set_max_heap_size(options.limits.max_heap_bytes);

        Self {
            id: VmContextId::new(),
            gc,
            modules: Vec::new(),
            globals: Vec::new(),
            scheduler: Scheduler::new(SchedulerLimits {
                max_tasks: options.limits.max_tasks,
            }),
            natives: NativeModuleRegistry::new(),
            limits: options.limits,
            counters: ResourceCounters::new(),
        }
    }

    /// Get the context ID
    pub fn id(&self) -> VmContextId {
        self.id
    }

    /// Get a reference to the garbage collector
    pub fn gc(&self) -> &GarbageCollector {
        &self.gc
    }

    /// Get GC statistics
    pub fn gc_stats(&self) -> &GcStats {
        self.gc.stats()
    }

    /// Get heap statistics
    pub fn heap_stats(&self) -> HeapStats {
        self.gc.heap_stats()
    }

    /// Get resource limits
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Get resource counters
    pub fn counters(&self) -> &ResourceCounters {
        &self.counters
    }

    /// Loaded modules in load order
    pub fn modules(&self) -> &[LinkedModule] {
        &self.modules
    }

    /// Native modules available for linking
    pub fn natives(&self) -> &NativeModuleRegistry {
        &self.natives
    }

    /// Make a native module available to code loaded afterwards
    pub fn register_native(&mut self, module: Arc<NativeModule>) -> Result<(), VmError> {
        self.natives.register(module)?;
        Ok(())
    }

    /// Verify, link and install a module
    ///
    /// Nothing changes unless every step succeeds.
    pub fn load(&mut self, module: Module) -> Result<usize, VmError> {
        verify_module(&module)?;
        if self.module_index(module.name()).is_some() {
            return Err(VmError::DuplicateModule(module.name().to_string()));
        }

        let linked = ModuleLinker::new(&self.natives).link(Arc::new(module))?;
        let index = self.modules.len();
        self.globals.push(vec![Value::Null; linked.module.globals.len()]);
        self.modules.push(linked);
        Ok(index)
    }

    /// Index of a loaded module by name
    pub fn module_index(&self, name: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.name() == name)
    }

    /// Resolve `main` or `module.main` to (module, function)
    ///
    /// Unqualified names match the first module in load order that defines
    /// them. Entry points take no parameters.
    pub fn resolve_entry(&self, name: &str) -> Result<(usize, usize), VmError> {
        let qualified = name.rsplit_once('.').and_then(|(module, function)| {
            let m = self.module_index(module)?;
            Some((m, self.modules[m].module.function_index(function)?))
        });
        let found = qualified.or_else(|| {
            self.modules
                .iter()
                .enumerate()
                .find_map(|(m, linked)| Some((m, linked.module.function_index(name)?)))
        });

        let (module, function) =
            found.ok_or_else(|| VmError::EntryPointNotFound(name.to_string()))?;
        let expected = self.modules[module].module.functions[function].param_count;
        if expected != 0 {
            return Err(VmError::EntryPointArity {
                name: name.to_string(),
                expected,
            });
        }
        Ok((module, function))
    }

    /// Current value of a global, `name` or `module.name`
    pub fn global(&self, name: &str) -> Option<Value> {
        let lookup = |m: usize, global: &str| {
            let index = self.modules[m].module.globals.iter().position(|g| g == global)?;
            self.globals[m].get(index).copied()
        };

        name.rsplit_once('.')
            .and_then(|(module, global)| lookup(self.module_index(module)?, global))
            .or_else(|| (0..self.modules.len()).find_map(|m| lookup(m, name)))
    }

    /// Run garbage collection from globals and task roots
    pub fn collect_garbage(&mut self) -> usize {
        let roots = self
            .globals
            .iter()
            .flatten()
            .copied()
            .chain(self.scheduler.roots());
        self.gc.collect(roots)
    }

    /// Drop all tasks and reclaim what they held
    pub fn reset_tasks(&mut self) {
        self.scheduler.clear();
        self.collect_garbage();
    }

    /// Replace everything but the native registry with restored state
    pub(crate) fn install(&mut self, state: RestoredState) {
        self.modules = state.modules;
        self.globals = state.globals;
        self.gc.replace_heap(state.heap);
        self.scheduler.restore(state.next_task_id, state.tasks);
        self.collect_garbage();
    }
}

impl Default for VmContext {
    fn default() -> Self {
        Self::new()
    }
}
