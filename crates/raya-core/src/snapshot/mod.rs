//! VM Snapshotting - Pause & Resume
//!
//! A snapshot is taken while the VM is quiescent (no task mid-slice). It
//! carries everything needed to continue on another VM, possibly in another
//! process: the loaded modules as encoded `.rbin`, the names of the native
//! modules they import, the heap slot image, global bindings and any
//! unfinished tasks.
//!
//! Restoring requires the target VM to have the same native modules
//! registered. Native modules themselves are never serialized.

pub mod format;
mod heap;
mod reader;
mod task;
mod writer;

pub use format::{SegmentType, SnapshotChecksum, SnapshotError, SnapshotHeader};
pub use heap::HeapSnapshot;
pub use reader::SnapshotReader;
pub use task::SerializedTask;
pub use writer::SnapshotWriter;

use crate::gc::Heap;
use crate::module::{LinkError, LinkedModule, ModuleLinker, NativeModuleRegistry};
use crate::scheduler::Task;
use crate::value::Value;
use crate::vm::VmContext;
use raya_bytecode::{verify_module, Module};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Captured VM state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmSnapshot {
    /// Capture time (Unix epoch millis)
    pub timestamp: u64,
    /// Loaded modules in load order, encoded as `.rbin`
    pub modules: Vec<Vec<u8>>,
    /// Native modules the loaded code imports
    pub native_modules: Vec<String>,
    /// Heap slot image
    pub heap: HeapSnapshot,
    /// Global bindings per module
    pub globals: Vec<Vec<Value>>,
    /// Unfinished and finished tasks
    pub tasks: Vec<SerializedTask>,
    /// Next task id the scheduler hands out
    pub next_task_id: u64,
}

/// Validated state ready to replace a VM's contents
pub(crate) struct RestoredState {
    pub(crate) modules: Vec<LinkedModule>,
    pub(crate) globals: Vec<Vec<Value>>,
    pub(crate) heap: Heap,
    pub(crate) tasks: Vec<Task>,
    pub(crate) next_task_id: u64,
}

impl VmSnapshot {
    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        let mut buf = Vec::new();
        SnapshotWriter::new(self).write_snapshot(&mut buf)?;
        Ok(buf)
    }

    /// Parse and verify serialized bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        SnapshotReader::from_reader(&mut &bytes[..])
    }

    /// Write to a file
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        SnapshotWriter::new(self).write_to_file(path)
    }

    /// Read from a file
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        SnapshotReader::from_file(path)
    }

    /// Number of live heap objects captured
    pub fn object_count(&self) -> usize {
        self.heap.object_count()
    }

    /// Capture a quiescent context
    #[cfg_attr(not(feature = "snapshot"), allow(dead_code))]
    pub(crate) fn capture(ctx: &VmContext) -> Self {
        let mut seen = HashSet::new();
        let native_modules = ctx
            .modules
            .iter()
            .flat_map(|m| m.module.required_native_modules())
            .filter(|name| seen.insert(*name))
            .map(str::to_string)
            .collect();

        Self {
            timestamp: format::now_millis(),
            modules: ctx.modules.iter().map(|m| m.module.encode()).collect(),
            native_modules,
            heap: HeapSnapshot::capture(ctx.gc.heap()),
            globals: ctx.globals.clone(),
            tasks: ctx.scheduler.tasks().map(SerializedTask::capture).collect(),
            next_task_id: ctx.scheduler.next_id(),
        }
    }

    /// Rebuild and validate everything against the target VM's native modules
    #[cfg_attr(not(feature = "snapshot"), allow(dead_code))]
    pub(crate) fn into_state(
        self,
        registry: &NativeModuleRegistry,
    ) -> Result<RestoredState, SnapshotError> {
        if let Some(missing) = self.native_modules.iter().find(|n| !registry.contains(n)) {
            return Err(SnapshotError::Link(LinkError::ModuleNotFound(missing.clone())));
        }

        let linker = ModuleLinker::new(registry);
        let mut names = HashSet::new();
        let mut modules = Vec::with_capacity(self.modules.len());
        for bytes in &self.modules {
            let module = Module::decode(bytes)?;
            verify_module(&module)?;
            if !names.insert(module.name().to_string()) {
                return Err(SnapshotError::CorruptedData(format!(
                    "module '{}' appears twice",
                    module.name()
                )));
            }
            modules.push(linker.link(Arc::new(module))?);
        }

        if self.globals.len() != modules.len()
            || self
                .globals
                .iter()
                .zip(&modules)
                .any(|(g, m)| g.len() != m.module.globals.len())
        {
            return Err(SnapshotError::CorruptedData(
                "global bindings do not match the loaded modules".to_string(),
            ));
        }

        self.heap.validate()?;
        let dangling = self
            .globals
            .iter()
            .flatten()
            .copied()
            .chain(self.tasks.iter().flat_map(SerializedTask::values))
            .find(|v| !self.heap.resolves(*v));
        if let Some(value) = dangling {
            return Err(SnapshotError::CorruptedData(format!(
                "reference to missing heap object {:?}",
                value
            )));
        }

        for task in &self.tasks {
            if task.task_id.as_u64() >= self.next_task_id {
                return Err(SnapshotError::CorruptedData(format!(
                    "task {} beyond scheduler counter",
                    task.task_id
                )));
            }
            for frame in &task.frames {
                let function = modules
                    .get(frame.module)
                    .and_then(|m| m.module.functions.get(frame.function));
                let valid = match function {
                    Some(f) => frame.locals.len() == f.local_count && frame.ip < f.code.len(),
                    None => false,
                };
                if !valid {
                    return Err(SnapshotError::CorruptedData(format!(
                        "task {} has an invalid frame",
                        task.task_id
                    )));
                }
            }

            // Frame bases only grow and never pass the operand stack
            let mut base = 0;
            for frame in &task.frames {
                if frame.stack_base < base || frame.stack_base > task.stack.len() {
                    return Err(SnapshotError::CorruptedData(format!(
                        "task {} has a frame outside its operand stack",
                        task.task_id
                    )));
                }
                base = frame.stack_base;
            }

            for handler in &task.handlers {
                let owner = handler
                    .frame_depth
                    .checked_sub(1)
                    .and_then(|i| task.frames.get(i))
                    .and_then(|f| modules.get(f.module)?.module.functions.get(f.function));
                let valid = match owner {
                    Some(f) => handler.stack_len <= task.stack.len() && handler.catch_ip < f.code.len(),
                    None => false,
                };
                if !valid {
                    return Err(SnapshotError::CorruptedData(format!(
                        "task {} has an invalid exception handler",
                        task.task_id
                    )));
                }
            }
        }

        Ok(RestoredState {
            modules,
            globals: self.globals,
            heap: self.heap.into_heap(),
            tasks: self.tasks.into_iter().map(SerializedTask::into_task).collect(),
            next_task_id: self.next_task_id,
        })
    }
}
