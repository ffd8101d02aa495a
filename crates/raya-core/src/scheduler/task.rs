//! Task structure and execution state

use crate::value::Value;
use std::fmt;

/// Identifier of a task, unique within one VM
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Runnable; in the ready queue
    Ready,
    /// Suspended until another task finishes
    Blocked(TaskId),
    /// Completed with a result
    Completed,
    /// Failed with an uncaught error
    Failed,
}

/// One activation record
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Index of the module in the VM's load order
    pub module: usize,
    /// Function index within that module
    pub function: usize,
    /// Offset of the next instruction
    pub ip: usize,
    /// Parameters followed by locals
    pub locals: Vec<Value>,
    /// Operand stack height when the frame was entered
    pub stack_base: usize,
}

/// Installed `TRY` region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Frame count when the handler was installed
    pub frame_depth: usize,
    /// Operand stack height to unwind to
    pub stack_len: usize,
    /// Catch target in the installing frame
    pub catch_ip: usize,
}

/// A green thread
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    parent: Option<TaskId>,
    state: TaskState,
    /// Call stack, innermost last
    pub frames: Vec<Frame>,
    /// Operand stack shared by all frames
    pub stack: Vec<Value>,
    /// Active exception handlers, innermost last
    pub handlers: Vec<ExceptionHandler>,
    result: Option<Value>,
    error: Option<String>,
    observed: bool,
}

impl Task {
    /// Create a task positioned at the start of `entry`
    pub fn new(id: TaskId, parent: Option<TaskId>, entry: Frame) -> Self {
        Self {
            id,
            parent,
            state: TaskState::Ready,
            frames: vec![entry],
            stack: Vec::new(),
            handlers: Vec::new(),
            result: None,
            error: None,
            observed: false,
        }
    }

    /// Rebuild a task from its serialized parts
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: TaskId,
        parent: Option<TaskId>,
        state: TaskState,
        frames: Vec<Frame>,
        stack: Vec<Value>,
        handlers: Vec<ExceptionHandler>,
        result: Option<Value>,
        error: Option<String>,
    ) -> Self {
        Self {
            id,
            parent,
            state,
            frames,
            stack,
            handlers,
            result,
            error,
            observed: false,
        }
    }

    /// Get the Task's ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Task that spawned this one
    pub fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    /// Get the current state
    pub fn state(&self) -> TaskState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    /// Whether the task has completed or failed
    pub fn is_finished(&self) -> bool {
        matches!(self.state, TaskState::Completed | TaskState::Failed)
    }

    /// Result value, once completed
    pub fn result(&self) -> Option<Value> {
        self.result
    }

    /// Failure message, once failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether another task has awaited this one's outcome
    pub fn is_observed(&self) -> bool {
        self.observed
    }

    pub(crate) fn mark_observed(&mut self) {
        self.observed = true;
    }

    pub(crate) fn complete(&mut self, value: Value) {
        self.state = TaskState::Completed;
        self.result = Some(value);
        self.frames.clear();
        self.stack.clear();
        self.handlers.clear();
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.state = TaskState::Failed;
        self.error = Some(message);
        self.frames.clear();
        self.stack.clear();
        self.handlers.clear();
    }

    /// Innermost frame
    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Every value this task keeps alive
    pub fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.frames
            .iter()
            .flat_map(|f| f.locals.iter().copied())
            .chain(self.stack.iter().copied())
            .chain(self.result)
    }
}
