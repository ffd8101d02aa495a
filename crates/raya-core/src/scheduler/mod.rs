//! Task Scheduler
//!
//! Cooperative green threads for `SPAWN`/`AWAIT`/`YIELD`. All tasks of a VM
//! run on the thread inside `run_entry`; preemption happens at slice
//! boundaries so the interpreter can check for termination and run the
//! collector with every live value reachable from a task.

#[allow(clippy::module_inception)]
mod scheduler;
mod task;

pub use scheduler::{
    Scheduler, SchedulerLimits, SchedulerStats, TaskLimitExceeded, DEFAULT_TIME_SLICE,
};
pub use task::{ExceptionHandler, Frame, Task, TaskId, TaskState};
