//! Cooperative task scheduler
//!
//! Tasks run on the thread that called `run_entry`, one slice at a time, in
//! FIFO order. A task leaves the ready queue when it blocks on another task
//! and re-enters it when that task finishes.

use super::task::{Frame, Task, TaskId, TaskState};
use crate::value::Value;
use std::collections::{BTreeMap, VecDeque};

/// Instructions a task may execute before it is rotated to the back of the queue
pub const DEFAULT_TIME_SLICE: u32 = 1024;

/// Scheduler limits
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerLimits {
    /// Maximum number of unfinished tasks
    pub max_tasks: Option<usize>,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Tasks spawned
    pub spawned: u64,
    /// Tasks completed
    pub completed: u64,
    /// Tasks failed
    pub failed: u64,
    /// Highest number of unfinished tasks seen at once
    pub peak_live: usize,
}

/// Spawn refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Task limit of {0} reached")]
pub struct TaskLimitExceeded(pub usize);

/// Cooperative scheduler for one VM
#[derive(Debug)]
pub struct Scheduler {
    tasks: BTreeMap<TaskId, Task>,
    ready: VecDeque<TaskId>,
    next_id: u64,
    limits: SchedulerLimits,
    stats: SchedulerStats,
    time_slice: u32,
    /// Task currently taken out for execution
    running: Option<TaskId>,
}

impl Scheduler {
    /// Create an empty scheduler
    pub fn new(limits: SchedulerLimits) -> Self {
        Self {
            tasks: BTreeMap::new(),
            ready: VecDeque::new(),
            next_id: 1,
            limits,
            stats: SchedulerStats::default(),
            time_slice: DEFAULT_TIME_SLICE,
            running: None,
        }
    }

    /// Instructions per slice
    pub fn time_slice(&self) -> u32 {
        self.time_slice
    }

    /// Create a task and queue it
    pub fn spawn(&mut self, parent: Option<TaskId>, entry: Frame) -> Result<TaskId, TaskLimitExceeded> {
        let live = self.live_count();
        if let Some(max) = self.limits.max_tasks {
            if live >= max {
                return Err(TaskLimitExceeded(max));
            }
        }

        let id = TaskId::from_u64(self.next_id);
        self.next_id += 1;
        self.tasks.insert(id, Task::new(id, parent, entry));
        self.ready.push_back(id);
        self.stats.spawned += 1;
        self.stats.peak_live = self.stats.peak_live.max(live + 1);
        Ok(id)
    }

    /// Next runnable task, removed from the queue
    pub fn next_ready(&mut self) -> Option<TaskId> {
        while let Some(id) = self.ready.pop_front() {
            if matches!(self.tasks.get(&id).map(Task::state), Some(TaskState::Ready)) {
                return Some(id);
            }
        }
        None
    }

    /// Requeue a task that used up its slice or yielded
    pub fn requeue(&mut self, id: TaskId) {
        self.ready.push_back(id);
    }

    /// Take a task out for execution
    pub fn take(&mut self, id: TaskId) -> Option<Task> {
        let task = self.tasks.remove(&id)?;
        self.running = Some(id);
        Some(task)
    }

    /// Return a task after a slice
    pub fn put_back(&mut self, task: Task) {
        if self.running == Some(task.id()) {
            self.running = None;
        }
        self.tasks.insert(task.id(), task);
    }

    /// Look up a task
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Look up a task mutably
    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Record completion and wake waiters
    pub fn complete(&mut self, mut task: Task, value: Value) {
        task.complete(value);
        self.stats.completed += 1;
        let id = task.id();
        self.put_back(task);
        self.wake_waiters(id);
    }

    /// Record failure and wake waiters
    pub fn fail(&mut self, mut task: Task, message: String) {
        task.fail(message);
        self.stats.failed += 1;
        let id = task.id();
        self.put_back(task);
        self.wake_waiters(id);
    }

    /// Park a task until `on` finishes
    pub fn block(&mut self, mut task: Task, on: TaskId) {
        task.set_state(TaskState::Blocked(on));
        self.put_back(task);
    }

    fn wake_waiters(&mut self, finished: TaskId) {
        for task in self.tasks.values_mut() {
            if task.state() == TaskState::Blocked(finished) {
                task.set_state(TaskState::Ready);
                self.ready.push_back(task.id());
            }
        }
    }

    /// Number of unfinished tasks, the running one included
    pub fn live_count(&self) -> usize {
        let parked = self.tasks.values().filter(|t| !t.is_finished()).count();
        parked + usize::from(self.running.is_some())
    }

    /// Whether some task still has work or is waiting
    pub fn has_unfinished(&self) -> bool {
        self.tasks.values().any(|t| !t.is_finished())
    }

    /// All tasks in id order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Values held by any task
    pub fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.tasks.values().flat_map(Task::roots)
    }

    /// Failures that no task awaited
    pub fn unobserved_failures(&self) -> Vec<(TaskId, String)> {
        self.tasks
            .values()
            .filter(|t| t.state() == TaskState::Failed && !t.is_observed())
            .map(|t| (t.id(), t.error().unwrap_or_default().to_string()))
            .collect()
    }

    /// Drop every task; ids keep increasing
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.ready.clear();
        self.running = None;
    }

    /// Id the next spawned task will get
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Replace all tasks with a restored set
    pub fn restore(&mut self, next_id: u64, tasks: Vec<Task>) {
        self.clear();
        self.next_id = next_id;
        for task in tasks {
            if task.state() == TaskState::Ready {
                self.ready.push_back(task.id());
            }
            self.tasks.insert(task.id(), task);
        }
    }

    /// Scheduler statistics
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame {
            module: 0,
            function: 0,
            ip: 0,
            locals: Vec::new(),
            stack_base: 0,
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut sched = Scheduler::default();
        let a = sched.spawn(None, frame()).unwrap();
        let b = sched.spawn(Some(a), frame()).unwrap();
        assert_eq!(sched.next_ready(), Some(a));
        assert_eq!(sched.next_ready(), Some(b));
        assert_eq!(sched.next_ready(), None);
    }

    #[test]
    fn test_block_and_wake() {
        let mut sched = Scheduler::default();
        let parent = sched.spawn(None, frame()).unwrap();
        let child = sched.spawn(Some(parent), frame()).unwrap();

        assert_eq!(sched.next_ready(), Some(parent));
        let task = sched.take(parent).unwrap();
        sched.block(task, child);

        assert_eq!(sched.next_ready(), Some(child));
        let task = sched.take(child).unwrap();
        sched.complete(task, Value::i32(5));

        assert_eq!(sched.next_ready(), Some(parent));
        assert_eq!(sched.get(child).and_then(Task::result), Some(Value::i32(5)));
        assert!(sched.has_unfinished());
    }

    #[test]
    fn test_task_limit() {
        let mut sched = Scheduler::new(SchedulerLimits { max_tasks: Some(1) });
        let first = sched.spawn(None, frame()).unwrap();
        assert_eq!(sched.spawn(None, frame()), Err(TaskLimitExceeded(1)));

        let task = sched.take(first).unwrap();
        sched.complete(task, Value::Null);
        assert!(sched.spawn(None, frame()).is_ok());
    }

    #[test]
    fn test_running_task_counts_against_limit() {
        let mut sched = Scheduler::new(SchedulerLimits { max_tasks: Some(2) });
        let root = sched.spawn(None, frame()).unwrap();
        let task = sched.take(root).unwrap();
        assert_eq!(sched.live_count(), 1);
        sched.spawn(Some(root), frame()).unwrap();
        assert_eq!(sched.spawn(Some(root), frame()), Err(TaskLimitExceeded(2)));
        sched.put_back(task);
        assert_eq!(sched.live_count(), 2);
    }

    #[test]
    fn test_unobserved_failures() {
        let mut sched = Scheduler::default();
        let id = sched.spawn(None, frame()).unwrap();
        let task = sched.take(id).unwrap();
        sched.fail(task, "bad".to_string());
        assert_eq!(sched.unobserved_failures(), vec![(id, "bad".to_string())]);

        sched.get_mut(id).unwrap().mark_observed();
        assert!(sched.unobserved_failures().is_empty());
    }
}
