//! Task state serialization for snapshots

use super::format::{
    read_count, read_string, read_u64, read_u8, read_value, read_values, write_str, write_u64,
    write_u8, write_value, write_values, SnapshotError,
};
use crate::scheduler::{ExceptionHandler, Frame, Task, TaskId, TaskState};
use crate::value::Value;
use std::io::{Read, Write};

const STATE_READY: u8 = 0;
const STATE_BLOCKED: u8 = 1;
const STATE_COMPLETED: u8 = 2;
const STATE_FAILED: u8 = 3;

/// Serialized task state
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedTask {
    /// Task ID
    pub task_id: TaskId,

    /// Parent task ID (if spawned from another task)
    pub parent: Option<TaskId>,

    /// Current state
    pub state: TaskState,

    /// Call stack frames
    pub frames: Vec<Frame>,

    /// Operand stack
    pub stack: Vec<Value>,

    /// Installed exception handlers
    pub handlers: Vec<ExceptionHandler>,

    /// Result (if completed)
    pub result: Option<Value>,

    /// Failure message (if failed)
    pub error: Option<String>,
}

impl SerializedTask {
    /// Capture a task
    pub fn capture(task: &Task) -> Self {
        Self {
            task_id: task.id(),
            parent: task.parent(),
            state: task.state(),
            frames: task.frames.clone(),
            stack: task.stack.clone(),
            handlers: task.handlers.clone(),
            result: task.result(),
            error: task.error().map(str::to_string),
        }
    }

    /// Rebuild the live task
    pub fn into_task(self) -> Task {
        Task::from_parts(
            self.task_id,
            self.parent,
            self.state,
            self.frames,
            self.stack,
            self.handlers,
            self.result,
            self.error,
        )
    }

    /// Every value the task holds
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.frames
            .iter()
            .flat_map(|f| f.locals.iter().copied())
            .chain(self.stack.iter().copied())
            .chain(self.result)
    }

    /// Encode to writer
    pub fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        write_u64(writer, self.task_id.as_u64())?;
        write_u64(writer, self.parent.map_or(0, TaskId::as_u64))?;

        match self.state {
            TaskState::Ready => write_u8(writer, STATE_READY)?,
            TaskState::Blocked(on) => {
                write_u8(writer, STATE_BLOCKED)?;
                write_u64(writer, on.as_u64())?;
            }
            TaskState::Completed => write_u8(writer, STATE_COMPLETED)?,
            TaskState::Failed => write_u8(writer, STATE_FAILED)?,
        }

        write_u64(writer, self.frames.len() as u64)?;
        for frame in &self.frames {
            write_u64(writer, frame.module as u64)?;
            write_u64(writer, frame.function as u64)?;
            write_u64(writer, frame.ip as u64)?;
            write_u64(writer, frame.stack_base as u64)?;
            write_values(writer, &frame.locals)?;
        }

        write_values(writer, &self.stack)?;

        write_u64(writer, self.handlers.len() as u64)?;
        for handler in &self.handlers {
            write_u64(writer, handler.frame_depth as u64)?;
            write_u64(writer, handler.stack_len as u64)?;
            write_u64(writer, handler.catch_ip as u64)?;
        }

        match self.result {
            Some(value) => {
                write_u8(writer, 1)?;
                write_value(writer, value)?;
            }
            None => write_u8(writer, 0)?,
        }

        match &self.error {
            Some(message) => {
                write_u8(writer, 1)?;
                write_str(writer, message)?;
            }
            None => write_u8(writer, 0)?,
        }

        Ok(())
    }

    /// Decode from a segment of `len` bytes
    pub fn decode(reader: &mut impl Read, len: usize) -> Result<Self, SnapshotError> {
        let task_id = TaskId::from_u64(read_u64(reader)?);
        let parent = match read_u64(reader)? {
            0 => None,
            id => Some(TaskId::from_u64(id)),
        };

        let state = match read_u8(reader)? {
            STATE_READY => TaskState::Ready,
            STATE_BLOCKED => TaskState::Blocked(TaskId::from_u64(read_u64(reader)?)),
            STATE_COMPLETED => TaskState::Completed,
            STATE_FAILED => TaskState::Failed,
            tag => return Err(SnapshotError::CorruptedData(format!("unknown task state {}", tag))),
        };

        let frame_count = read_count(reader, len)?;
        let mut frames = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            let module = read_u64(reader)? as usize;
            let function = read_u64(reader)? as usize;
            let ip = read_u64(reader)? as usize;
            let stack_base = read_u64(reader)? as usize;
            let locals = read_values(reader, len)?;
            frames.push(Frame {
                module,
                function,
                ip,
                locals,
                stack_base,
            });
        }

        let stack = read_values(reader, len)?;

        let handler_count = read_count(reader, len)?;
        let mut handlers = Vec::with_capacity(handler_count);
        for _ in 0..handler_count {
            handlers.push(ExceptionHandler {
                frame_depth: read_u64(reader)? as usize,
                stack_len: read_u64(reader)? as usize,
                catch_ip: read_u64(reader)? as usize,
            });
        }

        let result = match read_u8(reader)? {
            0 => None,
            _ => Some(read_value(reader)?),
        };
        let error = match read_u8(reader)? {
            0 => None,
            _ => Some(read_string(reader)?),
        };

        Ok(Self {
            task_id,
            parent,
            state,
            frames,
            stack,
            handlers,
            result,
            error,
        })
    }
}
