//! Virtual machine interpreter
//!
//! Runs the task tree of one `run_entry` call on the calling thread. Tasks
//! are executed one time slice at a time; garbage collection only happens
//! between slices, when every live value is reachable from a task or a
//! global.

use super::context::VmContext;
use super::lifecycle::VmError;
use super::marshal::{marshal, unmarshal, MarshalError};
use crate::gc::{Heap, HeapError, HeapObject};
use crate::scheduler::{ExceptionHandler, Frame, Task, TaskId, TaskState};
use crate::value::Value;
use crate::{vm_debug, vm_warn};
use raya_bytecode::{BytecodeReader, Opcode};
use raya_sdk::{CallInfo, NativeCallError, NativeValue};
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum call depth of one task
pub const MAX_CALL_DEPTH: usize = 1024;

/// Instructions between termination checks
const EPOCH_CHECK_INTERVAL: u32 = 128;

/// Nesting limit when rendering arrays as text
const DISPLAY_DEPTH: usize = 8;

/// Why the current instruction could not complete
enum Fault {
    /// Catchable error raised by the program or a native function
    Throw(String),
    /// Unrecoverable; aborts the whole `run_entry`
    Fatal(VmError),
}

impl From<HeapError> for Fault {
    fn from(e: HeapError) -> Self {
        Fault::Fatal(VmError::ResourceLimitExceeded(e.to_string()))
    }
}

/// Control flow after one instruction
enum Flow {
    Continue,
    Yield,
    Done(Value),
    Block(TaskId),
}

/// Result of running a task for one slice
enum Slice {
    Yielded,
    Completed(Value),
    Blocked(TaskId),
    Failed(String),
}

/// A decoded instruction
#[derive(Debug, Clone, Copy)]
struct Instr {
    op: Opcode,
    a: u32,
    b: u16,
    offset: usize,
    next: usize,
}

/// Interpreter bound to one context for the duration of a `run_entry`
pub(crate) struct Interpreter<'a> {
    ctx: &'a mut VmContext,
    epoch: &'a AtomicU64,
    start_epoch: u64,
    steps: u64,
}

impl<'a> Interpreter<'a> {
    /// Bind to a context; any change of `epoch` away from `start_epoch`
    /// terminates the run
    pub(crate) fn new(ctx: &'a mut VmContext, epoch: &'a AtomicU64, start_epoch: u64) -> Self {
        Self {
            ctx,
            epoch,
            start_epoch,
            steps: 0,
        }
    }

    /// Run `function` of `module` and every task it spawns to completion
    ///
    /// All tasks are dropped afterwards, whatever the outcome.
    pub(crate) fn run_entry(&mut self, module: usize, function: usize) -> Result<NativeValue, VmError> {
        self.ctx.counters().record_entry();
        let result = self
            .run_to_completion(module, function)
            .and_then(|value| {
                marshal(value, self.ctx.gc.heap()).map_err(|e| {
                    VmError::ExecutionError(format!("entry point result cannot leave the VM: {}", e))
                })
            });
        self.ctx.counters().increment_steps(self.steps);
        self.ctx.reset_tasks();
        result
    }

    fn run_to_completion(&mut self, module: usize, function: usize) -> Result<Value, VmError> {
        let local_count = self.ctx.modules[module].module.functions[function].local_count;
        let root = self
            .ctx
            .scheduler
            .spawn(
                None,
                Frame {
                    module,
                    function,
                    ip: 0,
                    locals: vec![Value::Null; local_count],
                    stack_base: 0,
                },
            )
            .map_err(|e| VmError::ResourceLimitExceeded(e.to_string()))?;

        loop {
            self.check_epoch()?;

            let Some(id) = self.ctx.scheduler.next_ready() else {
                if self.ctx.scheduler.has_unfinished() {
                    return Err(VmError::ExecutionError(
                        "Deadlock: every remaining task is waiting on another".to_string(),
                    ));
                }
                break;
            };
            let Some(mut task) = self.ctx.scheduler.take(id) else {
                continue;
            };

            match self.run_slice(&mut task) {
                Ok(Slice::Yielded) => {
                    self.ctx.scheduler.put_back(task);
                    self.ctx.scheduler.requeue(id);
                }
                Ok(Slice::Completed(value)) => self.ctx.scheduler.complete(task, value),
                Ok(Slice::Blocked(on)) => self.ctx.scheduler.block(task, on),
                Ok(Slice::Failed(message)) => {
                    vm_debug!("task {} failed: {}", id, message);
                    self.ctx.scheduler.fail(task, message);
                }
                Err(e) => {
                    self.ctx.scheduler.put_back(task);
                    return Err(e);
                }
            }

            if self.ctx.gc.should_collect() {
                self.ctx.collect_garbage();
            }
        }

        let outcome = match self.ctx.scheduler.get_mut(root) {
            Some(task) => {
                task.mark_observed();
                match task.state() {
                    TaskState::Completed => Ok(task.result().unwrap_or_default()),
                    _ => Err(VmError::ExecutionError(
                        task.error().unwrap_or("task did not complete").to_string(),
                    )),
                }
            }
            None => Err(VmError::ExecutionError("entry task vanished".to_string())),
        };
        let value = outcome?;

        if let Some((id, message)) = self.ctx.scheduler.unobserved_failures().into_iter().next() {
            return Err(VmError::ExecutionError(format!(
                "Unhandled error in task {}: {}",
                id, message
            )));
        }
        Ok(value)
    }

    fn check_epoch(&self) -> Result<(), VmError> {
        if self.epoch.load(Ordering::Acquire) != self.start_epoch {
            return Err(VmError::Terminated);
        }
        Ok(())
    }

    fn run_slice(&mut self, task: &mut Task) -> Result<Slice, VmError> {
        let slice = self.ctx.scheduler.time_slice();

        for executed in 0..slice {
            if executed % EPOCH_CHECK_INTERVAL == 0 {
                self.check_epoch()?;
            }

            self.steps += 1;
            if let Some(max) = self.ctx.limits().max_step_budget {
                if self.steps > max {
                    return Err(VmError::ResourceLimitExceeded(format!(
                        "step budget of {} instructions exhausted",
                        max
                    )));
                }
            }

            let at = task.current_frame().map(|f| (f.module, f.function, f.ip));
            match self.step(task) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Yield) => return Ok(Slice::Yielded),
                Ok(Flow::Done(value)) => return Ok(Slice::Completed(value)),
                Ok(Flow::Block(on)) => return Ok(Slice::Blocked(on)),
                Err(Fault::Fatal(e)) => return Err(e),
                Err(Fault::Throw(message)) => {
                    if !self.unwind(task, &message)? {
                        let location = self.location(at);
                        return Ok(Slice::Failed(format!("{}\n    at {}", message, location)));
                    }
                }
            }
        }

        Ok(Slice::Yielded)
    }

    /// Transfer control to the innermost handler; false if there is none
    fn unwind(&mut self, task: &mut Task, message: &str) -> Result<bool, VmError> {
        let Some(handler) = task.handlers.pop() else {
            return Ok(false);
        };

        task.frames.truncate(handler.frame_depth);
        task.stack.truncate(handler.stack_len);
        let error = self
            .ctx
            .gc
            .heap_mut()
            .alloc_error(message)
            .map_err(|e| VmError::ResourceLimitExceeded(e.to_string()))?;
        task.stack.push(error);

        match task.frames.last_mut() {
            Some(frame) => {
                frame.ip = handler.catch_ip;
                Ok(true)
            }
            None => Err(VmError::ExecutionError(
                "exception handler outlived its frame".to_string(),
            )),
        }
    }

    /// `module.function+offset` for a (module, function, ip) triple
    fn location(&self, at: Option<(usize, usize, usize)>) -> String {
        let function = at.and_then(|(m, f, ip)| {
            let module = &self.ctx.modules.get(m)?.module;
            Some((module.name(), &module.functions.get(f)?.name, ip))
        });
        match function {
            Some((module, name, ip)) => format!("{}.{}+{}", module, name, ip),
            None => "<no frame>".to_string(),
        }
    }

    fn decode(&self, frame: &Frame) -> Result<Instr, Fault> {
        let code = self
            .ctx
            .modules
            .get(frame.module)
            .and_then(|m| m.module.functions.get(frame.function))
            .map(|f| f.code.as_slice())
            .ok_or_else(|| fatal("frame refers to a function that is not loaded"))?;

        let mut reader = BytecodeReader::new(code);
        reader.seek(frame.ip);
        let op = reader.read_opcode().map_err(|e| fatal(e.to_string()))?;
        let (a, b) = match op.operand_size() {
            0 => (0, 0),
            2 => (reader.read_u16().map_err(|e| fatal(e.to_string()))? as u32, 0),
            4 => (reader.read_u32().map_err(|e| fatal(e.to_string()))?, 0),
            _ => (
                reader.read_u32().map_err(|e| fatal(e.to_string()))?,
                reader.read_u16().map_err(|e| fatal(e.to_string()))?,
            ),
        };
        Ok(Instr {
            op,
            a,
            b,
            offset: frame.ip,
            next: reader.position(),
        })
    }

    fn step(&mut self, task: &mut Task) -> Result<Flow, Fault> {
        let frame = task
            .frames
            .last_mut()
            .ok_or_else(|| fatal("task has no frame"))?;
        let instr = self.decode(frame)?;
        frame.ip = instr.next;
        let module_index = frame.module;

        match instr.op {
            Opcode::Nop => {}
            Opcode::Pop => {
                pop(task)?;
            }
            Opcode::Dup => {
                let value = peek(task)?;
                task.stack.push(value);
            }
            Opcode::Swap => {
                let b = pop(task)?;
                let a = pop(task)?;
                task.stack.push(b);
                task.stack.push(a);
            }

            Opcode::ConstNull => task.stack.push(Value::Null),
            Opcode::ConstTrue => task.stack.push(Value::Bool(true)),
            Opcode::ConstFalse => task.stack.push(Value::Bool(false)),
            Opcode::ConstI32 => task.stack.push(Value::I32(instr.a as i32)),
            Opcode::ConstStr => {
                let s = self.constant(module_index, instr.a)?;
                let value = self.ctx.gc.heap_mut().alloc_string(s)?;
                task.stack.push(value);
            }

            Opcode::LoadLocal => {
                let value = *current(task)?
                    .locals
                    .get(instr.a as usize)
                    .ok_or_else(|| fatal("local index out of range"))?;
                task.stack.push(value);
            }
            Opcode::StoreLocal => {
                let value = pop(task)?;
                let slot = current(task)?
                    .locals
                    .get_mut(instr.a as usize)
                    .ok_or_else(|| fatal("local index out of range"))?;
                *slot = value;
            }
            Opcode::LoadGlobal => {
                let value = *self
                    .ctx
                    .globals
                    .get(module_index)
                    .and_then(|g| g.get(instr.a as usize))
                    .ok_or_else(|| fatal("global index out of range"))?;
                task.stack.push(value);
            }
            Opcode::StoreGlobal => {
                let value = pop(task)?;
                let slot = self
                    .ctx
                    .globals
                    .get_mut(module_index)
                    .and_then(|g| g.get_mut(instr.a as usize))
                    .ok_or_else(|| fatal("global index out of range"))?;
                *slot = value;
            }

            Opcode::Iadd => binary_i32(task, |a, b| Ok(Value::I32(a.wrapping_add(b))))?,
            Opcode::Isub => binary_i32(task, |a, b| Ok(Value::I32(a.wrapping_sub(b))))?,
            Opcode::Imul => binary_i32(task, |a, b| Ok(Value::I32(a.wrapping_mul(b))))?,
            Opcode::Idiv => binary_i32(task, |a, b| match b {
                0 => Err(Fault::Throw("Division by zero".to_string())),
                _ => Ok(Value::I32(a.wrapping_div(b))),
            })?,
            Opcode::Imod => binary_i32(task, |a, b| match b {
                0 => Err(Fault::Throw("Division by zero".to_string())),
                _ => Ok(Value::I32(a.wrapping_rem(b))),
            })?,
            Opcode::Ineg => {
                let a = expect_i32(pop(task)?)?;
                task.stack.push(Value::I32(a.wrapping_neg()));
            }

            Opcode::Ieq => binary_i32(task, |a, b| Ok(Value::Bool(a == b)))?,
            Opcode::Ine => binary_i32(task, |a, b| Ok(Value::Bool(a != b)))?,
            Opcode::Ilt => binary_i32(task, |a, b| Ok(Value::Bool(a < b)))?,
            Opcode::Ile => binary_i32(task, |a, b| Ok(Value::Bool(a <= b)))?,
            Opcode::Igt => binary_i32(task, |a, b| Ok(Value::Bool(a > b)))?,
            Opcode::Ige => binary_i32(task, |a, b| Ok(Value::Bool(a >= b)))?,

            Opcode::Eq | Opcode::Ne => {
                let b = pop(task)?;
                let a = pop(task)?;
                let equal = values_equal(a, b, self.ctx.gc.heap());
                task.stack.push(Value::Bool(equal == (instr.op == Opcode::Eq)));
            }
            Opcode::Not => match pop(task)? {
                Value::Bool(b) => task.stack.push(Value::Bool(!b)),
                other => return Err(type_error("boolean", other, self.ctx.gc.heap())),
            },

            Opcode::Sconcat => {
                let b = pop(task)?;
                let a = pop(task)?;
                let heap = self.ctx.gc.heap();
                let joined = display(a, heap, 0) + &display(b, heap, 0);
                let value = self.ctx.gc.heap_mut().alloc_string(joined)?;
                task.stack.push(value);
            }
            Opcode::Slen => {
                let value = pop(task)?;
                let len = match self.ctx.gc.heap().str(value) {
                    Some(s) => s.len(),
                    None => return Err(type_error("string", value, self.ctx.gc.heap())),
                };
                task.stack.push(Value::I32(clamp_len(len)));
            }

            Opcode::Jmp => jump(task, instr)?,
            Opcode::JmpIfFalse => {
                if !pop(task)?.is_truthy() {
                    jump(task, instr)?;
                }
            }
            Opcode::JmpIfTrue => {
                if pop(task)?.is_truthy() {
                    jump(task, instr)?;
                }
            }

            Opcode::Call => {
                if task.frames.len() >= MAX_CALL_DEPTH {
                    return Err(Fault::Throw(format!(
                        "Maximum call depth of {} exceeded",
                        MAX_CALL_DEPTH
                    )));
                }
                let frame = self.new_frame(task, module_index, instr.a as usize, instr.b as usize)?;
                task.frames.push(frame);
            }
            Opcode::Return => {
                let value = pop(task)?;
                let frame = task
                    .frames
                    .pop()
                    .ok_or_else(|| fatal("return without a frame"))?;
                task.stack.truncate(frame.stack_base);
                let depth = task.frames.len();
                task.handlers.retain(|h| h.frame_depth <= depth);
                if task.frames.is_empty() {
                    return Ok(Flow::Done(value));
                }
                task.stack.push(value);
            }
            Opcode::CallNative => {
                let result = self.call_native(task, module_index, instr.a as usize, instr.b as usize)?;
                task.stack.push(result);
            }

            Opcode::NewArray => {
                let items = pop_n(task, instr.a as usize)?;
                let r = self.ctx.gc.allocate(HeapObject::Array(items))?;
                task.stack.push(Value::Ref(r));
            }
            Opcode::LoadElem => {
                let index = expect_i32(pop(task)?)?;
                let array = pop(task)?;
                let heap = self.ctx.gc.heap();
                let value = match array.as_ref().and_then(|r| heap.get(r)) {
                    Some(HeapObject::Array(items)) => *element(items, index)?,
                    _ => return Err(type_error("array", array, heap)),
                };
                task.stack.push(value);
            }
            Opcode::StoreElem => {
                let value = pop(task)?;
                let index = expect_i32(pop(task)?)?;
                let array = pop(task)?;
                let target = array.as_ref().and_then(|r| self.ctx.gc.heap_mut().get_mut(r));
                match target {
                    Some(HeapObject::Array(items)) => {
                        let len = items.len();
                        let slot = usize::try_from(index)
                            .ok()
                            .and_then(|i| items.get_mut(i))
                            .ok_or_else(|| out_of_bounds(index, len))?;
                        *slot = value;
                    }
                    _ => return Err(type_error("array", array, self.ctx.gc.heap())),
                }
            }
            Opcode::ArrayLen => {
                let array = pop(task)?;
                let heap = self.ctx.gc.heap();
                let len = match array.as_ref().and_then(|r| heap.get(r)) {
                    Some(HeapObject::Array(items)) => items.len(),
                    _ => return Err(type_error("array", array, heap)),
                };
                task.stack.push(Value::I32(clamp_len(len)));
            }
            Opcode::LoadField => {
                let name = self.constant(module_index, instr.a)?;
                let target = pop(task)?;
                let heap = self.ctx.gc.heap();
                let field = match target.as_ref().and_then(|r| heap.get(r)) {
                    Some(HeapObject::Object(fields)) => Some(
                        fields
                            .iter()
                            .find(|(k, _)| *k == name)
                            .map(|(_, v)| *v)
                            .unwrap_or_default(),
                    ),
                    Some(HeapObject::Error(message)) if name == "message" => {
                        let message = message.clone();
                        Some(self.ctx.gc.heap_mut().alloc_string(message)?)
                    }
                    Some(HeapObject::Error(_)) => Some(Value::Null),
                    _ => None,
                };
                match field {
                    Some(value) => task.stack.push(value),
                    None => return Err(type_error("object", target, self.ctx.gc.heap())),
                }
            }

            Opcode::Spawn => {
                let frame = self.new_frame(task, module_index, instr.a as usize, instr.b as usize)?;
                let id = self
                    .ctx
                    .scheduler
                    .spawn(Some(task.id()), frame)
                    .map_err(|e| Fault::Fatal(VmError::ResourceLimitExceeded(e.to_string())))?;
                task.stack.push(Value::Task(id));
            }
            Opcode::Await => {
                let value = pop(task)?;
                let Value::Task(target) = value else {
                    return Err(type_error("task", value, self.ctx.gc.heap()));
                };
                if target == task.id() {
                    return Err(Fault::Throw("A task cannot await itself".to_string()));
                }
                let awaited = self
                    .ctx
                    .scheduler
                    .get_mut(target)
                    .ok_or_else(|| Fault::Throw(format!("Unknown task {}", target)))?;
                match awaited.state() {
                    TaskState::Completed => {
                        awaited.mark_observed();
                        task.stack.push(awaited.result().unwrap_or_default());
                    }
                    TaskState::Failed => {
                        awaited.mark_observed();
                        let message = awaited.error().unwrap_or_default().to_string();
                        return Err(Fault::Throw(message));
                    }
                    _ => {
                        // Re-run this AWAIT once the target finishes
                        task.stack.push(value);
                        current(task)?.ip = instr.offset;
                        return Ok(Flow::Block(target));
                    }
                }
            }
            Opcode::Yield => return Ok(Flow::Yield),

            Opcode::Try => {
                let catch_ip = branch_target(instr)?;
                let handler = ExceptionHandler {
                    frame_depth: task.frames.len(),
                    stack_len: task.stack.len(),
                    catch_ip,
                };
                task.handlers.push(handler);
            }
            Opcode::EndTry => {
                task.handlers.pop();
            }
            Opcode::Throw => {
                let value = pop(task)?;
                let heap = self.ctx.gc.heap();
                let message = match value.as_ref().and_then(|r| heap.get(r)) {
                    Some(HeapObject::Error(message)) => message.clone(),
                    _ => display(value, heap, 0),
                };
                return Err(Fault::Throw(message));
            }
        }

        Ok(Flow::Continue)
    }

    fn constant(&self, module: usize, index: u32) -> Result<String, Fault> {
        self.ctx.modules[module]
            .module
            .constants
            .get_string(index)
            .map(str::to_owned)
            .ok_or_else(|| fatal("constant index out of range"))
    }

    /// Pop `argc` arguments into a fresh frame for `function`
    fn new_frame(
        &self,
        task: &mut Task,
        module: usize,
        function: usize,
        argc: usize,
    ) -> Result<Frame, Fault> {
        let local_count = self.ctx.modules[module]
            .module
            .functions
            .get(function)
            .map(|f| f.local_count)
            .ok_or_else(|| fatal("function index out of range"))?;
        let mut locals = pop_n(task, argc)?;
        locals.resize(local_count.max(argc), Value::Null);
        Ok(Frame {
            module,
            function,
            ip: 0,
            locals,
            stack_base: task.stack.len(),
        })
    }

    fn call_native(
        &mut self,
        task: &mut Task,
        module: usize,
        slot: usize,
        argc: usize,
    ) -> Result<Value, Fault> {
        let resolved = self.ctx.modules[module]
            .natives
            .get(slot)
            .cloned()
            .ok_or_else(|| fatal("native slot out of range"))?;

        let values = pop_n(task, argc)?;
        let heap = self.ctx.gc.heap();
        let args = values
            .into_iter()
            .map(|v| marshal(v, heap))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Fault::Throw(format!("{}.{}: {}", resolved.module.name(), resolved.symbol, e)))?;

        self.ctx.counters().record_native_call();
        vm_debug!("calling native {:?} with {} argument(s)", resolved, argc);

        let info = CallInfo {
            vm_id: self.ctx.id().as_u64(),
            module: resolved.module.name().to_string(),
            function: resolved.symbol.clone(),
        };
        // SAFETY: the function was registered through a NativeModule, whose
        // construction requires the native calling contract.
        let result = unsafe { raya_sdk::invoke(resolved.func, info, &args) };

        let value = match result {
            Ok(value) => value,
            Err(NativeCallError::Thrown(message)) => return Err(Fault::Throw(message)),
            Err(e @ NativeCallError::InvalidReturn(_)) => {
                vm_warn!("{}", e);
                return Err(Fault::Fatal(VmError::ExecutionError(e.to_string())));
            }
            Err(e @ NativeCallError::HandlesExhausted) => {
                return Err(Fault::Fatal(VmError::ResourceLimitExceeded(e.to_string())))
            }
        };

        unmarshal(&value, self.ctx.gc.heap_mut()).map_err(|e| match e {
            MarshalError::AllocationFailed(e) => e.into(),
            other => Fault::Throw(other.to_string()),
        })
    }
}

fn fatal(message: impl Into<String>) -> Fault {
    Fault::Fatal(VmError::ExecutionError(message.into()))
}

fn current(task: &mut Task) -> Result<&mut Frame, Fault> {
    task.frames.last_mut().ok_or_else(|| fatal("task has no frame"))
}

fn stack_base(task: &Task) -> usize {
    task.frames.last().map_or(0, |f| f.stack_base)
}

fn pop(task: &mut Task) -> Result<Value, Fault> {
    if task.stack.len() <= stack_base(task) {
        return Err(fatal("Stack underflow"));
    }
    task.stack.pop().ok_or_else(|| fatal("Stack underflow"))
}

fn peek(task: &Task) -> Result<Value, Fault> {
    if task.stack.len() <= stack_base(task) {
        return Err(fatal("Stack underflow"));
    }
    task.stack.last().copied().ok_or_else(|| fatal("Stack underflow"))
}

/// Pop `n` values, keeping their push order
fn pop_n(task: &mut Task, n: usize) -> Result<Vec<Value>, Fault> {
    let available = task.stack.len().saturating_sub(stack_base(task));
    if n > available {
        return Err(fatal("Stack underflow"));
    }
    let at = task.stack.len() - n;
    Ok(task.stack.split_off(at))
}

fn expect_i32(value: Value) -> Result<i32, Fault> {
    value
        .as_i32()
        .ok_or_else(|| Fault::Throw(format!("Type error: expected i32, got {:?}", value)))
}

fn binary_i32(task: &mut Task, f: impl FnOnce(i32, i32) -> Result<Value, Fault>) -> Result<(), Fault> {
    let b = expect_i32(pop(task)?)?;
    let a = expect_i32(pop(task)?)?;
    let result = f(a, b)?;
    task.stack.push(result);
    Ok(())
}

fn branch_target(instr: Instr) -> Result<usize, Fault> {
    let target = instr.next as i64 + (instr.a as i32) as i64;
    usize::try_from(target).map_err(|_| fatal("jump before start of function"))
}

fn jump(task: &mut Task, instr: Instr) -> Result<(), Fault> {
    let target = branch_target(instr)?;
    current(task)?.ip = target;
    Ok(())
}

fn element(items: &[Value], index: i32) -> Result<&Value, Fault> {
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .ok_or_else(|| out_of_bounds(index, items.len()))
}

fn out_of_bounds(index: i32, len: usize) -> Fault {
    Fault::Throw(format!("Array index {} out of bounds (length {})", index, len))
}

fn clamp_len(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

fn type_error(expected: &str, got: Value, heap: &Heap) -> Fault {
    let got = match got {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::I32(_) => "i32",
        Value::Task(_) => "task",
        Value::Ref(r) => heap.get(r).map_or("dangling reference", HeapObject::type_name),
    };
    Fault::Throw(format!("Type error: expected {}, got {}", expected, got))
}

/// Strings compare by content, other heap objects by identity
pub(crate) fn values_equal(a: Value, b: Value, heap: &Heap) -> bool {
    match (a, b) {
        (Value::Ref(x), Value::Ref(y)) if x != y => matches!(
            (heap.get(x), heap.get(y)),
            (Some(HeapObject::String(s1)), Some(HeapObject::String(s2))) if s1 == s2
        ),
        _ => a == b,
    }
}

/// Text form used by string concatenation and uncaught throws
pub(crate) fn display(value: Value, heap: &Heap, depth: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::I32(i) => i.to_string(),
        Value::Task(id) => format!("<task {}>", id),
        Value::Ref(r) => match heap.get(r) {
            Some(HeapObject::String(s)) => s.clone(),
            Some(HeapObject::Error(m)) => format!("Error: {}", m),
            Some(HeapObject::Array(_)) if depth >= DISPLAY_DEPTH => "[...]".to_string(),
            Some(HeapObject::Array(items)) => {
                let parts: Vec<String> = items.iter().map(|v| display(*v, heap, depth + 1)).collect();
                format!("[{}]", parts.join(", "))
            }
            Some(HeapObject::Object(_)) => "[object]".to_string(),
            None => "<freed>".to_string(),
        },
    }
}
