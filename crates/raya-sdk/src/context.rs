//! Native call protocol
//!
//! `invoke` is the only place the engine calls into native code. It owns the
//! lifetime rules of a call:
//! - arguments are published as borrowed handles and released afterwards
//! - values created through the call's `RayaContext` are reclaimed at the end
//!   unless returned, freed, or moved into an array
//! - the returned handle decides between a normal result and a thrown error

use crate::abi::{self, Ownership, RayaContext, RayaNativeFn, RayaValue};
use crate::handle::{Handle, HandleKind, HandleTable};
use crate::value::NativeValue;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Identity of the call a `RayaContext` belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    /// Id of the VM making the call
    pub vm_id: u64,
    /// Native module name
    pub module: String,
    /// Function name within the module
    pub function: String,
}

struct CallScope {
    info: CallInfo,
    created: Vec<Handle>,
}

static CONTEXTS: Lazy<Mutex<HandleTable<CallScope>>> =
    Lazy::new(|| Mutex::new(HandleTable::new(HandleKind::Context)));

/// Record a freshly created handle in the scope of `ctx`, if `ctx` is live
pub(crate) fn track(ctx: *mut RayaContext, handle: Handle) {
    if ctx.is_null() {
        return;
    }
    if let Some(scope) = CONTEXTS.lock().get_ptr_mut(ctx) {
        scope.created.push(handle);
    }
}

/// Call information for a live context
pub fn call_info(ctx: *const RayaContext) -> Option<CallInfo> {
    CONTEXTS.lock().get_ptr(ctx).map(|scope| scope.info.clone())
}

/// Why a native call did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NativeCallError {
    /// The function returned an error value
    #[error("{0}")]
    Thrown(String),

    /// The function returned a handle that is not a live value
    #[error("native function {0} returned an invalid value handle")]
    InvalidReturn(String),

    /// The handle tables are full
    #[error("out of native value handles")]
    HandlesExhausted,
}

/// Call a native function with marshalled arguments
///
/// # Safety
///
/// `func` must follow the native function contract: read at most `argc`
/// entries from `args`, not retain any handle past return, and not unwind.
pub unsafe fn invoke(
    func: RayaNativeFn,
    info: CallInfo,
    args: &[NativeValue],
) -> Result<NativeValue, NativeCallError> {
    let qualified = format!("{}.{}", info.module, info.function);
    let ctx_handle = CONTEXTS
        .lock()
        .insert(CallScope {
            info,
            created: Vec::new(),
        })
        .ok_or(NativeCallError::HandlesExhausted)?;

    let mut borrowed = Vec::with_capacity(args.len());
    for arg in args {
        match abi::insert_value(arg.clone(), Ownership::Borrowed) {
            Some(h) => borrowed.push(h),
            None => {
                finish_call(ctx_handle, &borrowed);
                return Err(NativeCallError::HandlesExhausted);
            }
        }
    }
    let arg_ptrs: Vec<*mut RayaValue> = borrowed.iter().map(|h| h.to_ptr()).collect();

    let ctx: *mut RayaContext = ctx_handle.to_ptr();
    let ret = func(ctx, arg_ptrs.as_ptr(), arg_ptrs.len());

    let result = if ret.is_null() {
        Ok(NativeValue::Null)
    } else {
        match abi::take_value(ret) {
            Some(NativeValue::Error(message)) => Err(NativeCallError::Thrown(message)),
            Some(value) => Ok(value),
            None => Err(NativeCallError::InvalidReturn(qualified)),
        }
    };

    finish_call(ctx_handle, &borrowed);
    result
}

fn finish_call(ctx_handle: Handle, borrowed: &[Handle]) {
    for &handle in borrowed {
        abi::release(handle);
    }
    if let Some(scope) = CONTEXTS.lock().remove(ctx_handle) {
        for handle in scope.created {
            // Already returned, freed or consumed handles are stale and skipped
            abi::release(handle);
        }
    }
}
