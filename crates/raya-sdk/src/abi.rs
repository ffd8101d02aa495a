//! C ABI types and the process-wide value handle store
//!
//! `RayaValue*` handles are generation-checked indices into one table shared
//! by the host, the engine and every native module linked into the process.

use crate::context;
use crate::handle::{Handle, HandleKind, HandleTable};
use crate::value::NativeValue;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::ffi::{c_char, CString};

// ============================================================================
// Opaque Types
// ============================================================================

macro_rules! opaque {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[repr(C)]
            pub struct $name {
                _private: [u8; 0],
            }
        )*
    };
}

opaque! {
    /// Opaque handle to a VM instance
    RayaVM;
    /// Opaque handle to a value
    RayaValue;
    /// Opaque per-call context passed to native functions
    RayaContext;
    /// Opaque error object
    RayaError;
    /// Opaque module builder
    RayaModuleBuilder;
    /// Opaque finished native module
    RayaModule;
    /// Opaque VM snapshot
    RayaSnapshot;
}

/// Native function signature
///
/// `args` holds `argc` borrowed handles, valid only for the duration of the
/// call. The returned handle transfers ownership to the VM; NULL reads as
/// `null`, and an error value is thrown into the calling task.
pub type RayaNativeFn =
    unsafe extern "C" fn(ctx: *mut RayaContext, args: *const *mut RayaValue, argc: usize) -> *mut RayaValue;

/// Module entry point: `<prefix>_module_init_<name>`
pub type RayaModuleInitFn = unsafe extern "C" fn() -> *mut RayaModule;

/// Default library prefix for module entry points
pub const DEFAULT_SYMBOL_PREFIX: &str = "raya";

/// Entry-point symbol for a native module
///
/// ```text
/// module_init_symbol("raya", "crypto") == "raya_module_init_crypto"
/// ```
pub fn module_init_symbol(prefix: &str, module: &str) -> String {
    format!("{}_module_init_{}", prefix, module)
}

// ============================================================================
// Value Handles
// ============================================================================

/// Who is responsible for releasing a value handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Created by a constructor; released by `free` or by transfer
    Owned,
    /// Received as a native call argument; released by the engine when the call ends
    Borrowed,
}

struct ValueEntry {
    value: NativeValue,
    ownership: Ownership,
    // Backing storage for `raya_value_to_string`; lives as long as the handle
    c_str: Option<CString>,
}

static VALUES: Lazy<Mutex<HandleTable<ValueEntry>>> =
    Lazy::new(|| Mutex::new(HandleTable::new(HandleKind::Value)));

pub(crate) fn insert_value(value: NativeValue, ownership: Ownership) -> Option<Handle> {
    VALUES.lock().insert(ValueEntry {
        value,
        ownership,
        c_str: None,
    })
}

/// Create an owned value handle
///
/// When `ctx` is a live call context the handle is also recorded in that
/// call's scope, and reclaimed when the call ends unless it was returned,
/// freed, or moved into an array. NULL on handle exhaustion.
pub fn new_value(ctx: *mut RayaContext, value: NativeValue) -> *mut RayaValue {
    match insert_value(value, Ownership::Owned) {
        Some(handle) => {
            context::track(ctx, handle);
            handle.to_ptr()
        }
        None => std::ptr::null_mut(),
    }
}

/// Run `f` on the value behind a live handle
pub fn with_value<R>(ptr: *const RayaValue, f: impl FnOnce(&NativeValue) -> R) -> Option<R> {
    VALUES.lock().get_ptr(ptr).map(|entry| f(&entry.value))
}

/// Clone the value behind a live handle
pub fn clone_value(ptr: *const RayaValue) -> Option<NativeValue> {
    with_value(ptr, NativeValue::clone)
}

/// Ownership of a live handle
pub fn ownership(ptr: *const RayaValue) -> Option<Ownership> {
    VALUES.lock().get_ptr(ptr).map(|entry| entry.ownership)
}

/// Whether `ptr` is a live value handle
pub fn is_live(ptr: *const RayaValue) -> bool {
    VALUES.lock().get_ptr(ptr).is_some()
}

/// NUL-terminated view of a string value
///
/// NULL when the handle is stale, the value is not a string, or the string
/// contains an interior NUL. The pointer stays valid until the handle is
/// released.
pub fn value_c_str(ptr: *const RayaValue) -> *const c_char {
    let mut values = VALUES.lock();
    let Some(entry) = values.get_ptr_mut(ptr) else {
        return std::ptr::null();
    };
    if entry.c_str.is_none() {
        let NativeValue::String(s) = &entry.value else {
            return std::ptr::null();
        };
        match CString::new(s.as_bytes()) {
            Ok(c) => entry.c_str = Some(c),
            Err(_) => return std::ptr::null(),
        }
    }
    entry
        .c_str
        .as_ref()
        .map_or(std::ptr::null(), |c| c.as_ptr())
}

/// Release an owned handle
///
/// Null, stale and borrowed handles are ignored. Returns whether a value was
/// released.
pub fn free_value(ptr: *mut RayaValue) -> bool {
    let mut values = VALUES.lock();
    let ownership = values.get_ptr(ptr).map(|entry| entry.ownership);
    match ownership {
        Some(Ownership::Owned) => values.remove_ptr(ptr).is_some(),
        _ => false,
    }
}

/// Take the value out of a handle, consuming it if owned
///
/// Borrowed handles stay valid for the rest of the call; their value is cloned.
pub fn take_value(ptr: *mut RayaValue) -> Option<NativeValue> {
    let mut values = VALUES.lock();
    let ownership = values.get_ptr(ptr)?.ownership;
    match ownership {
        Ownership::Owned => values.remove_ptr(ptr).map(|entry| entry.value),
        Ownership::Borrowed => values.get_ptr(ptr).map(|entry| entry.value.clone()),
    }
}

/// Release a handle regardless of ownership (engine-side cleanup)
pub(crate) fn release(handle: Handle) {
    VALUES.lock().remove(handle);
}

/// Store `element` at `index` of an array value, consuming `element`
///
/// Fails without consuming anything when `array` is not a live array, the
/// index is out of range, `element` is not live, or both name the same handle.
pub fn array_set(array: *mut RayaValue, index: usize, element: *mut RayaValue) -> bool {
    if array == element {
        return false;
    }
    let mut values = VALUES.lock();
    let in_range = matches!(
        values.get_ptr(array).map(|e| &e.value),
        Some(NativeValue::Array(items)) if index < items.len()
    );
    if !in_range {
        return false;
    }
    let element_value = match values.get_ptr(element).map(|e| e.ownership) {
        Some(Ownership::Owned) => values.remove_ptr(element).map(|e| e.value),
        Some(Ownership::Borrowed) => values.get_ptr(element).map(|e| e.value.clone()),
        None => None,
    };
    let Some(element_value) = element_value else {
        return false;
    };
    match values.get_ptr_mut(array) {
        Some(ValueEntry {
            value: NativeValue::Array(items),
            ..
        }) => {
            items[index] = element_value;
            true
        }
        _ => false,
    }
}

/// Clone element `index` of an array value into a new owned handle
pub fn array_get(ctx: *mut RayaContext, array: *const RayaValue, index: usize) -> *mut RayaValue {
    let element = with_value(array, |v| match v {
        NativeValue::Array(items) => items.get(index).cloned(),
        _ => None,
    })
    .flatten();
    match element {
        Some(value) => new_value(ctx, value),
        None => std::ptr::null_mut(),
    }
}

/// Number of live value handles in the process
pub fn live_value_count() -> usize {
    VALUES.lock().len()
}
