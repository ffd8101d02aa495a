//! Value handles for host and native code
//!
//! Constructors return owned handles. The scalar constructors never need a
//! context. The others accept the running call's context so the handle is
//! reclaimed when the call returns; from host code pass NULL and free the
//! handle with `raya_value_free()`.

use crate::error::FfiError;
use raya_sdk::{abi, ErrorKind, NativeValue, RayaContext, RayaValue};
use std::ffi::{c_char, c_int, CStr};
use std::ptr;

/// Maximum array length accepted by `raya_value_array()`
pub const MAX_ARRAY_LENGTH: usize = 1 << 24;

/// Borrow a C string argument, failing with `kind` for NULL or bad UTF-8
///
/// `kind` is the failure kind of the calling operation (Load for loading,
/// Runtime for running), never `Argument`, which belongs to native code.
///
/// # Safety
/// `ptr` must be NULL or a null-terminated string that outlives `'a`.
pub(crate) unsafe fn c_str_arg<'a>(
    ptr: *const c_char,
    what: &str,
    kind: ErrorKind,
) -> Result<&'a str, FfiError> {
    if ptr.is_null() {
        return Err(FfiError::new(kind, format!("{} must not be NULL", what)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| FfiError::new(kind, format!("{} is not valid UTF-8", what)))
}

// ============================================================================
// Constructors
// ============================================================================

/// Create a null value
///
/// # Returns
/// * Owned value handle, to be returned from a native function or freed
///   with `raya_value_free()`
#[no_mangle]
pub extern "C" fn raya_value_null() -> *mut RayaValue {
    abi::new_value(ptr::null_mut(), NativeValue::Null)
}

/// Create a boolean value (any non-zero `value` is true)
#[no_mangle]
pub extern "C" fn raya_value_bool(value: c_int) -> *mut RayaValue {
    abi::new_value(ptr::null_mut(), NativeValue::Bool(value != 0))
}

/// Create a 32-bit integer value
#[no_mangle]
pub extern "C" fn raya_value_i32(value: i32) -> *mut RayaValue {
    abi::new_value(ptr::null_mut(), NativeValue::I32(value))
}

/// Create a string value (copied)
///
/// `ctx` is the running call's context, or NULL from host code.
///
/// # Returns
/// * Value handle, or NULL if `value` is NULL or not valid UTF-8
///
/// # Safety
/// `value` must be NULL or a null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn raya_value_string(
    ctx: *mut RayaContext,
    value: *const c_char,
) -> *mut RayaValue {
    match c_str_arg(value, "string", ErrorKind::Usage) {
        Ok(s) => abi::new_value(ctx, NativeValue::String(s.to_string())),
        Err(_) => ptr::null_mut(),
    }
}

/// Create an array of `length` nulls, to be filled with `raya_array_set()`
///
/// # Safety
/// `ctx` must be NULL or the context passed to the running native function.
#[no_mangle]
pub unsafe extern "C" fn raya_value_array(ctx: *mut RayaContext, length: usize) -> *mut RayaValue {
    if length > MAX_ARRAY_LENGTH {
        return ptr::null_mut();
    }
    abi::new_value(ctx, NativeValue::Array(vec![NativeValue::Null; length]))
}

/// Create an error value
///
/// Returning an error value from a native function raises it in the
/// calling script.
///
/// # Safety
/// `message` must be NULL or a null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn raya_value_error(
    ctx: *mut RayaContext,
    message: *const c_char,
) -> *mut RayaValue {
    match c_str_arg(message, "message", ErrorKind::Usage) {
        Ok(s) => abi::new_value(ctx, NativeValue::error(s)),
        Err(_) => ptr::null_mut(),
    }
}

/// Free a value
///
/// NULL, already freed and borrowed (argument) handles are ignored.
///
/// # Safety
/// `value` may be any pointer value; invalid handles are ignored.
#[no_mangle]
pub unsafe extern "C" fn raya_value_free(value: *mut RayaValue) {
    abi::free_value(value);
}

// ============================================================================
// Accessors
// ============================================================================

/// Get the type of a value (`RAYA_TYPE_*`), or -1 for an invalid handle
///
/// # Safety
/// `value` may be any pointer value; invalid handles are detected.
#[no_mangle]
pub unsafe extern "C" fn raya_value_type(value: *const RayaValue) -> c_int {
    abi::with_value(value, |v| v.value_type() as c_int).unwrap_or(-1)
}

/// Read a boolean; 0 for non-booleans and invalid handles
///
/// # Safety
/// `value` may be any pointer value; invalid handles are detected.
#[no_mangle]
pub unsafe extern "C" fn raya_value_to_bool(value: *const RayaValue) -> c_int {
    abi::with_value(value, |v| v.to_bool_or_false() as c_int).unwrap_or(0)
}

/// Read an integer; 0 for non-integers and invalid handles
///
/// # Safety
/// `value` may be any pointer value; invalid handles are detected.
#[no_mangle]
pub unsafe extern "C" fn raya_value_to_i32(value: *const RayaValue) -> i32 {
    abi::with_value(value, NativeValue::to_i32_or_zero).unwrap_or(0)
}

/// Read a string
///
/// # Returns
/// * Null-terminated string owned by the value, valid until it is freed
/// * NULL for non-strings, invalid handles and strings with interior NULs
///
/// # Safety
/// Do not free the returned pointer.
#[no_mangle]
pub unsafe extern "C" fn raya_value_to_string(value: *const RayaValue) -> *const c_char {
    abi::value_c_str(value)
}

/// Number of elements in an array; 0 for non-arrays and invalid handles
///
/// # Safety
/// `array` may be any pointer value; invalid handles are detected.
#[no_mangle]
pub unsafe extern "C" fn raya_array_length(array: *const RayaValue) -> usize {
    abi::with_value(array, |v| v.as_array().map_or(0, <[NativeValue]>::len)).unwrap_or(0)
}

/// Copy element `index` into a new owned value
///
/// # Returns
/// * Value handle, or NULL for invalid handles, non-arrays and out-of-range
///   indices
///
/// # Safety
/// `ctx` must be NULL or the context of the running native function.
#[no_mangle]
pub unsafe extern "C" fn raya_array_get(
    ctx: *mut RayaContext,
    array: *const RayaValue,
    index: usize,
) -> *mut RayaValue {
    abi::array_get(ctx, array, index)
}

/// Store `element` at `index`
///
/// On success `element` is consumed and must not be used again. On failure
/// nothing is consumed.
///
/// # Returns
/// * 0 on success, -1 on error
///
/// # Safety
/// Both arguments may be any pointer value; invalid handles are detected.
#[no_mangle]
pub unsafe extern "C" fn raya_array_set(
    array: *mut RayaValue,
    index: usize,
    element: *mut RayaValue,
) -> c_int {
    if abi::array_set(array, index, element) {
        0
    } else {
        -1
    }
}
