//! Error channel
//!
//! Every fallible `raya_*` function takes an optional `RayaError**`. On
//! failure it stores a freshly allocated error there (when the pointer is
//! non-NULL) and signals the failure through its return value. Error objects
//! live in a generation-checked handle table, so freeing one twice or reading
//! a freed one is harmless.

use crate::config::ConfigError;
use crate::loader::LoadError;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use raya_core::VmError;
use raya_sdk::{ErrorKind, HandleKind, HandleTable, NativeError, RayaError};
use std::ffi::{c_char, c_int, CString};
use std::ptr;

struct ErrorEntry {
    kind: ErrorKind,
    message: CString,
}

static ERRORS: Lazy<Mutex<HandleTable<ErrorEntry>>> =
    Lazy::new(|| Mutex::new(HandleTable::new(HandleKind::Error)));

/// A failure on its way to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfiError {
    /// Error category
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

impl FfiError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Stale, freed or consumed handle
    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, message)
    }
}

impl From<VmError> for FfiError {
    fn from(e: VmError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<NativeError> for FfiError {
    fn from(e: NativeError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<LoadError> for FfiError {
    fn from(e: LoadError) -> Self {
        Self::new(ErrorKind::Load, e.to_string())
    }
}

impl From<ConfigError> for FfiError {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::Init, e.to_string())
    }
}

/// Allocate an error handle; NULL if the table is exhausted
fn new_error(error: FfiError) -> *mut RayaError {
    // Interior NULs would truncate the message on the C side
    let message = CString::new(error.message.replace('\0', "\u{FFFD}")).unwrap_or_default();
    ERRORS
        .lock()
        .insert(ErrorEntry {
            kind: error.kind,
            message,
        })
        .map_or(ptr::null_mut(), |h| h.to_ptr())
}

/// Store `error` in the out-parameter, if one was supplied
///
/// # Safety
/// `out` must be NULL or valid for writes.
pub(crate) unsafe fn set_error(out: *mut *mut RayaError, error: impl Into<FfiError>) {
    let error = error.into();
    raya_core::vm_debug!("ffi: {}: {}", error.kind, error.message);
    if !out.is_null() {
        *out = new_error(error);
    }
}

/// Report a failure from a function returning a status code
///
/// # Safety
/// Same as [`set_error`].
pub(crate) unsafe fn fail(out: *mut *mut RayaError, error: impl Into<FfiError>) -> c_int {
    set_error(out, error);
    -1
}

/// Number of live error objects
pub fn live_error_count() -> usize {
    ERRORS.lock().len()
}

/// Get the error message
///
/// # Returns
/// * Null-terminated message, valid until `raya_error_free()`
/// * NULL if `error` is NULL or already freed
///
/// # Safety
/// Do not free the returned string directly.
#[no_mangle]
pub unsafe extern "C" fn raya_error_message(error: *const RayaError) -> *const c_char {
    ERRORS
        .lock()
        .get_ptr(error)
        .map_or(ptr::null(), |entry| entry.message.as_ptr())
}

/// Get the error kind (`RAYA_ERROR_*`), or 0 for an invalid handle
///
/// # Safety
/// `error` may be any pointer value; invalid handles are detected.
#[no_mangle]
pub unsafe extern "C" fn raya_error_kind(error: *const RayaError) -> c_int {
    ERRORS
        .lock()
        .get_ptr(error)
        .map_or(0, |entry| entry.kind as c_int)
}

/// Free an error
///
/// Safe to call with NULL or an already freed error.
///
/// # Safety
/// `error` may be any pointer value; invalid handles are ignored.
#[no_mangle]
pub unsafe extern "C" fn raya_error_free(error: *mut RayaError) {
    let entry = ERRORS.lock().remove_ptr(error);
    drop(entry);
}
