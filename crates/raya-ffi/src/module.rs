//! Native module construction through the C API
//!
//! A builder handle is consumed by `raya_module_builder_finish()`; the
//! resulting module handle is consumed when it is registered with a VM or
//! returned from a library's entry point.

use crate::error::{fail, set_error, FfiError};
use crate::value::c_str_arg;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use raya_sdk::{
    ErrorKind, HandleKind, HandleTable, ModuleBuilder, NativeModule, RayaError, RayaModule,
    RayaModuleBuilder, RayaNativeFn,
};
use std::ffi::{c_char, c_int, CString};
use std::ptr;

struct ModuleEntry {
    module: NativeModule,
    name: CString,
}

static BUILDERS: Lazy<Mutex<HandleTable<ModuleBuilder>>> =
    Lazy::new(|| Mutex::new(HandleTable::new(HandleKind::Builder)));

static MODULES: Lazy<Mutex<HandleTable<ModuleEntry>>> =
    Lazy::new(|| Mutex::new(HandleTable::new(HandleKind::Module)));

const STALE_BUILDER: &str = "module builder is invalid or already finished";

/// Hand a finished module to C as a `RayaModule*`
///
/// NULL when the handle table is exhausted.
pub fn insert_module(module: NativeModule) -> *mut RayaModule {
    let name = CString::new(module.name()).unwrap_or_default();
    MODULES
        .lock()
        .insert(ModuleEntry { module, name })
        .map_or(ptr::null_mut(), |h| h.to_ptr())
}

/// Take ownership of the module behind a live handle
pub fn take_module(ptr: *mut RayaModule) -> Option<NativeModule> {
    MODULES.lock().remove_ptr(ptr).map(|entry| entry.module)
}

/// Create a module builder
///
/// # Arguments
/// * `name` - Module name, as used in bytecode imports
/// * `version` - `MAJOR.MINOR.PATCH`
/// * `error` - Output error (can be NULL)
///
/// # Returns
/// * Builder handle, or NULL on error
///
/// # Example (C)
/// ```c
/// RayaError* error = NULL;
/// RayaModuleBuilder* b = raya_module_builder_new("math", "1.0.0", &error);
/// raya_module_builder_add_function(b, "add", math_add, 2, &error);
/// RayaModule* m = raya_module_builder_finish(b, &error);
/// ```
///
/// # Safety
/// `name` and `version` must be NULL or null-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn raya_module_builder_new(
    name: *const c_char,
    version: *const c_char,
    error: *mut *mut RayaError,
) -> *mut RayaModuleBuilder {
    let built = c_str_arg(name, "name", ErrorKind::Load)
        .and_then(|name| Ok((name, c_str_arg(version, "version", ErrorKind::Load)?)))
        .and_then(|(name, version)| ModuleBuilder::new(name, version).map_err(FfiError::from));

    let builder = match built {
        Ok(builder) => builder,
        Err(e) => {
            set_error(error, e);
            return ptr::null_mut();
        }
    };

    match BUILDERS.lock().insert(builder) {
        Some(handle) => handle.to_ptr(),
        None => {
            set_error(error, FfiError::usage("too many live module builders"));
            ptr::null_mut()
        }
    }
}

/// Add or replace a function
///
/// Adding a name that already exists replaces the earlier function.
///
/// # Returns
/// * 0 on success, -1 on error
///
/// # Safety
/// `name` must be NULL or a null-terminated string. `func` must follow the
/// native function signature.
#[no_mangle]
pub unsafe extern "C" fn raya_module_builder_add_function(
    builder: *mut RayaModuleBuilder,
    name: *const c_char,
    func: Option<RayaNativeFn>,
    arity: usize,
    error: *mut *mut RayaError,
) -> c_int {
    let name = match c_str_arg(name, "name", ErrorKind::Load) {
        Ok(name) => name,
        Err(e) => return fail(error, e),
    };
    let Some(func) = func else {
        return fail(error, FfiError::new(ErrorKind::Load, "function pointer must not be NULL"));
    };

    let mut builders = BUILDERS.lock();
    let Some(builder) = builders.get_ptr_mut(builder) else {
        drop(builders);
        return fail(error, FfiError::usage(STALE_BUILDER));
    };
    match builder.add_function(name, func, arity) {
        Ok(_) => 0,
        Err(e) => {
            drop(builders);
            fail(error, e)
        }
    }
}

/// Finish a builder
///
/// The builder handle is consumed; a second finish fails with a usage error.
///
/// # Returns
/// * Module handle, or NULL on error
///
/// # Safety
/// `builder` may be any pointer value; invalid handles are detected.
#[no_mangle]
pub unsafe extern "C" fn raya_module_builder_finish(
    builder: *mut RayaModuleBuilder,
    error: *mut *mut RayaError,
) -> *mut RayaModule {
    let taken = BUILDERS.lock().remove_ptr(builder);
    let Some(builder) = taken else {
        set_error(error, FfiError::usage(STALE_BUILDER));
        return ptr::null_mut();
    };

    let module = insert_module(builder.finish());
    if module.is_null() {
        set_error(error, FfiError::usage("too many live modules"));
    }
    module
}

/// Discard an unfinished builder
///
/// # Safety
/// `builder` may be any pointer value; invalid handles are ignored.
#[no_mangle]
pub unsafe extern "C" fn raya_module_builder_free(builder: *mut RayaModuleBuilder) {
    let builder = BUILDERS.lock().remove_ptr(builder);
    drop(builder);
}

/// Get a module's name
///
/// # Returns
/// * Null-terminated name, valid until the module is freed or registered
/// * NULL for an invalid handle
///
/// # Safety
/// `module` may be any pointer value; invalid handles are detected.
#[no_mangle]
pub unsafe extern "C" fn raya_module_name(module: *const RayaModule) -> *const c_char {
    MODULES
        .lock()
        .get_ptr(module)
        .map_or(ptr::null(), |entry| entry.name.as_ptr())
}

/// Number of functions in a module, or 0 for an invalid handle
///
/// # Safety
/// `module` may be any pointer value; invalid handles are detected.
#[no_mangle]
pub unsafe extern "C" fn raya_module_function_count(module: *const RayaModule) -> usize {
    MODULES
        .lock()
        .get_ptr(module)
        .map_or(0, |entry| entry.module.function_count())
}

/// Free a module that was never registered
///
/// # Safety
/// `module` may be any pointer value; invalid handles are ignored.
#[no_mangle]
pub unsafe extern "C" fn raya_module_free(module: *mut RayaModule) {
    drop(take_module(module));
}

#[cfg(test)]
mod tests {
    use super::*;
    use raya_sdk::{abi, NativeValue, RayaContext, RayaValue};
    use std::ffi::CStr;

    unsafe extern "C" fn one(ctx: *mut RayaContext, _: *const *mut RayaValue, _: usize) -> *mut RayaValue {
        abi::new_value(ctx, NativeValue::I32(1))
    }

    #[test]
    fn test_build_module() {
        unsafe {
            let mut error: *mut RayaError = ptr::null_mut();
            let builder = raya_module_builder_new(c"demo".as_ptr(), c"1.2.3".as_ptr(), &mut error);
            assert!(!builder.is_null());
            assert_eq!(
                raya_module_builder_add_function(builder, c"one".as_ptr(), Some(one), 0, &mut error),
                0
            );

            let module = raya_module_builder_finish(builder, &mut error);
            assert!(!module.is_null());
            assert_eq!(CStr::from_ptr(raya_module_name(module)).to_str().unwrap(), "demo");
            assert_eq!(raya_module_function_count(module), 1);

            let native = take_module(module).unwrap();
            assert_eq!(native.version(), "1.2.3");
            assert!(raya_module_name(module).is_null());
        }
    }

    #[test]
    fn test_bad_version_rejected() {
        unsafe {
            let mut error: *mut RayaError = ptr::null_mut();
            let builder = raya_module_builder_new(c"demo".as_ptr(), c"1.0".as_ptr(), &mut error);
            assert!(builder.is_null());
            assert_eq!(crate::raya_error_kind(error), raya_sdk::ErrorKind::Load as c_int);
            crate::raya_error_free(error);
        }
    }

    #[test]
    fn test_finished_builder_is_consumed() {
        unsafe {
            let builder = raya_module_builder_new(c"once".as_ptr(), c"0.1.0".as_ptr(), ptr::null_mut());
            let module = raya_module_builder_finish(builder, ptr::null_mut());
            assert!(!module.is_null());

            let mut error: *mut RayaError = ptr::null_mut();
            assert!(raya_module_builder_finish(builder, &mut error).is_null());
            assert_eq!(crate::raya_error_kind(error), raya_sdk::ErrorKind::Usage as c_int);
            crate::raya_error_free(error);

            assert_eq!(
                raya_module_builder_add_function(builder, c"late".as_ptr(), Some(one), 0, ptr::null_mut()),
                -1
            );
            raya_module_builder_free(builder);
            raya_module_free(module);
            raya_module_free(module);
        }
    }

    #[test]
    fn test_null_function_pointer_rejected() {
        unsafe {
            let builder = raya_module_builder_new(c"nulls".as_ptr(), c"0.1.0".as_ptr(), ptr::null_mut());
            let mut error: *mut RayaError = ptr::null_mut();
            assert_eq!(
                raya_module_builder_add_function(builder, c"f".as_ptr(), None, 0, &mut error),
                -1
            );
            assert_eq!(crate::raya_error_kind(error), raya_sdk::ErrorKind::Load as c_int);
            crate::raya_error_free(error);
            raya_module_builder_free(builder);
        }
    }
}
