//! `native:doubler`, built as a standalone shared library
//!
//! Nothing is linked in: the `raya_*` symbols resolve against the
//! `libraya_ffi` that is already loaded when the host opens this library.

use std::ffi::{c_char, c_int, c_void};
use std::ptr;

type Handle = c_void;
type NativeFn = unsafe extern "C" fn(*mut Handle, *const *mut Handle, usize) -> *mut Handle;

extern "C" {
    fn raya_module_builder_new(name: *const c_char, version: *const c_char, error: *mut *mut Handle) -> *mut Handle;
    fn raya_module_builder_add_function(
        builder: *mut Handle,
        name: *const c_char,
        func: Option<NativeFn>,
        arity: usize,
        error: *mut *mut Handle,
    ) -> c_int;
    fn raya_module_builder_finish(builder: *mut Handle, error: *mut *mut Handle) -> *mut Handle;
    fn raya_value_i32(value: i32) -> *mut Handle;
    fn raya_value_to_i32(value: *const Handle) -> i32;
}

unsafe extern "C" fn double(_: *mut Handle, args: *const *mut Handle, argc: usize) -> *mut Handle {
    let value = if argc == 1 { raya_value_to_i32(*args) } else { 0 };
    raya_value_i32(value.wrapping_mul(2))
}

/// Entry point found by `raya_vm_load_native_library`
///
/// # Safety
/// Must only be called by a host that exports the `raya_*` C API.
#[no_mangle]
pub unsafe extern "C" fn raya_module_init_doubler() -> *mut Handle {
    let builder = raya_module_builder_new(c"doubler".as_ptr(), c"1.0.0".as_ptr(), ptr::null_mut());
    if builder.is_null() {
        return ptr::null_mut();
    }
    raya_module_builder_add_function(builder, c"double".as_ptr(), Some(double), 1, ptr::null_mut());
    raya_module_builder_finish(builder, ptr::null_mut())
}
