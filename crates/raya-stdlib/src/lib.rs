//! Raya Standard Library
//!
//! Native modules written against the public C ABI of `raya-ffi`, the same
//! surface a C module would use:
//!
//! - [`crypto`]: hashing, secure random bytes, constant-time comparison
//! - [`fs`]: text files and directories
//!
//! Each module exposes `module()` for in-process registration with
//! `raya_vm_register_module()`, and a `raya_module_init_<name>` entry point.

#![warn(missing_docs)]

pub mod args;
pub mod crypto;
pub mod fs;

use raya_ffi::{
    raya_module_builder_add_function, raya_module_builder_finish, raya_module_builder_free,
    raya_module_builder_new, RayaModule, RayaNativeFn,
};
use std::ffi::CString;
use std::ptr;

/// Version reported by every module in this crate
pub const MODULE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build a module from a function table through the C builder API
///
/// Returns NULL if any step is rejected.
pub fn build_module(name: &str, functions: &[(&str, RayaNativeFn, usize)]) -> *mut RayaModule {
    let (Ok(c_name), Ok(c_version)) = (CString::new(name), CString::new(MODULE_VERSION)) else {
        return ptr::null_mut();
    };
    unsafe {
        let builder = raya_module_builder_new(c_name.as_ptr(), c_version.as_ptr(), ptr::null_mut());
        if builder.is_null() {
            return ptr::null_mut();
        }
        for &(fn_name, func, arity) in functions {
            let Ok(c_fn_name) = CString::new(fn_name) else {
                raya_module_builder_free(builder);
                return ptr::null_mut();
            };
            if raya_module_builder_add_function(builder, c_fn_name.as_ptr(), Some(func), arity, ptr::null_mut()) != 0 {
                raya_module_builder_free(builder);
                return ptr::null_mut();
            }
        }
        raya_module_builder_finish(builder, ptr::null_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raya_ffi::{raya_module_free, raya_module_function_count, raya_module_name};
    use std::ffi::CStr;

    #[test]
    fn test_modules_build() {
        for (module, name, count) in [(crypto::module(), "crypto", 6), (fs::module(), "fs", 8)] {
            assert!(!module.is_null());
            unsafe {
                assert_eq!(CStr::from_ptr(raya_module_name(module)).to_str().unwrap(), name);
                assert_eq!(raya_module_function_count(module), count);
                raya_module_free(module);
            }
        }
    }

    #[test]
    fn test_bad_name_rejected() {
        assert!(build_module("", &[]).is_null());
    }
}
