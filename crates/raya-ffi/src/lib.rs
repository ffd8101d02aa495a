//! C FFI bindings for the Raya VM
//!
//! This crate provides a C-compatible API for embedding the Raya VM in other
//! languages and for writing native modules in C. The API follows these
//! principles:
//! - ABI-stable (uses only C-compatible types)
//! - Thread-safe (VM instances can be used from multiple threads)
//! - Error handling via out-parameters
//! - Opaque handles for every object
//!
//! Every opaque pointer is a generation-checked handle rather than a raw
//! address. Freeing twice, using a destroyed VM or restoring a consumed
//! snapshot is detected: `*_free` / `raya_vm_destroy` ignore the handle and
//! every other function fails with a usage error.
//!
//! The declarations live in `include/raya.h` (host API) and
//! `include/raya/module.h` (native module API).

mod config;
mod error;
mod loader;
mod module;
mod value;
mod vm;

pub use config::{host_config, ConfigError, HostConfig, LimitsConfig, CONFIG_FILE, ENV_HOME, ENV_MODULE_PATH};
pub use error::{live_error_count, FfiError};
pub use loader::{find_module, library_file_name, load_library_module, Library, LoadError};
pub use module::{insert_module, take_module};
pub use value::MAX_ARRAY_LENGTH;
pub use vm::live_vm_count;

pub use error::{raya_error_free, raya_error_kind, raya_error_message};
pub use module::{
    raya_module_builder_add_function, raya_module_builder_finish, raya_module_builder_free,
    raya_module_builder_new, raya_module_free, raya_module_function_count, raya_module_name,
};
pub use value::{
    raya_array_get, raya_array_length, raya_array_set, raya_value_array, raya_value_bool,
    raya_value_error, raya_value_free, raya_value_i32, raya_value_null, raya_value_string,
    raya_value_to_bool, raya_value_to_i32, raya_value_to_string, raya_value_type,
};
pub use vm::{
    raya_snapshot_free, raya_snapshot_read_file, raya_snapshot_write_file, raya_vm_destroy,
    raya_vm_load_bytes, raya_vm_load_file, raya_vm_load_native_library, raya_vm_load_native_module,
    raya_vm_new, raya_vm_register_module, raya_vm_restore, raya_vm_run_entry,
    raya_vm_run_entry_value, raya_vm_snapshot, raya_vm_terminate,
};

pub use raya_sdk::{
    RayaContext, RayaError, RayaModule, RayaModuleBuilder, RayaModuleInitFn, RayaNativeFn,
    RayaSnapshot, RayaVM, RayaValue,
};

use std::ffi::c_char;

// ============================================================================
// Version Information
// ============================================================================

/// Get the Raya VM version string
///
/// # Returns
/// * Null-terminated `MAJOR.MINOR.PATCH` string (e.g., "0.2.0")
///
/// The returned string is static and must not be freed.
#[no_mangle]
pub extern "C" fn raya_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}
