//! VM lifecycle, loading, execution and snapshots

use crate::config::{host_config, HostConfig};
use crate::error::{fail, set_error, FfiError};
use crate::loader;
use crate::module::take_module;
use crate::value::c_str_arg;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use raya_core::{SnapshotError, Vm, VmSnapshot};
use raya_sdk::{abi, ErrorKind, HandleKind, HandleTable, RayaError, RayaModule, RayaSnapshot, RayaVM, RayaValue};
use std::ffi::{c_char, c_int};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

/// A VM together with the configuration it was created under
struct VmHost {
    vm: Vm,
    config: Arc<HostConfig>,
}

static VMS: Lazy<Mutex<HandleTable<Arc<VmHost>>>> =
    Lazy::new(|| Mutex::new(HandleTable::new(HandleKind::Vm)));

static SNAPSHOTS: Lazy<Mutex<HandleTable<VmSnapshot>>> =
    Lazy::new(|| Mutex::new(HandleTable::new(HandleKind::Snapshot)));

/// Resolve a VM handle; the table lock is released before the VM is used
fn host(vm: *const RayaVM) -> Result<Arc<VmHost>, FfiError> {
    VMS.lock()
        .get_ptr(vm)
        .cloned()
        .ok_or_else(|| FfiError::usage("VM handle is invalid or was destroyed"))
}

/// Run `f` against a live VM, mapping the outcome to 0 / -1
unsafe fn with_host(
    vm: *const RayaVM,
    error: *mut *mut RayaError,
    f: impl FnOnce(&VmHost) -> Result<(), FfiError>,
) -> c_int {
    match host(vm).and_then(|h| f(&h)) {
        Ok(()) => 0,
        Err(e) => fail(error, e),
    }
}

unsafe fn insert_snapshot(snapshot: VmSnapshot, error: *mut *mut RayaError) -> *mut RayaSnapshot {
    let inserted = SNAPSHOTS.lock().insert(snapshot);
    match inserted {
        Some(handle) => handle.to_ptr(),
        None => {
            set_error(error, FfiError::usage("too many live snapshots"));
            ptr::null_mut()
        }
    }
}

/// Number of live VMs in the process
pub fn live_vm_count() -> usize {
    VMS.lock().len()
}

// ============================================================================
// VM Lifecycle Functions
// ============================================================================

/// Create a new Raya VM instance
///
/// The VM starts empty, with the resource limits from the host
/// configuration (unbounded by default).
///
/// # Arguments
/// * `error` - Optional pointer to receive error information
///
/// # Returns
/// * Non-null pointer to RayaVM on success
/// * NULL on failure (check error parameter)
///
/// # Example (C)
/// ```c
/// RayaError* error = NULL;
/// RayaVM* vm = raya_vm_new(&error);
/// if (vm == NULL) {
///     fprintf(stderr, "Failed to create VM: %s\n", raya_error_message(error));
///     raya_error_free(error);
///     return 1;
/// }
/// // Use VM...
/// raya_vm_destroy(vm);
/// ```
///
/// # Safety
/// `error` must be NULL or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn raya_vm_new(error: *mut *mut RayaError) -> *mut RayaVM {
    let created = host_config().and_then(|config| {
        let vm = Vm::new(config.vm_options())?;
        Ok(VmHost { vm, config })
    });
    let host = match created {
        Ok(host) => host,
        Err(e) => {
            set_error(error, e);
            return ptr::null_mut();
        }
    };

    let id = host.vm.context_id();
    let inserted = VMS.lock().insert(Arc::new(host));
    match inserted {
        Some(handle) => {
            raya_core::vm_debug!("ffi: created VM {:?}", id);
            handle.to_ptr()
        }
        None => {
            set_error(error, FfiError::new(raya_sdk::ErrorKind::Init, "too many live VMs"));
            ptr::null_mut()
        }
    }
}

/// Destroy a Raya VM instance and free all resources
///
/// Safe to call with NULL or an already destroyed VM. The host must not use
/// the VM from other threads during this call.
///
/// # Safety
/// `vm` may be any pointer value; invalid handles are ignored.
#[no_mangle]
pub unsafe extern "C" fn raya_vm_destroy(vm: *mut RayaVM) {
    let removed = VMS.lock().remove_ptr(vm);
    if let Some(host) = removed {
        raya_core::vm_debug!("ffi: destroying VM {:?}", host.vm.context_id());
        if let Err(e) = host.vm.terminate() {
            raya_core::vm_warn!("ffi: terminate during destroy failed: {}", e);
        }
    }
}

/// Load a .rbin bytecode file into the VM
///
/// # Arguments
/// * `vm` - VM handle
/// * `path` - Path to the .rbin file (null-terminated UTF-8)
/// * `error` - Optional pointer to receive error information
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// `path` must be NULL or a null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn raya_vm_load_file(
    vm: *mut RayaVM,
    path: *const c_char,
    error: *mut *mut RayaError,
) -> c_int {
    with_host(vm, error, |host| {
        let path = c_str_arg(path, "path", ErrorKind::Load)?;
        host.vm.load_rbin(Path::new(path))?;
        Ok(())
    })
}

/// Load bytecode from a buffer
///
/// # Arguments
/// * `vm` - VM handle
/// * `bytes` - Bytecode buffer
/// * `length` - Buffer length in bytes
/// * `error` - Optional pointer to receive error information
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// `bytes` must be NULL or valid for reads of `length` bytes.
#[no_mangle]
pub unsafe extern "C" fn raya_vm_load_bytes(
    vm: *mut RayaVM,
    bytes: *const u8,
    length: usize,
    error: *mut *mut RayaError,
) -> c_int {
    with_host(vm, error, |host| {
        let bytes: &[u8] = match (bytes.is_null(), length) {
            (true, 0) => &[],
            (true, _) => return Err(FfiError::new(ErrorKind::Load, "bytes must not be NULL")),
            (false, _) => std::slice::from_raw_parts(bytes, length),
        };
        host.vm.load_rbin_bytes(bytes)?;
        Ok(())
    })
}

/// Run an entry point to completion
///
/// Blocks until the entry function and every task it spawned have finished.
/// `name` is either a function name (first match in load order) or
/// `module.function`.
///
/// # Returns
/// * 0 on success
/// * -1 on failure; the error describes the fault
///
/// # Safety
/// `name` must be NULL or a null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn raya_vm_run_entry(
    vm: *mut RayaVM,
    name: *const c_char,
    error: *mut *mut RayaError,
) -> c_int {
    with_host(vm, error, |host| {
        let name = c_str_arg(name, "entry name", ErrorKind::Runtime)?;
        host.vm.run_entry(name)?;
        Ok(())
    })
}

/// Run an entry point and return its result
///
/// Same as `raya_vm_run_entry()`, but hands back the value returned by the
/// entry function as an owned handle (free with `raya_value_free()`).
///
/// # Returns
/// * Value handle on success
/// * NULL on failure (check error parameter)
///
/// # Safety
/// `name` must be NULL or a null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn raya_vm_run_entry_value(
    vm: *mut RayaVM,
    name: *const c_char,
    error: *mut *mut RayaError,
) -> *mut RayaValue {
    let result = host(vm).and_then(|host| {
        let name = c_str_arg(name, "entry name", ErrorKind::Runtime)?;
        Ok(host.vm.run_entry(name)?)
    });
    match result {
        Ok(value) => {
            let handle = abi::new_value(ptr::null_mut(), value);
            if handle.is_null() {
                set_error(error, FfiError::usage("too many live values"));
            }
            handle
        }
        Err(e) => {
            set_error(error, e);
            ptr::null_mut()
        }
    }
}

/// Stop all running tasks
///
/// Loaded modules and globals are kept; the VM can run again afterwards.
/// Terminating an idle VM succeeds.
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// `vm` may be any pointer value; invalid handles are detected.
#[no_mangle]
pub unsafe extern "C" fn raya_vm_terminate(vm: *mut RayaVM, error: *mut *mut RayaError) -> c_int {
    with_host(vm, error, |host| Ok(host.vm.terminate()?))
}

// ============================================================================
// Native Modules
// ============================================================================

/// Make a native module available to this VM's bytecode imports
///
/// The module handle is consumed, whether or not registration succeeds.
/// Register modules before loading bytecode that imports them.
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// Both handles may be any pointer value; invalid handles are detected.
#[no_mangle]
pub unsafe extern "C" fn raya_vm_register_module(
    vm: *mut RayaVM,
    module: *mut RayaModule,
    error: *mut *mut RayaError,
) -> c_int {
    let host = match host(vm) {
        Ok(host) => host,
        Err(e) => return fail(error, e),
    };
    let Some(module) = take_module(module) else {
        return fail(error, FfiError::usage("module handle is invalid or already consumed"));
    };
    match host.vm.register_native_module(Arc::new(module)) {
        Ok(()) => 0,
        Err(e) => fail(error, e),
    }
}

/// Load native module `name` from the configured module directory
///
/// Looks for `<DLL_PREFIX><name><DLL_SUFFIX>` (for example `libcrypto.so`),
/// calls its `<prefix>_module_init_<name>` entry point and registers the
/// result with the VM.
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// `name` must be NULL or a null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn raya_vm_load_native_module(
    vm: *mut RayaVM,
    name: *const c_char,
    error: *mut *mut RayaError,
) -> c_int {
    with_host(vm, error, |host| {
        let name = c_str_arg(name, "module name", ErrorKind::Load)?;
        let path = loader::find_module(&host.config.module_dir, name)?;
        let module = loader::load_library_module(&path, &host.config.symbol_prefix, name)?;
        host.vm.register_native_module(Arc::new(module))?;
        Ok(())
    })
}

/// Load native module `name` from an explicit library path
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// `path` and `name` must be NULL or null-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn raya_vm_load_native_library(
    vm: *mut RayaVM,
    path: *const c_char,
    name: *const c_char,
    error: *mut *mut RayaError,
) -> c_int {
    with_host(vm, error, |host| {
        let path = c_str_arg(path, "path", ErrorKind::Load)?;
        let name = c_str_arg(name, "module name", ErrorKind::Load)?;
        let module = loader::load_library_module(Path::new(path), &host.config.symbol_prefix, name)?;
        host.vm.register_native_module(Arc::new(module))?;
        Ok(())
    })
}

// ============================================================================
// Snapshot Functions
// ============================================================================

/// Create a snapshot of the VM state
///
/// If an entry point is running on another thread, this waits for it to
/// finish first.
///
/// # Returns
/// * Pointer to RayaSnapshot on success
/// * NULL on failure (check error parameter); `RAYA_ERROR_UNSUPPORTED`
///   when the library was built without snapshot support
///
/// # Safety
/// The returned snapshot must be consumed by `raya_vm_restore()` or freed
/// with `raya_snapshot_free()`.
#[no_mangle]
pub unsafe extern "C" fn raya_vm_snapshot(
    vm: *mut RayaVM,
    error: *mut *mut RayaError,
) -> *mut RayaSnapshot {
    let snapshot = host(vm).and_then(|host| Ok(host.vm.snapshot()?));
    let snapshot = match snapshot {
        Ok(snapshot) => snapshot,
        Err(e) => {
            set_error(error, e);
            return ptr::null_mut();
        }
    };

    insert_snapshot(snapshot, error)
}

/// Restore VM state from a snapshot
///
/// The snapshot is consumed, even if restoring fails; using it again is a
/// usage error. On failure the VM keeps its previous state.
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// Both handles may be any pointer value; invalid handles are detected.
#[no_mangle]
pub unsafe extern "C" fn raya_vm_restore(
    vm: *mut RayaVM,
    snapshot: *mut RayaSnapshot,
    error: *mut *mut RayaError,
) -> c_int {
    let host = match host(vm) {
        Ok(host) => host,
        Err(e) => return fail(error, e),
    };
    let taken = SNAPSHOTS.lock().remove_ptr(snapshot);
    let Some(snapshot) = taken else {
        return fail(error, FfiError::usage("snapshot handle is invalid or already consumed"));
    };
    match host.vm.restore(snapshot) {
        Ok(()) => 0,
        Err(e) => fail(error, e),
    }
}

/// Write a snapshot to a file without consuming it
///
/// # Returns
/// * 0 on success
/// * -1 on failure (check error parameter)
///
/// # Safety
/// `path` must be NULL or a null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn raya_snapshot_write_file(
    snapshot: *const RayaSnapshot,
    path: *const c_char,
    error: *mut *mut RayaError,
) -> c_int {
    let path = match c_str_arg(path, "path", ErrorKind::Runtime) {
        Ok(path) => path,
        Err(e) => return fail(error, e),
    };
    // Serialize under the table lock, write after releasing it
    let encoded = SNAPSHOTS.lock().get_ptr(snapshot).map(VmSnapshot::to_bytes);
    let written = match encoded {
        Some(Ok(bytes)) => std::fs::write(path, bytes).map_err(SnapshotError::from),
        Some(Err(e)) => Err(e),
        None => {
            return fail(error, FfiError::usage("snapshot handle is invalid or already consumed"));
        }
    };
    match written {
        Ok(()) => 0,
        Err(e) => fail(error, raya_core::VmError::from(e)),
    }
}

/// Read a snapshot written by `raya_snapshot_write_file()`
///
/// # Returns
/// * Snapshot handle, or NULL on failure (check error parameter)
///
/// # Safety
/// `path` must be NULL or a null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn raya_snapshot_read_file(
    path: *const c_char,
    error: *mut *mut RayaError,
) -> *mut RayaSnapshot {
    let read = c_str_arg(path, "path", ErrorKind::Runtime)
        .and_then(|path| VmSnapshot::read_from_file(path).map_err(|e| raya_core::VmError::from(e).into()));
    match read {
        Ok(snapshot) => insert_snapshot(snapshot, error),
        Err(e) => {
            set_error(error, e);
            ptr::null_mut()
        }
    }
}

/// Free a snapshot that was not restored
///
/// Safe to call with NULL, a freed snapshot or a consumed one.
///
/// # Safety
/// `snapshot` may be any pointer value; invalid handles are ignored.
#[no_mangle]
pub unsafe extern "C" fn raya_snapshot_free(snapshot: *mut RayaSnapshot) {
    let snapshot = SNAPSHOTS.lock().remove_ptr(snapshot);
    drop(snapshot);
}
