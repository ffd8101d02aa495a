//! Loading a native module from a shared library on disk
//!
//! The host here is the `libraya_ffi` shared library itself, opened with
//! `RTLD_GLOBAL` the way a C program links it, so the plugin's `raya_*`
//! references bind to the same handle tables the VM uses.

#![cfg(target_os = "linux")]

use raya_bytecode::{BytecodeWriter, Function, Module};
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::ptr;

type Handle = c_void;

/// The slice of the C API these tests call, bound from the shared library
struct CApi {
    _lib: *mut c_void,
    vm_new: unsafe extern "C" fn(*mut *mut Handle) -> *mut Handle,
    vm_destroy: unsafe extern "C" fn(*mut Handle),
    load_bytes: unsafe extern "C" fn(*mut Handle, *const u8, usize, *mut *mut Handle) -> c_int,
    load_native_library:
        unsafe extern "C" fn(*mut Handle, *const c_char, *const c_char, *mut *mut Handle) -> c_int,
    run_entry_value: unsafe extern "C" fn(*mut Handle, *const c_char, *mut *mut Handle) -> *mut Handle,
    value_to_i32: unsafe extern "C" fn(*const Handle) -> i32,
    value_free: unsafe extern "C" fn(*mut Handle),
    error_kind: unsafe extern "C" fn(*const Handle) -> c_int,
    error_message: unsafe extern "C" fn(*const Handle) -> *const c_char,
    error_free: unsafe extern "C" fn(*mut Handle),
}

unsafe fn symbol<T: Copy>(lib: *mut c_void, name: &CStr) -> T {
    let symbol = libc::dlsym(lib, name.as_ptr());
    assert!(!symbol.is_null(), "missing symbol {:?}", name);
    std::mem::transmute_copy(&symbol)
}

impl CApi {
    unsafe fn open(path: &Path) -> Self {
        let c_path = CString::new(path.to_str().unwrap()).unwrap();
        let lib = libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL);
        assert!(!lib.is_null(), "cannot open {}", path.display());
        CApi {
            _lib: lib,
            vm_new: symbol(lib, c"raya_vm_new"),
            vm_destroy: symbol(lib, c"raya_vm_destroy"),
            load_bytes: symbol(lib, c"raya_vm_load_bytes"),
            load_native_library: symbol(lib, c"raya_vm_load_native_library"),
            run_entry_value: symbol(lib, c"raya_vm_run_entry_value"),
            value_to_i32: symbol(lib, c"raya_value_to_i32"),
            value_free: symbol(lib, c"raya_value_free"),
            error_kind: symbol(lib, c"raya_error_kind"),
            error_message: symbol(lib, c"raya_error_message"),
            error_free: symbol(lib, c"raya_error_free"),
        }
    }

    /// Takes the error out of `slot`, returning (kind, message)
    unsafe fn take_error(&self, slot: &mut *mut Handle) -> (c_int, String) {
        assert!(!slot.is_null(), "expected an error");
        let kind = (self.error_kind)(*slot);
        let message = CStr::from_ptr((self.error_message)(*slot))
            .to_string_lossy()
            .into_owned();
        (self.error_free)(*slot);
        *slot = ptr::null_mut();
        (kind, message)
    }
}

fn library_file_name(name: &str) -> String {
    format!("{}{}{}", DLL_PREFIX, name, DLL_SUFFIX)
}

fn cargo_build(args: &[&str]) {
    let status = Command::new(env!("CARGO"))
        .arg("build")
        .args(args)
        .status()
        .expect("cargo runs");
    assert!(status.success(), "cargo build {:?} failed", args);
}

/// The `libraya_ffi` shared library cargo built next to this test, or a
/// fresh build of it
fn ffi_library() -> PathBuf {
    let exe = std::env::current_exe().unwrap();
    let file = library_file_name("raya_ffi");
    let built = exe
        .ancestors()
        .skip(1)
        .take(2)
        .map(|dir| dir.join(&file))
        .find(|path| path.is_file());
    if let Some(path) = built {
        return path;
    }

    let target = Path::new(env!("CARGO_TARGET_TMPDIR")).join("raya-ffi");
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
    cargo_build(&[
        "--manifest-path",
        manifest.to_str().unwrap(),
        "--target-dir",
        target.to_str().unwrap(),
    ]);
    target.join("debug").join(file)
}

/// Build the `doubler` fixture and return its library path
fn doubler_library() -> PathBuf {
    let target = Path::new(env!("CARGO_TARGET_TMPDIR")).join("doubler");
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/doubler/Cargo.toml");
    cargo_build(&[
        "--manifest-path",
        manifest.to_str().unwrap(),
        "--target-dir",
        target.to_str().unwrap(),
    ]);
    target.join("debug").join(library_file_name("doubler"))
}

/// `main()` returns `doubler.double(21)`
fn calls_doubler() -> Vec<u8> {
    let mut module = Module::new("app");
    let double = module.add_native_import("doubler", &["double"]);
    let mut writer = BytecodeWriter::new();
    writer.emit_const_i32(21);
    writer.emit_call_native(double, 1);
    writer.emit_return();
    module.add_function(Function {
        name: "main".to_string(),
        param_count: 0,
        local_count: 0,
        code: writer.into_bytes(),
    });
    module.encode()
}

#[test]
fn test_native_library_called_from_bytecode() {
    let plugin = doubler_library();
    let plugin_path = CString::new(plugin.to_str().unwrap()).unwrap();
    let bytes = calls_doubler();

    unsafe {
        let api = CApi::open(&ffi_library());
        let mut error = ptr::null_mut();
        let vm = (api.vm_new)(&mut error);
        assert!(!vm.is_null());

        // Wrong module name for this library: the entry symbol is missing
        assert_eq!(
            (api.load_native_library)(vm, plugin_path.as_ptr(), c"tripler".as_ptr(), &mut error),
            -1
        );
        let (kind, message) = api.take_error(&mut error);
        assert_eq!(kind, 2);
        assert!(message.contains("raya_module_init_tripler"), "{}", message);

        let loaded = (api.load_native_library)(vm, plugin_path.as_ptr(), c"doubler".as_ptr(), &mut error);
        if loaded != 0 {
            panic!("load failed: {:?}", api.take_error(&mut error));
        }
        assert_eq!((api.load_bytes)(vm, bytes.as_ptr(), bytes.len(), &mut error), 0);

        for _ in 0..2 {
            let value = (api.run_entry_value)(vm, c"main".as_ptr(), &mut error);
            if value.is_null() {
                panic!("run failed: {:?}", api.take_error(&mut error));
            }
            assert_eq!((api.value_to_i32)(value), 42);
            (api.value_free)(value);
        }

        (api.vm_destroy)(vm);
    }
}
