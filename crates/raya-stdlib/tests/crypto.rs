//! `native:crypto` driven from bytecode through the C API

use raya_bytecode::{BytecodeWriter, Function, Module, Opcode};
use raya_ffi::*;
use raya_stdlib::crypto::{self, MAX_RANDOM_BYTES};
use std::ffi::{c_int, CStr};
use std::ptr;

const RUNTIME: c_int = 3;

/// Single-entry program calling `crypto.<symbol>` with the pushed arguments
fn program(symbol: &str, argc: u16, then: Option<Opcode>, push: impl FnOnce(&mut Module, &mut BytecodeWriter)) -> Vec<u8> {
    let mut module = Module::new("app");
    let slot = module.add_native_import("crypto", &[symbol]);
    let mut writer = BytecodeWriter::new();
    push(&mut module, &mut writer);
    writer.emit_call_native(slot, argc);
    if let Some(opcode) = then {
        writer.emit_opcode(opcode);
    }
    writer.emit_return();
    module.add_function(Function {
        name: "main".to_string(),
        param_count: 0,
        local_count: 0,
        code: writer.into_bytes(),
    });
    module.encode()
}

fn push_str(module: &mut Module, writer: &mut BytecodeWriter, s: &str) {
    let index = module.constants.add_string(s);
    writer.emit_const_str(index);
}

/// Fresh VM with `crypto` registered and `bytes` loaded
unsafe fn vm_with(bytes: &[u8]) -> *mut RayaVM {
    let mut error = ptr::null_mut();
    let vm = raya_vm_new(&mut error);
    assert!(!vm.is_null());
    assert_eq!(raya_vm_register_module(vm, crypto::module(), &mut error), 0);
    assert_eq!(raya_vm_load_bytes(vm, bytes.as_ptr(), bytes.len(), &mut error), 0);
    vm
}

/// Run `main`, returning the owned result or (kind, message)
unsafe fn run(vm: *mut RayaVM) -> Result<*mut RayaValue, (c_int, String)> {
    let mut error = ptr::null_mut();
    let value = raya_vm_run_entry_value(vm, c"main".as_ptr(), &mut error);
    if !value.is_null() {
        return Ok(value);
    }
    let kind = raya_error_kind(error);
    let message = CStr::from_ptr(raya_error_message(error)).to_string_lossy().into_owned();
    raya_error_free(error);
    Err((kind, message))
}

unsafe fn string_of(value: *mut RayaValue) -> String {
    let s = CStr::from_ptr(raya_value_to_string(value)).to_string_lossy().into_owned();
    raya_value_free(value);
    s
}

fn random_length(length: i32) -> Vec<u8> {
    program("randomBytes", 1, Some(Opcode::ArrayLen), |_, w| w.emit_const_i32(length))
}

#[test]
fn test_random_bytes_at_cap_succeeds() {
    unsafe {
        let vm = vm_with(&random_length(MAX_RANDOM_BYTES));
        let value = run(vm).unwrap();
        assert_eq!(raya_value_to_i32(value), MAX_RANDOM_BYTES);
        raya_value_free(value);
        raya_vm_destroy(vm);
    }
}

#[test]
fn test_random_bytes_rejects_bad_lengths() {
    for length in [0, -1, MAX_RANDOM_BYTES + 1, i32::MIN] {
        unsafe {
            let vm = vm_with(&random_length(length));
            let (kind, message) = run(vm).unwrap_err();
            assert_eq!(kind, RUNTIME);
            assert!(message.contains("ArgumentError"), "{}: {}", length, message);
            raya_vm_destroy(vm);
        }
    }
}

#[test]
fn test_random_bytes_are_bytes() {
    unsafe {
        let vm = vm_with(&program("randomBytes", 1, None, |_, w| w.emit_const_i32(64)));
        let array = run(vm).unwrap();
        assert_eq!(raya_value_type(array), 4);
        assert_eq!(raya_array_length(array), 64);
        for index in 0..64 {
            let element = raya_array_get(ptr::null_mut(), array, index);
            assert!((0..=255).contains(&raya_value_to_i32(element)));
            raya_value_free(element);
        }
        raya_value_free(array);
        raya_vm_destroy(vm);
    }
}

#[test]
fn test_random_bytes_type_checked() {
    unsafe {
        let vm = vm_with(&program("randomBytes", 1, None, |m, w| push_str(m, w, "16")));
        let (kind, message) = run(vm).unwrap_err();
        assert_eq!(kind, RUNTIME);
        assert!(message.contains("must be an integer"), "{}", message);
        raya_vm_destroy(vm);
    }
}

#[test]
fn test_constant_time_equal_from_script() {
    let cases = [
        ("secret-token", "secret-token", true),
        ("secret-token", "secret-tokeN", false),
        ("secret", "secret-token", false),
        ("", "", true),
    ];
    for (a, b, expected) in cases {
        unsafe {
            let vm = vm_with(&program("constantTimeEqual", 2, None, |m, w| {
                push_str(m, w, a);
                push_str(m, w, b);
            }));
            let value = run(vm).unwrap();
            assert_eq!(raya_value_to_bool(value) != 0, expected, "{:?} vs {:?}", a, b);
            raya_value_free(value);
            raya_vm_destroy(vm);
        }
    }
}

#[test]
fn test_hash_and_hex() {
    unsafe {
        let vm = vm_with(&program("hash", 2, None, |m, w| {
            push_str(m, w, "sha256");
            push_str(m, w, "abc");
        }));
        assert_eq!(
            string_of(run(vm).unwrap()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        raya_vm_destroy(vm);

        let vm = vm_with(&program("hash", 2, None, |m, w| {
            push_str(m, w, "whirlpool");
            push_str(m, w, "abc");
        }));
        let (_, message) = run(vm).unwrap_err();
        assert!(message.contains("unsupported algorithm"), "{}", message);
        raya_vm_destroy(vm);

        let vm = vm_with(&program("toHex", 1, None, |m, w| push_str(m, w, "hi")));
        assert_eq!(string_of(run(vm).unwrap()), "6869");
        raya_vm_destroy(vm);

        let vm = vm_with(&program("fromHex", 1, None, |m, w| push_str(m, w, "6869")));
        assert_eq!(string_of(run(vm).unwrap()), "hi");
        raya_vm_destroy(vm);
    }
}

#[test]
fn test_random_int_range() {
    unsafe {
        let vm = vm_with(&program("randomInt", 2, None, |_, w| {
            w.emit_const_i32(10);
            w.emit_const_i32(13);
        }));
        for _ in 0..20 {
            let value = run(vm).unwrap();
            assert!((10..13).contains(&raya_value_to_i32(value)));
            raya_value_free(value);
        }
        raya_vm_destroy(vm);

        let vm = vm_with(&program("randomInt", 2, None, |_, w| {
            w.emit_const_i32(5);
            w.emit_const_i32(5);
        }));
        assert!(run(vm).unwrap_err().1.contains("ArgumentError"));
        raya_vm_destroy(vm);
    }
}

#[test]
fn test_init_entry_point() {
    unsafe {
        let module = crypto::raya_module_init_crypto();
        assert_eq!(CStr::from_ptr(raya_module_name(module)).to_str().unwrap(), "crypto");
        assert_eq!(raya_module_function_count(module), 6);
        raya_module_free(module);
    }
}
