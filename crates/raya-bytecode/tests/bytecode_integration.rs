//! Integration tests for the .rbin container

use raya_bytecode::{verify_module, BytecodeWriter, Function, Module, ModuleError, Opcode};

fn countdown_module() -> Module {
    // fn main() { let i = 3; while i > 0 { i = i - 1 } return i }
    let mut w = BytecodeWriter::new();
    w.emit_const_i32(3);
    w.emit_store_local(0);
    let loop_start = w.offset();
    w.emit_load_local(0);
    w.emit_const_i32(0);
    w.emit_opcode(Opcode::Igt);
    let exit = w.emit_jump(Opcode::JmpIfFalse);
    w.emit_load_local(0);
    w.emit_const_i32(1);
    w.emit_opcode(Opcode::Isub);
    w.emit_store_local(0);
    w.emit_jump_back(Opcode::Jmp, loop_start);
    w.patch_jump(exit);
    w.emit_load_local(0);
    w.emit_return();

    let mut module = Module::new("countdown");
    module.add_function(Function {
        name: "main".to_string(),
        param_count: 0,
        local_count: 1,
        code: w.into_bytes(),
    });
    module
}

#[test]
fn test_encode_decode_verify() {
    let module = countdown_module();
    let bytes = module.encode();
    assert_eq!(&bytes[..4], b"RAYA");

    let decoded = Module::decode(&bytes).expect("decode");
    assert_eq!(decoded.functions, module.functions);
    verify_module(&decoded).expect("verify");
}

#[test]
fn test_module_with_native_imports() {
    let mut module = Module::new("uses_crypto");
    let digest = module.constants.add_string("sha256");
    let data = module.constants.add_string("hello");
    let hash_slot = module.add_native_import("crypto", &["hash"]);

    let mut w = BytecodeWriter::new();
    w.emit_const_str(digest);
    w.emit_const_str(data);
    w.emit_call_native(hash_slot, 2);
    w.emit_return();
    module.add_function(Function {
        name: "main".to_string(),
        param_count: 0,
        local_count: 0,
        code: w.into_bytes(),
    });

    let decoded = Module::decode(&module.encode()).unwrap();
    verify_module(&decoded).unwrap();
    assert_eq!(decoded.required_native_modules(), vec!["crypto"]);
    assert_eq!(decoded.native_slots()[0].symbol, "hash");
}

#[test]
fn test_garbage_is_rejected() {
    for input in [&b""[..], b"RAYA", b"\x00\x01\x02\x03garbage-bytes-here"] {
        assert!(Module::decode(input).is_err());
    }
}

#[test]
fn test_trailing_bytes_rejected() {
    let mut bytes = countdown_module().encode();
    bytes.push(0);
    let crc = crc32fast::hash(&bytes[16..]);
    bytes[12..16].copy_from_slice(&crc.to_le_bytes());
    assert!(matches!(
        Module::decode(&bytes),
        Err(ModuleError::TrailingBytes(1))
    ));
}
