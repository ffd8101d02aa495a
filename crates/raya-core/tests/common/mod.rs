//! Shared helpers for building bytecode modules and native test modules

#![allow(dead_code)]

use raya_bytecode::{BytecodeWriter, Function, Module};
use raya_sdk::{abi, ModuleBuilder, NativeModule, NativeValue, RayaContext, RayaValue};
use std::sync::Arc;

/// Build a function from emitted bytecode
pub fn function(
    name: &str,
    param_count: usize,
    local_count: usize,
    emit: impl FnOnce(&mut BytecodeWriter),
) -> Function {
    let mut writer = BytecodeWriter::new();
    emit(&mut writer);
    Function {
        name: name.to_string(),
        param_count,
        local_count,
        code: writer.into_bytes(),
    }
}

/// Module with a single zero-argument `main`
pub fn main_module(name: &str, emit: impl FnOnce(&mut BytecodeWriter)) -> Module {
    let mut module = Module::new(name);
    module.add_function(function("main", 0, 0, emit));
    module
}

/// Module whose `main` returns `value`
pub fn returns_i32(name: &str, value: i32) -> Module {
    main_module(name, |w| {
        w.emit_const_i32(value);
        w.emit_return();
    })
}

unsafe fn args(args: *const *mut RayaValue, argc: usize) -> Vec<NativeValue> {
    if args.is_null() {
        return Vec::new();
    }
    std::slice::from_raw_parts(args, argc)
        .iter()
        .map(|&a| abi::clone_value(a).unwrap_or_default())
        .collect()
}

unsafe extern "C" fn add(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    match args(argv, argc).as_slice() {
        [NativeValue::I32(a), NativeValue::I32(b)] => abi::new_value(ctx, NativeValue::I32(a + b)),
        _ => abi::new_value(ctx, NativeValue::error("add() expects two integers")),
    }
}

unsafe extern "C" fn fail(ctx: *mut RayaContext, _: *const *mut RayaValue, _: usize) -> *mut RayaValue {
    abi::new_value(ctx, NativeValue::error("boom"))
}

unsafe extern "C" fn echo(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    let value = args(argv, argc).into_iter().next().unwrap_or_default();
    abi::new_value(ctx, value)
}

/// `testing` native module: `add(a, b)`, `fail()`, `echo(v)`
pub fn testing_module() -> Arc<NativeModule> {
    let mut builder = ModuleBuilder::new("testing", "1.0.0").unwrap();
    builder.add_function("add", add, 2).unwrap();
    builder.add_function("fail", fail, 0).unwrap();
    builder.add_function("echo", echo, 1).unwrap();
    Arc::new(builder.finish())
}

/// Single-function native module
pub fn native_module(
    name: &str,
    symbol: &str,
    func: raya_sdk::RayaNativeFn,
) -> Arc<NativeModule> {
    let mut builder = ModuleBuilder::new(name, "0.1.0").unwrap();
    builder.add_function(symbol, func, 0).unwrap();
    Arc::new(builder.finish())
}
