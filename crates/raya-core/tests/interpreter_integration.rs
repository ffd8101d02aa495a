//! End-to-end interpreter tests: arithmetic, control flow, exceptions,
//! native calls, tasks and resource limits

mod common;

use common::{function, main_module, testing_module};
use raya_bytecode::{Module, Opcode};
use raya_core::{ResourceLimits, Vm, VmError, VmOptions};
use raya_sdk::NativeValue;

fn run(module: Module) -> Result<NativeValue, VmError> {
    run_with(module, ResourceLimits::default())
}

fn run_with(module: Module, limits: ResourceLimits) -> Result<NativeValue, VmError> {
    let vm = Vm::new(VmOptions {
        limits,
        ..Default::default()
    })
    .unwrap();
    vm.register_native_module(testing_module()).unwrap();
    vm.load_module(module)?;
    vm.run_entry("main")
}

#[test]
fn test_arithmetic() {
    let module = main_module("math", |w| {
        // (10 - 4) * 7 / 2 % 5 == 1
        w.emit_const_i32(10);
        w.emit_const_i32(4);
        w.emit_opcode(Opcode::Isub);
        w.emit_const_i32(7);
        w.emit_opcode(Opcode::Imul);
        w.emit_const_i32(2);
        w.emit_opcode(Opcode::Idiv);
        w.emit_const_i32(5);
        w.emit_opcode(Opcode::Imod);
        w.emit_return();
    });
    assert_eq!(run(module).unwrap(), NativeValue::I32(1));
}

#[test]
fn test_integer_overflow_wraps() {
    let module = main_module("wrap", |w| {
        w.emit_const_i32(i32::MAX);
        w.emit_const_i32(1);
        w.emit_opcode(Opcode::Iadd);
        w.emit_return();
    });
    assert_eq!(run(module).unwrap(), NativeValue::I32(i32::MIN));
}

#[test]
fn test_loop_sums_to_ten() {
    // i = 0; sum = 0; while i < 5 { sum += i; i += 1 } return sum
    let mut module = Module::new("loop");
    module.add_function(function("main", 0, 2, |w| {
        w.emit_const_i32(0);
        w.emit_store_local(0);
        w.emit_const_i32(0);
        w.emit_store_local(1);
        let top = w.offset();
        w.emit_load_local(0);
        w.emit_const_i32(5);
        w.emit_opcode(Opcode::Ilt);
        let exit = w.emit_jump(Opcode::JmpIfFalse);
        w.emit_load_local(1);
        w.emit_load_local(0);
        w.emit_opcode(Opcode::Iadd);
        w.emit_store_local(1);
        w.emit_load_local(0);
        w.emit_const_i32(1);
        w.emit_opcode(Opcode::Iadd);
        w.emit_store_local(0);
        w.emit_jump_back(Opcode::Jmp, top);
        w.patch_jump(exit);
        w.emit_load_local(1);
        w.emit_return();
    }));
    assert_eq!(run(module).unwrap(), NativeValue::I32(10));
}

#[test]
fn test_recursive_call() {
    // fact(n) = n <= 1 ? 1 : n * fact(n - 1)
    let mut module = Module::new("fact");
    module.add_function(function("fact", 1, 1, |w| {
        w.emit_load_local(0);
        w.emit_const_i32(1);
        w.emit_opcode(Opcode::Ile);
        let recurse = w.emit_jump(Opcode::JmpIfFalse);
        w.emit_const_i32(1);
        w.emit_return();
        w.patch_jump(recurse);
        w.emit_load_local(0);
        w.emit_load_local(0);
        w.emit_const_i32(1);
        w.emit_opcode(Opcode::Isub);
        w.emit_call(0, 1);
        w.emit_opcode(Opcode::Imul);
        w.emit_return();
    }));
    module.add_function(function("main", 0, 0, |w| {
        w.emit_const_i32(10);
        w.emit_call(0, 1);
        w.emit_return();
    }));
    assert_eq!(run(module).unwrap(), NativeValue::I32(3_628_800));
}

#[test]
fn test_unbounded_recursion_is_caught() {
    let mut module = Module::new("deep");
    module.add_function(function("main", 0, 0, |w| {
        w.emit_call(0, 0);
        w.emit_return();
    }));
    let err = run(module).unwrap_err();
    assert!(err.to_string().contains("Maximum call depth"), "{}", err);
}

#[test]
fn test_strings_and_arrays_marshal_out() {
    let mut module = Module::new("values");
    let hello = module.constants.add_string("hello, ");
    let world = module.constants.add_string("world");
    module.add_function(function("main", 0, 0, |w| {
        w.emit_const_str(hello);
        w.emit_const_str(world);
        w.emit_opcode(Opcode::Sconcat);
        w.emit_const_i32(3);
        w.emit_opcode(Opcode::ConstTrue);
        w.emit_opcode(Opcode::ConstNull);
        w.emit_new_array(4);
        w.emit_return();
    }));
    assert_eq!(
        run(module).unwrap(),
        NativeValue::Array(vec![
            NativeValue::from("hello, world"),
            NativeValue::I32(3),
            NativeValue::Bool(true),
            NativeValue::Null,
        ])
    );
}

#[test]
fn test_string_length_counts_bytes() {
    let mut module = Module::new("len");
    let s = module.constants.add_string("héllo");
    module.add_function(function("main", 0, 0, |w| {
        w.emit_const_str(s);
        w.emit_opcode(Opcode::Slen);
        w.emit_return();
    }));
    assert_eq!(run(module).unwrap(), NativeValue::I32(6));
}

#[test]
fn test_array_elements() {
    let mut module = Module::new("arrays");
    module.add_function(function("main", 0, 1, |w| {
        w.emit_const_i32(1);
        w.emit_const_i32(2);
        w.emit_new_array(2);
        w.emit_store_local(0);
        // a[1] = 40
        w.emit_load_local(0);
        w.emit_const_i32(1);
        w.emit_const_i32(40);
        w.emit_opcode(Opcode::StoreElem);
        // a[1] + len(a)
        w.emit_load_local(0);
        w.emit_const_i32(1);
        w.emit_opcode(Opcode::LoadElem);
        w.emit_load_local(0);
        w.emit_opcode(Opcode::ArrayLen);
        w.emit_opcode(Opcode::Iadd);
        w.emit_return();
    }));
    assert_eq!(run(module).unwrap(), NativeValue::I32(42));
}

#[test]
fn test_out_of_bounds_is_runtime_error() {
    let module = main_module("oob", |w| {
        w.emit_new_array(0);
        w.emit_const_i32(3);
        w.emit_opcode(Opcode::LoadElem);
        w.emit_return();
    });
    let err = run(module).unwrap_err();
    assert!(matches!(err, VmError::ExecutionError(_)));
    assert!(err.to_string().contains("out of bounds"), "{}", err);
}

#[test]
fn test_native_call() {
    let mut module = Module::new("native");
    let add = module.add_native_import("testing", &["add"]);
    module.add_function(function("main", 0, 0, |w| {
        w.emit_const_i32(2);
        w.emit_const_i32(40);
        w.emit_call_native(add, 2);
        w.emit_return();
    }));
    assert_eq!(run(module).unwrap(), NativeValue::I32(42));
}

#[test]
fn test_native_arguments_are_deep_copies() {
    let mut module = Module::new("echo");
    let echo = module.add_native_import("testing", &["echo"]);
    let s = module.constants.add_string("nested");
    module.add_function(function("main", 0, 0, |w| {
        w.emit_const_str(s);
        w.emit_const_i32(1);
        w.emit_new_array(1);
        w.emit_new_array(2);
        w.emit_call_native(echo, 1);
        w.emit_return();
    }));
    assert_eq!(
        run(module).unwrap(),
        NativeValue::Array(vec![
            NativeValue::from("nested"),
            NativeValue::Array(vec![NativeValue::I32(1)]),
        ])
    );
}

#[test]
fn test_native_error_is_caught() {
    let mut module = Module::new("catch");
    let fail = module.add_native_import("testing", &["fail"]);
    let message = module.constants.add_string("message");
    module.add_function(function("main", 0, 0, |w| {
        let handler = w.emit_jump(Opcode::Try);
        w.emit_call_native(fail, 0);
        w.emit_opcode(Opcode::EndTry);
        w.emit_return();
        w.patch_jump(handler);
        w.emit_load_field(message);
        w.emit_return();
    }));
    assert_eq!(run(module).unwrap(), NativeValue::from("boom"));
}

#[test]
fn test_uncaught_native_error_fails_entry() {
    let mut module = Module::new("uncaught");
    let fail = module.add_native_import("testing", &["fail"]);
    module.add_function(function("main", 0, 0, |w| {
        w.emit_call_native(fail, 0);
        w.emit_return();
    }));
    let err = run(module).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("boom"), "{}", text);
    assert!(text.contains("uncaught.main+"), "{}", text);
}

#[test]
fn test_throw_unwinds_nested_calls() {
    let mut module = Module::new("unwind");
    let oops = module.constants.add_string("oops");
    let message = module.constants.add_string("message");
    module.add_function(function("thrower", 0, 0, |w| {
        w.emit_const_str(oops);
        w.emit_opcode(Opcode::Throw);
    }));
    module.add_function(function("main", 0, 0, |w| {
        w.emit_const_i32(99);
        let handler = w.emit_jump(Opcode::Try);
        w.emit_call(0, 0);
        w.emit_opcode(Opcode::EndTry);
        w.emit_return();
        w.patch_jump(handler);
        w.emit_load_field(message);
        w.emit_new_array(2);
        w.emit_return();
    }));
    // The value pushed before TRY survives the unwind
    assert_eq!(
        run(module).unwrap(),
        NativeValue::Array(vec![NativeValue::I32(99), NativeValue::from("oops")])
    );
}

#[test]
fn test_division_by_zero_is_catchable() {
    let mut module = Module::new("div");
    module.add_function(function("main", 0, 0, |w| {
        let handler = w.emit_jump(Opcode::Try);
        w.emit_const_i32(1);
        w.emit_const_i32(0);
        w.emit_opcode(Opcode::Idiv);
        w.emit_opcode(Opcode::EndTry);
        w.emit_return();
        w.patch_jump(handler);
        w.emit_opcode(Opcode::Pop);
        w.emit_const_i32(-1);
        w.emit_return();
    }));
    assert_eq!(run(module).unwrap(), NativeValue::I32(-1));
}

fn with_square(main: impl FnOnce(&mut raya_bytecode::BytecodeWriter)) -> Module {
    let mut module = Module::new("tasks");
    module.add_function(function("square", 1, 1, |w| {
        w.emit_load_local(0);
        w.emit_load_local(0);
        w.emit_opcode(Opcode::Imul);
        w.emit_return();
    }));
    module.add_function(function("main", 0, 0, main));
    module
}

#[test]
fn test_spawn_and_await() {
    let module = with_square(|w| {
        w.emit_const_i32(6);
        w.emit_spawn(0, 1);
        w.emit_const_i32(7);
        w.emit_spawn(0, 1);
        w.emit_opcode(Opcode::Await);
        w.emit_opcode(Opcode::Swap);
        w.emit_opcode(Opcode::Await);
        w.emit_opcode(Opcode::Iadd);
        w.emit_return();
    });
    assert_eq!(run(module).unwrap(), NativeValue::I32(36 + 49));
}

#[test]
fn test_unawaited_task_still_completes() {
    let mut module = Module::new("detached");
    let done = module.add_global("done");
    module.add_function(function("worker", 0, 0, |w| {
        w.emit_opcode(Opcode::ConstTrue);
        w.emit_store_global(done);
        w.emit_opcode(Opcode::ConstNull);
        w.emit_return();
    }));
    module.add_function(function("main", 0, 0, |w| {
        w.emit_spawn(0, 0);
        w.emit_opcode(Opcode::Pop);
        w.emit_const_i32(1);
        w.emit_return();
    }));

    let vm = Vm::new(VmOptions::default()).unwrap();
    vm.load_module(module).unwrap();
    assert_eq!(vm.run_entry("main").unwrap(), NativeValue::I32(1));
    assert_eq!(vm.global("done"), Some(NativeValue::Bool(true)));
}

#[test]
fn test_unobserved_task_failure_fails_entry() {
    let mut module = Module::new("orphan");
    let oops = module.constants.add_string("child failed");
    module.add_function(function("child", 0, 0, |w| {
        w.emit_const_str(oops);
        w.emit_opcode(Opcode::Throw);
    }));
    module.add_function(function("main", 0, 0, |w| {
        w.emit_spawn(0, 0);
        w.emit_opcode(Opcode::Pop);
        w.emit_const_i32(1);
        w.emit_return();
    }));
    let err = run(module).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("Unhandled error in task"), "{}", text);
    assert!(text.contains("child failed"), "{}", text);
}

#[test]
fn test_awaited_failure_is_catchable() {
    let mut module = Module::new("observed");
    let oops = module.constants.add_string("child failed");
    let message = module.constants.add_string("message");
    module.add_function(function("child", 0, 0, |w| {
        w.emit_const_str(oops);
        w.emit_opcode(Opcode::Throw);
    }));
    module.add_function(function("main", 0, 0, |w| {
        let handler = w.emit_jump(Opcode::Try);
        w.emit_spawn(0, 0);
        w.emit_opcode(Opcode::Await);
        w.emit_opcode(Opcode::EndTry);
        w.emit_return();
        w.patch_jump(handler);
        w.emit_load_field(message);
        w.emit_return();
    }));
    let result = run(module).unwrap();
    assert!(result.as_str().unwrap().starts_with("child failed"));
}

#[test]
fn test_yield_interleaves_tasks() {
    // Two workers each append their id to a shared array slot twice,
    // yielding in between.
    let mut module = Module::new("interleave");
    let log = module.add_global("log");
    let pos = module.add_global("pos");
    module.add_function(function("append", 1, 1, |w| {
        w.emit_load_global(log);
        w.emit_load_global(pos);
        w.emit_load_local(0);
        w.emit_opcode(Opcode::StoreElem);
        w.emit_load_global(pos);
        w.emit_const_i32(1);
        w.emit_opcode(Opcode::Iadd);
        w.emit_store_global(pos);
        w.emit_opcode(Opcode::ConstNull);
        w.emit_return();
    }));
    module.add_function(function("worker", 1, 1, |w| {
        w.emit_load_local(0);
        w.emit_call(0, 1);
        w.emit_opcode(Opcode::Pop);
        w.emit_opcode(Opcode::Yield);
        w.emit_load_local(0);
        w.emit_call(0, 1);
        w.emit_return();
    }));
    module.add_function(function("main", 0, 0, |w| {
        for _ in 0..4 {
            w.emit_const_i32(0);
        }
        w.emit_new_array(4);
        w.emit_store_global(log);
        w.emit_const_i32(0);
        w.emit_store_global(pos);
        w.emit_const_i32(1);
        w.emit_spawn(1, 1);
        w.emit_const_i32(2);
        w.emit_spawn(1, 1);
        w.emit_opcode(Opcode::Await);
        w.emit_opcode(Opcode::Pop);
        w.emit_opcode(Opcode::Await);
        w.emit_opcode(Opcode::Pop);
        w.emit_load_global(log);
        w.emit_return();
    }));
    assert_eq!(
        run(module).unwrap(),
        NativeValue::from(vec![1, 2, 1, 2])
    );
}

fn spin_forever() -> Module {
    main_module("spin", |w| {
        let top = w.offset();
        w.emit_opcode(Opcode::Nop);
        w.emit_jump_back(Opcode::Jmp, top);
    })
}

#[test]
fn test_step_budget() {
    let err = run_with(spin_forever(), ResourceLimits::with_step_budget(10_000)).unwrap_err();
    assert!(matches!(err, VmError::ResourceLimitExceeded(_)), "{}", err);
}

#[test]
fn test_step_budget_applies_per_run() {
    let vm = Vm::new(VmOptions {
        limits: ResourceLimits::with_step_budget(100),
        ..Default::default()
    })
    .unwrap();
    vm.load_module(common::returns_i32("small", 1)).unwrap();
    for _ in 0..200 {
        assert_eq!(vm.run_entry("main").unwrap(), NativeValue::I32(1));
    }
}

#[test]
fn test_heap_limit() {
    let mut module = Module::new("grow");
    let chunk = module.constants.add_string("0123456789abcdef");
    module.add_function(function("main", 0, 1, |w| {
        w.emit_const_str(chunk);
        w.emit_store_local(0);
        let top = w.offset();
        w.emit_load_local(0);
        w.emit_load_local(0);
        w.emit_opcode(Opcode::Sconcat);
        w.emit_store_local(0);
        w.emit_jump_back(Opcode::Jmp, top);
    }));
    let err = run_with(module, ResourceLimits::with_heap_limit(64 * 1024)).unwrap_err();
    assert!(matches!(err, VmError::ResourceLimitExceeded(_)), "{}", err);
}

#[test]
fn test_task_limit() {
    let mut module = Module::new("fanout");
    module.add_function(function("noop", 0, 0, |w| {
        w.emit_opcode(Opcode::ConstNull);
        w.emit_return();
    }));
    module.add_function(function("main", 0, 0, |w| {
        for _ in 0..4 {
            w.emit_spawn(0, 0);
            w.emit_opcode(Opcode::Pop);
        }
        w.emit_opcode(Opcode::ConstNull);
        w.emit_return();
    }));
    let err = run_with(module, ResourceLimits::with_task_limit(2)).unwrap_err();
    assert!(matches!(err, VmError::ResourceLimitExceeded(_)), "{}", err);
}

#[test]
fn test_failed_run_leaves_vm_usable() {
    let vm = Vm::new(VmOptions {
        limits: ResourceLimits::with_step_budget(1_000),
        ..Default::default()
    })
    .unwrap();
    vm.load_module(spin_forever()).unwrap();
    vm.load_module(common::returns_i32("ok", 3)).unwrap();
    assert!(vm.run_entry("spin.main").is_err());
    assert_eq!(vm.run_entry("ok.main").unwrap(), NativeValue::I32(3));
}
