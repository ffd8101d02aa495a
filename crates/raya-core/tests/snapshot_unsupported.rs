//! Snapshot entry points in a build without the `snapshot` feature

#![cfg(not(feature = "snapshot"))]

mod common;

use raya_core::{Vm, VmError, VmOptions, VmSnapshot};
use raya_sdk::{ErrorKind, NativeValue};

#[test]
fn test_snapshot_and_restore_unsupported() {
    let vm = Vm::new(VmOptions::default()).unwrap();
    vm.load_module(common::returns_i32("app", 3)).unwrap();

    let err = vm.snapshot().unwrap_err();
    assert!(matches!(err, VmError::SnapshotUnsupported));
    assert_eq!(err.kind(), ErrorKind::Unsupported);

    let err = vm.restore(VmSnapshot::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);

    // Nothing was replaced
    assert_eq!(vm.run_entry("main").unwrap(), NativeValue::I32(3));
}
