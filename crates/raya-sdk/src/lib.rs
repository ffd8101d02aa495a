//! Raya SDK - native function ABI for Raya native modules
//!
//! This crate holds everything a native module and the engine must agree on
//! without either depending on the other:
//!
//! - [`value`]: `NativeValue`, the self-contained value form that crosses
//!   the boundary
//! - [`handle`]: generation-checked handle tables behind every opaque pointer
//! - [`abi`]: the C types, the native function signature and the
//!   process-wide `RayaValue*` store
//! - [`context`]: the call protocol the engine uses to invoke native code
//! - [`module`]: `ModuleBuilder` / `NativeModule`
//!
//! # Example
//!
//! ```ignore
//! use raya_sdk::{abi, ModuleBuilder, NativeValue, RayaContext, RayaValue};
//!
//! unsafe extern "C" fn answer(
//!     ctx: *mut RayaContext,
//!     _args: *const *mut RayaValue,
//!     _argc: usize,
//! ) -> *mut RayaValue {
//!     abi::new_value(ctx, NativeValue::I32(42))
//! }
//!
//! let mut builder = ModuleBuilder::new("demo", "1.0.0")?;
//! builder.add_function("answer", answer, 0)?;
//! let module = builder.finish();
//! ```

#![warn(missing_docs)]

pub mod abi;
pub mod context;
pub mod error;
pub mod handle;
pub mod module;
pub mod value;

pub use abi::{
    module_init_symbol, Ownership, RayaContext, RayaError, RayaModule, RayaModuleBuilder,
    RayaModuleInitFn, RayaNativeFn, RayaSnapshot, RayaVM, RayaValue, DEFAULT_SYMBOL_PREFIX,
};
pub use context::{invoke, CallInfo, NativeCallError};
pub use error::{AbiResult, ErrorKind, NativeError};
pub use handle::{Handle, HandleKind, HandleTable};
pub use module::{ModuleBuilder, NativeFunction, NativeModule};
pub use value::{NativeValue, ValueType};
