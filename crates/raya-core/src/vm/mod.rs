//! Virtual machine execution and context management

mod context;
mod interpreter;
mod lifecycle;
pub mod marshal;

pub use context::{ResourceCounters, ResourceLimits, VmContext, VmContextId, VmOptions};
pub use interpreter::MAX_CALL_DEPTH;
pub use lifecycle::{Vm, VmError, VmStats};
pub use marshal::{MarshalError, MAX_DEPTH as MAX_MARSHAL_DEPTH};
