//! Error types for the Raya SDK ABI

/// Result type for ABI calls
pub type AbiResult<T> = Result<T, NativeError>;

/// Coarse classification of every failure that crosses the C boundary
///
/// Only the message is part of the stable contract; the kind is an
/// extension exposed through `raya_error_kind` for callers that want to
/// check for capabilities.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// VM allocation or initialization failed
    Init = 1,
    /// Malformed bytecode, unresolved import, or failed verification
    Load = 2,
    /// Unhandled fault while running, terminating or restoring
    Runtime = 3,
    /// Native function called with wrong argument count or types
    Argument = 4,
    /// Recognized but unavailable capability
    Unsupported = 5,
    /// Stale, freed, consumed or wrong-kind handle
    Usage = 6,
}

impl ErrorKind {
    /// Name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Init => "InitError",
            ErrorKind::Load => "LoadError",
            ErrorKind::Runtime => "RuntimeError",
            ErrorKind::Argument => "ArgumentError",
            ErrorKind::Unsupported => "Unsupported",
            ErrorKind::Usage => "UsageError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Native module error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NativeError {
    /// Module definition rejected
    #[error("Module error: {0}")]
    ModuleError(String),
}

impl NativeError {
    /// Kind reported across the C boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            NativeError::ModuleError(_) => ErrorKind::Load,
        }
    }
}
