//! Diagnostic output
//!
//! Raya writes diagnostics to stderr. The level is taken from `RAYA_LOG`
//! (`error`, `warn`, `info`, `debug`) the first time anything is logged;
//! unset or unknown values keep only errors.

use once_cell::sync::Lazy;
use std::fmt;

/// Log level, ordered from least to most verbose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Failures that are reported to the host anyway
    Error = 0,
    /// Suspicious but recoverable conditions
    Warn = 1,
    /// Lifecycle events (load, run, snapshot)
    Info = 2,
    /// Scheduler and GC detail
    Debug = 3,
}

impl Level {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Level::Error),
            "warn" | "warning" => Some(Level::Warn),
            "info" => Some(Level::Info),
            "debug" | "trace" => Some(Level::Debug),
            _ => None,
        }
    }

    /// Tag printed in front of each line
    pub fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

static MAX_LEVEL: Lazy<Level> = Lazy::new(|| {
    std::env::var("RAYA_LOG")
        .ok()
        .and_then(|v| Level::parse(&v))
        .unwrap_or(Level::Error)
});

/// Whether messages at `level` are printed
pub fn enabled(level: Level) -> bool {
    level <= *MAX_LEVEL
}

#[doc(hidden)]
pub fn write(level: Level, target: &str, args: fmt::Arguments<'_>) {
    eprintln!("[raya {} {}] {}", level, target, args);
}

/// Log a message at an explicit level
#[macro_export]
macro_rules! vm_log {
    ($level:expr, $($arg:tt)+) => {
        if $crate::log::enabled($level) {
            $crate::log::write($level, module_path!(), format_args!($($arg)+));
        }
    };
}

/// Log at error level
#[macro_export]
macro_rules! vm_error {
    ($($arg:tt)+) => { $crate::vm_log!($crate::log::Level::Error, $($arg)+) };
}

/// Log at warn level
#[macro_export]
macro_rules! vm_warn {
    ($($arg:tt)+) => { $crate::vm_log!($crate::log::Level::Warn, $($arg)+) };
}

/// Log at info level
#[macro_export]
macro_rules! vm_info {
    ($($arg:tt)+) => { $crate::vm_log!($crate::log::Level::Info, $($arg)+) };
}

/// Log at debug level
#[macro_export]
macro_rules! vm_debug {
    ($($arg:tt)+) => { $crate::vm_log!($crate::log::Level::Debug, $($arg)+) };
}
