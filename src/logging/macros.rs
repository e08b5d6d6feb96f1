//! Logging macros used by the command layer
//!
//! Thin wrappers over `tracing` resolved through this crate, so callers need
//! no direct `tracing` dependency.

/// Progress message for the operator (info level, stderr)
#[macro_export]
macro_rules! log_stderr {
    ($($arg:tt)*) => {
        $crate::__tracing::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::__tracing::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::__tracing::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::__tracing::error!($($arg)*)
    };
}
