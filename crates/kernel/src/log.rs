//! Logging macros prefixing messages with the virtual clock and the acting entity.

/// Logs a debug-level message in simulation context.
#[macro_export]
macro_rules! log_debug {
    ($ctx:expr, $($arg:tt)*) => {
        log::debug!("[{:.6} {}] {}", $ctx.time(), $ctx.label(), format_args!($($arg)*))
    };
}

/// Logs an info-level message in simulation context.
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $($arg:tt)*) => {
        log::info!("[{:.6} {}] {}", $ctx.time(), $ctx.label(), format_args!($($arg)*))
    };
}

/// Logs a warning-level message in simulation context.
#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $($arg:tt)*) => {
        log::warn!("[{:.6} {}] {}", $ctx.time(), $ctx.label(), format_args!($($arg)*))
    };
}

/// Logs an error-level message in simulation context.
#[macro_export]
macro_rules! log_error {
    ($ctx:expr, $($arg:tt)*) => {
        log::error!("[{:.6} {}] {}", $ctx.time(), $ctx.label(), format_args!($($arg)*))
    };
}
