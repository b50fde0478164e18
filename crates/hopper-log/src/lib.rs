//! Leveled logging for the `hopper` object model.
//!
//! This crate provides a small, dependency-free logger with automatic module
//! path capture, coloured terminal output, environment configuration and a
//! replaceable sink.
//!
//! # Example
//!
//! ```
//! use hopper_log::{debug, warn, Level};
//!
//! hopper_log::set_level(Level::Debug);
//!
//! let id = 7;
//! debug!("object #{} constructed", id);
//! warn!("finalizer for object #{} raised", id);
//! ```
//!
//! # Configuration
//!
//! The minimum level defaults to [`Level::Warn`]. [`init_from_env`] reads the
//! `HOPPER_LOG` environment variable (`error`, `warn`, `info`, `debug`,
//! `trace`).
//!
//! # Sinks
//!
//! Records go to stderr unless a sink is installed with [`set_sink`]. Sinks
//! receive every record that passes the level filter:
//!
//! ```
//! use hopper_log::{Level, Record, set_sink, clear_sink, warn};
//!
//! fn quiet(_record: &Record<'_>) {}
//!
//! set_sink(quiet);
//! warn!("not printed");
//! clear_sink();
//! ```

use std::fmt::{self, Arguments};
use std::sync::{PoisonError, RwLock};
use std::sync::atomic::{AtomicU8, Ordering};

/// Environment variable consulted by [`init_from_env`].
pub const LOG_ENV_VAR: &str = "HOPPER_LOG";

/// Severity of a log record.
///
/// Lower numeric values are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Failures the runtime cannot recover from.
    Error = 0,
    /// Diagnostics surfaced to user code and swallowed faults.
    Warn = 1,
    /// Coarse lifecycle events.
    Info = 2,
    /// Object construction, destruction and iterator bookkeeping.
    Debug = 3,
    /// Hook dispatch and recursion suppression.
    Trace = 4,
}

impl Level {
    const fn color_code(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }

    /// Returns the upper-case name of this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    /// Parses a level name, ignoring case.
    ///
    /// # Example
    ///
    /// ```
    /// use hopper_log::Level;
    ///
    /// assert_eq!(Level::from_str("debug"), Ok(Level::Debug));
    /// assert!(Level::from_str("loud").is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a message naming the rejected input.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ERROR" => Ok(Level::Error),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "INFO" => Ok(Level::Info),
            "DEBUG" => Ok(Level::Debug),
            "TRACE" => Ok(Level::Trace),
            _ => Err(format!("invalid log level: {s:?}")),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single log record handed to the active sink.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    /// Severity of the record.
    pub level: Level,
    /// Module path of the call site.
    pub target: &'a str,
    /// The formatted message.
    pub args: Arguments<'a>,
}

impl Record<'_> {
    /// Renders the message into an owned string.
    #[must_use]
    pub fn message(&self) -> String {
        self.args.to_string()
    }
}

/// Sink function receiving filtered records.
pub type Sink = fn(&Record<'_>);

/// The process-wide level filter.
pub struct Logger {
    level: AtomicU8,
}

impl Logger {
    const fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
        }
    }

    /// Sets the minimum level that will be emitted.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    /// Returns the current minimum level.
    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Returns true when a record at `level` would be emitted.
    pub fn enabled(&self, level: Level) -> bool {
        level as u8 <= self.level.load(Ordering::Relaxed)
    }
}

static LOGGER: Logger = Logger::new(Level::Warn);

static SINK: RwLock<Option<Sink>> = RwLock::new(None);

/// Returns the global logger.
#[must_use]
pub fn get_logger() -> &'static Logger {
    &LOGGER
}

/// Sets the minimum level of the global logger.
pub fn set_level(level: Level) {
    LOGGER.set_level(level);
}

/// Sets the minimum level from a level name.
///
/// # Errors
///
/// Returns an error and leaves the level unchanged if `s` is not a level name.
pub fn set_level_from_str(s: &str) -> Result<(), String> {
    let level = Level::from_str(s)?;
    set_level(level);
    Ok(())
}

/// Applies `HOPPER_LOG` to the global logger.
///
/// Returns `Ok(None)` when the variable is unset.
///
/// # Errors
///
/// Returns an error and leaves the level unchanged if the variable holds an
/// unknown level name.
pub fn init_from_env() -> Result<Option<Level>, String> {
    match std::env::var(LOG_ENV_VAR) {
        Ok(raw) => {
            let level = Level::from_str(&raw)?;
            set_level(level);
            Ok(Some(level))
        }
        Err(_) => Ok(None),
    }
}

/// Routes records to `sink` instead of stderr.
pub fn set_sink(sink: Sink) {
    *SINK.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
}

/// Restores stderr output.
pub fn clear_sink() {
    *SINK.write().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Emits a record. Called by the macros after the level check.
#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments<'_>) {
    static RESET: &str = "\x1b[0m";

    if !LOGGER.enabled(level) {
        return;
    }

    let sink = *SINK.read().unwrap_or_else(PoisonError::into_inner);
    if let Some(sink) = sink {
        sink(&Record {
            level,
            target,
            args,
        });
        return;
    }

    let color = level.color_code();
    eprintln!("{color}[{}]{RESET} {target}: {args}", level.as_str());
}

/// Logs at an explicit level.
///
/// ```
/// use hopper_log::{log, Level};
///
/// log!(level: Level::Info, "{} classes registered", 4);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {
        {
            if $crate::get_logger().enabled($level) {
                $crate::__log_with_target(
                    $level,
                    module_path!(),
                    format_args!($($arg)*)
                );
            }
        }
    };
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

/// Logs at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    // Level and sink are process-wide; serialize the tests that touch them.
    static GLOBAL: Mutex<()> = Mutex::new(());

    static CAPTURED: AtomicUsize = AtomicUsize::new(0);

    fn counting_sink(record: &Record<'_>) {
        assert!(!record.message().is_empty());
        CAPTURED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Warn < Level::Info);
        assert!(Level::Info < Level::Debug);
        assert!(Level::Debug < Level::Trace);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!(Level::from_str("error"), Ok(Level::Error));
        assert_eq!(Level::from_str(" Warning "), Ok(Level::Warn));
        assert_eq!(Level::from_str("TRACE"), Ok(Level::Trace));
        assert!(Level::from_str("verbose").is_err());
    }

    #[test]
    fn test_logger_level_filtering() {
        let logger = Logger::new(Level::Warn);

        assert!(logger.enabled(Level::Error));
        assert!(logger.enabled(Level::Warn));
        assert!(!logger.enabled(Level::Info));

        logger.set_level(Level::Trace);
        assert!(logger.enabled(Level::Trace));
        assert_eq!(logger.level(), Level::Trace);
    }

    #[test]
    fn test_set_level_from_str_rejects_garbage() {
        let _guard = GLOBAL.lock().unwrap();
        set_level(Level::Info);

        assert!(set_level_from_str("nope").is_err());
        assert_eq!(get_logger().level(), Level::Info);

        set_level_from_str("debug").unwrap();
        assert_eq!(get_logger().level(), Level::Debug);
        set_level(Level::Warn);
    }

    #[test]
    fn test_sink_receives_filtered_records() {
        let _guard = GLOBAL.lock().unwrap();
        set_level(Level::Warn);
        set_sink(counting_sink);
        CAPTURED.store(0, Ordering::SeqCst);

        warn!("kept {}", 1);
        debug!("dropped {}", 2);
        error!("kept {}", 3);

        clear_sink();
        assert_eq!(CAPTURED.load(Ordering::SeqCst), 2);
    }
}
