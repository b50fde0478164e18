//! Runtime configuration.
//!
//! A [`RuntimeConfig`] is handed to [`Context::with_config`](crate::Context::with_config)
//! and stays fixed for the lifetime of that context.

use hopper_log::Level;

/// Environment variable for [`RuntimeConfig::max_nesting_depth`].
pub const MAX_NESTING_ENV_VAR: &str = "HOPPER_MAX_NESTING";

/// Environment variable for [`RuntimeConfig::recoverable_errors_fatal`].
pub const RECOVERABLE_FATAL_ENV_VAR: &str = "HOPPER_RECOVERABLE_FATAL";

/// Default serialization nesting limit.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 64;

/// Tunables for one execution context.
///
/// # Example
///
/// ```rust
/// use hopper::RuntimeConfig;
///
/// let config = RuntimeConfig::default()
///     .with_max_nesting_depth(8)
///     .with_recoverable_errors_fatal(true);
///
/// assert_eq!(config.max_nesting_depth, 8);
/// assert!(config.recoverable_errors_fatal);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Object nesting depth past which serialization writes an overflow marker.
    pub max_nesting_depth: usize,
    /// Escalate recoverable errors (bad `__toString`) to [`Error::Recoverable`](crate::Error::Recoverable).
    pub recoverable_errors_fatal: bool,
    /// Applied to the global logger when a context is created.
    pub log_level: Option<Level>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            recoverable_errors_fatal: false,
            log_level: None,
        }
    }
}

impl RuntimeConfig {
    /// Sets the serialization nesting limit.
    #[must_use]
    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// Sets whether recoverable errors abort the operation.
    #[must_use]
    pub fn with_recoverable_errors_fatal(mut self, fatal: bool) -> Self {
        self.recoverable_errors_fatal = fatal;
        self
    }

    /// Sets the log level applied on context creation.
    #[must_use]
    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Builds a configuration from the process environment.
    ///
    /// Reads `HOPPER_MAX_NESTING`, `HOPPER_RECOVERABLE_FATAL` and `HOPPER_LOG`.
    /// Values that fail to parse keep their defaults and log a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = RuntimeConfig::default();

        if let Some(raw) = lookup(MAX_NESTING_ENV_VAR) {
            match raw.trim().parse::<usize>() {
                Ok(depth) if depth > 0 => config.max_nesting_depth = depth,
                _ => hopper_log::warn!(
                    "ignoring {}={:?}: expected a positive integer",
                    MAX_NESTING_ENV_VAR,
                    raw
                ),
            }
        }

        if let Some(raw) = lookup(RECOVERABLE_FATAL_ENV_VAR) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.recoverable_errors_fatal = true,
                "0" | "false" | "no" | "off" => config.recoverable_errors_fatal = false,
                _ => hopper_log::warn!(
                    "ignoring {}={:?}: expected a boolean",
                    RECOVERABLE_FATAL_ENV_VAR,
                    raw
                ),
            }
        }

        if let Some(raw) = lookup(hopper_log::LOG_ENV_VAR) {
            match Level::from_str(&raw) {
                Ok(level) => config.log_level = Some(level),
                Err(err) => hopper_log::warn!("ignoring {}: {}", hopper_log::LOG_ENV_VAR, err),
            }
        }

        config
    }
}
