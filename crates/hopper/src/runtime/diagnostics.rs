//! User-visible diagnostics.
//!
//! Notices, warnings and recoverable errors do not abort the operation that
//! raised them. They are logged at `warn` and kept on the context until
//! someone takes them.

use crate::Context;
use crate::error::{Error, Result};
use hopper_log::warn;
use std::fmt;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticLevel {
    /// Informational, e.g. an undefined property read.
    Notice,
    /// Something went wrong but a substitute value was used.
    Warning,
    /// A recoverable error; fatal only when configured so.
    RecoverableError,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticLevel::Notice => "Notice",
            DiagnosticLevel::Warning => "Warning",
            DiagnosticLevel::RecoverableError => "Catchable fatal error",
        })
    }
}

/// A recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity.
    pub level: DiagnosticLevel,
    /// Rendered message.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.message)
    }
}

impl Context {
    fn record(&mut self, level: DiagnosticLevel, message: String) {
        warn!("{}: {}", level, message);
        self.diagnostics.push(Diagnostic { level, message });
    }

    pub(crate) fn raise_notice(&mut self, message: impl Into<String>) {
        self.record(DiagnosticLevel::Notice, message.into());
    }

    pub(crate) fn raise_warning(&mut self, message: impl Into<String>) {
        self.record(DiagnosticLevel::Warning, message.into());
    }

    /// Records a recoverable error. Escalates to [`Error::Recoverable`] when
    /// the configuration makes recoverable errors fatal.
    pub(crate) fn raise_recoverable(&mut self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.record(DiagnosticLevel::RecoverableError, message.clone());
        if self.config.recoverable_errors_fatal {
            return Err(Error::Recoverable(message));
        }
        Ok(())
    }

    /// Diagnostics raised so far.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Drains the recorded diagnostics.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}
