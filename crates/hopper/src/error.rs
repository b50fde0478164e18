//! Error types for the `hopper` object model.
//!
//! Conditions the language treats as fatal surface as [`Error`] values and
//! propagate with `?`. Non-fatal conditions (notices, warnings, swallowed
//! finalizer faults) never show up here; they are recorded as diagnostics on
//! the execution context instead.

use crate::runtime::class::Visibility;
use thiserror::Error;

/// Errors that can occur in the `hopper` runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // ========================================================================
    // Class registration
    // ========================================================================
    /// A class with this name is already registered.
    #[error("Cannot declare class {name}, because the name is already in use")]
    ClassAlreadyExists {
        /// The conflicting class name.
        name: String,
    },

    /// No class with this name is registered.
    #[error("Class '{name}' not found")]
    UnknownClass {
        /// The requested class name.
        name: String,
    },

    /// A class names itself as an ancestor.
    #[error("Class {name} cannot extend itself")]
    InheritanceCycle {
        /// The offending class.
        name: String,
    },

    /// The named parent or interface cannot be used in that position.
    #[error("Class {class} cannot inherit from {parent}: {reason}")]
    InvalidParent {
        /// The class being registered.
        class: String,
        /// The rejected parent or interface.
        parent: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A `use`d name is not a trait.
    #[error("{class} cannot use {name} - it is not a trait")]
    InvalidTrait {
        /// The class being registered.
        class: String,
        /// The rejected trait name.
        name: String,
    },

    /// A property default holds a value that cannot live in class metadata.
    #[error("Invalid default value for property {class}::${property}")]
    InvalidDefault {
        /// The class being registered.
        class: String,
        /// The property name.
        property: String,
    },

    /// A property is declared twice in the same class.
    #[error("Cannot redeclare {class}::${property}")]
    DuplicateProperty {
        /// The class being registered.
        class: String,
        /// The property name.
        property: String,
    },

    // ========================================================================
    // Objects and properties
    // ========================================================================
    /// The object handle does not name a live object.
    #[error("Invalid object handle #{id}")]
    InvalidObject {
        /// The raw object id.
        id: u32,
    },

    /// The property name is the empty string.
    #[error("Cannot access empty property")]
    InvalidPropertyName,

    /// The property exists but the calling context may not touch it.
    #[error("Cannot access {visibility} property {class}::${name}")]
    InaccessibleProperty {
        /// Name of the object's class.
        class: String,
        /// The property name.
        name: String,
        /// The declared visibility.
        visibility: Visibility,
    },

    /// An unset targeted a visible but inaccessible property.
    #[error("Cannot unset inaccessible property {class}::${name}")]
    CannotUnsetInaccessible {
        /// Name of the object's class.
        class: String,
        /// The property name.
        name: String,
    },

    /// Abstract classes, interfaces and traits have no instances.
    #[error("Cannot instantiate {kind} {class}")]
    CannotInstantiate {
        /// `abstract class`, `interface` or `trait`.
        kind: &'static str,
        /// The class name.
        class: String,
    },

    // ========================================================================
    // Method invocation
    // ========================================================================
    /// Neither the method nor a `__call` catch-all exists.
    #[error("Call to undefined method {class}::{method}()")]
    UndefinedMethod {
        /// Name of the receiver's class.
        class: String,
        /// The requested method.
        method: String,
    },

    /// An exception raised by user code.
    #[error("Uncaught {class}: {message}")]
    Exception {
        /// Class name of the thrown exception.
        class: String,
        /// The exception message.
        message: String,
    },

    /// A non-recoverable engine error.
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// A fault raised by native (non-user) code.
    #[error("Native fault: {0}")]
    NativeFault(String),

    /// A recoverable error escalated by configuration.
    #[error("Catchable fatal error: {0}")]
    Recoverable(String),

    // ========================================================================
    // Serialization
    // ========================================================================
    /// A custom `serialize()` hook returned something other than a string or null.
    #[error("{class}::serialize() must return a string or NULL")]
    SerializeContract {
        /// The class whose hook misbehaved.
        class: String,
    },

    // ========================================================================
    // Strong iteration
    // ========================================================================
    /// The cursor handle is not registered.
    #[error("Invalid iteration cursor")]
    InvalidCursor,

    /// The cursor is bound to a different container than the one supplied.
    #[error("Iteration cursor is bound to a different container")]
    CursorContainerMismatch,
}

impl Error {
    /// Creates a user exception.
    pub fn exception(class: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Exception {
            class: class.into(),
            message: message.into(),
        }
    }

    /// Returns true for faults raised by native code.
    #[must_use]
    pub fn is_native(&self) -> bool {
        matches!(self, Error::NativeFault(_))
    }
}

/// Result type alias for `hopper` operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inaccessible_message() {
        let err = Error::InaccessibleProperty {
            class: "B".into(),
            name: "x".into(),
            visibility: Visibility::Private,
        };
        assert_eq!(err.to_string(), "Cannot access private property B::$x");
    }

    #[test]
    fn test_cannot_instantiate_message() {
        let err = Error::CannotInstantiate {
            kind: "interface",
            class: "Countable".into(),
        };
        assert_eq!(err.to_string(), "Cannot instantiate interface Countable");
    }

    #[test]
    fn test_native_classification() {
        assert!(Error::NativeFault("oom".into()).is_native());
        assert!(!Error::exception("RuntimeException", "boom").is_native());
    }
}
