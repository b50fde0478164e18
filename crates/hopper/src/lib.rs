//! Hopper: the object model of a dynamic, class-based VM
//!
//! Hopper implements what happens between a running program and its
//! objects:
//!
//! - **Property access** with visibility checked against the calling class,
//!   falling back to user-defined `__get`/`__set`/`__isset`/`__unset` hooks
//! - **Magic dispatch** with a per-context recursion guard
//! - **Lifecycle**: construction, non-atomic reference counting, finalizers
//!   that run at most once, resurrection and cloning
//! - **Strong iteration**: by-reference cursors that follow containers when
//!   they are relocated and reset when they are freed
//! - **Serialization** through custom hooks, `__sleep`, or the default
//!   property enumeration
//!
//! All state lives in an explicitly passed [`Context`]; nothing is shared
//! between contexts and nothing is thread-safe.
//!
//! # Example
//!
//! ```rust
//! use hopper::{ClassBuilder, Context, PropertyDecl, Value};
//!
//! let mut ctx = Context::new();
//! let mut b = ClassBuilder::new("Account");
//! b.add_property(PropertyDecl::private("balance").with_default(0))
//!     .add_method("__get", |_, _, args| {
//!         Ok(Value::str(&format!("no direct access to {}", args[0])))
//!     });
//! let account = b.register(&mut ctx).unwrap();
//! let obj = ctx.new_instance(account).unwrap();
//!
//! // Outside the class the private property is inaccessible, so __get runs.
//! let v = ctx.prop(obj, None, "balance", Default::default()).unwrap();
//! assert_eq!(v, Value::str("no direct access to balance"));
//!
//! // From inside the class the slot is read directly.
//! let v = ctx.prop(obj, Some(account), "balance", Default::default()).unwrap();
//! assert_eq!(v, Value::Int(0));
//! ```

pub mod config;
pub mod error;
pub mod runtime;

// Re-export commonly used types
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use runtime::{
    Array, ArrayKey, Capabilities, ClassBuilder, ClassId, ClassKind, Context, CursorHandle,
    CursorState, Diagnostic, DiagnosticLevel, FaultKind, IncDecOp, MagicKind, ObjectId,
    PhpSerializer, PropFetch, PropLookup, PropertyDecl, SerializeMode, Serializer, SetOp, Value,
    Visibility,
};
