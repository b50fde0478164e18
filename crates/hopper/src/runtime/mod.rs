//! Hopper runtime module.
//!
//! # Architecture
//!
//! The runtime is organized into several modules:
//!
//! - [`value`]: Tagged values and the compound-assignment operators
//! - [`array`]: Copy-on-write ordered maps with storage identity
//! - [`mangle`]: External names of private and protected properties
//! - [`class`]: Class metadata, layout and registration
//! - [`object`]: Per-instance storage
//! - [`heap`]: Object table, dynamic property maps and id allocation
//! - [`context`]: The per-request execution context
//! - [`property`]: Property resolution and access
//! - [`magic`]: `__get`/`__set`/`__isset`/`__unset` dispatch and its recursion guard
//! - [`dispatch`]: Method calls, `__call` and `__toString`
//! - [`lifecycle`]: Construction, reference counting, finalizers and cloning
//! - [`iterator`]: Strong iterator registry
//! - [`serialize`]: Serialization bridge and the reference writer
//! - [`diagnostics`]: Notices, warnings and recoverable errors
//!
//! Every operation is a method on [`Context`]; the modules split them by
//! concern.

pub mod array;
pub mod class;
pub mod context;
pub mod diagnostics;
pub mod dispatch;
pub mod heap;
pub mod iterator;
pub mod lifecycle;
pub mod magic;
pub mod mangle;
pub mod object;
pub mod property;
pub mod serialize;
pub mod value;

pub use array::{Array, ArrayKey, ContainerId};
pub use class::{
    Capabilities, Class, ClassBuilder, ClassId, ClassKind, ClassTable, DeclaredProperty, Method,
    MethodFn, NativeCloneFn, PropertyDecl, Visibility,
};
pub use context::{Context, FaultKind};
pub use diagnostics::{Diagnostic, DiagnosticLevel};
pub use heap::Heap;
pub use iterator::{
    CursorHandle, CursorState, STRONG_ITER_INLINE_CAPACITY, StrongIterEntry, StrongIterTable,
};
pub use magic::{GuardToken, MagicGuard, MagicKind, PropAccess};
pub use mangle::{Demangled, demangle, mangle};
pub use object::{LifecycleState, ObjectAttrs, ObjectData, ObjectId, TypedSlot};
pub use property::{PropFetch, PropLookup, PropSlot};
pub use serialize::{PhpSerializer, SerializeMode, Serializer};
pub use value::{IncDecOp, SetOp, Str, Value};
