//! The execution context.
//!
//! Everything the object model treats as per-request state lives in one
//! [`Context`] passed explicitly to every operation: the class table, the
//! object heap, the magic recursion guard, the strong iterator table, the
//! fault stack and the diagnostics list. Nothing is thread-local or global,
//! apart from the logger.
//!
//! The operations themselves are spread over the modules that own each
//! concern (`property`, `lifecycle`, `magic`, `serialize`); this module holds
//! the state and the accessors they share.

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::runtime::class::{
    Class, ClassId, ClassKind, ClassTable, INCOMPLETE_CLASS, Method, SERIALIZABLE_INTERFACE,
    STD_CLASS, UNSERIALIZABLE_CLASS,
};
use crate::runtime::diagnostics::Diagnostic;
use crate::runtime::heap::Heap;
use crate::runtime::iterator::StrongIterTable;
use crate::runtime::magic::MagicGuard;
use crate::runtime::object::{ObjectData, ObjectId};
use crate::runtime::value::Value;
use std::rc::Rc;

/// Kind of fault currently unwinding through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// An exception thrown by user code.
    UserException,
    /// A fault raised by native code. Finalizers do not run while one is
    /// innermost.
    NativeException,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Builtins {
    pub(crate) std_class: ClassId,
    pub(crate) unserializable: ClassId,
    pub(crate) incomplete: ClassId,
}

/// Per-request execution state.
///
/// # Example
///
/// ```rust
/// use hopper::{ClassBuilder, Context, PropertyDecl, Value};
///
/// let mut ctx = Context::new();
/// let mut point = ClassBuilder::new("Point");
/// point.add_property(PropertyDecl::public("x").with_default(1));
/// let class = point.register(&mut ctx).unwrap();
///
/// let obj = ctx.new_instance(class).unwrap();
/// assert_eq!(ctx.prop(obj, None, "x", Default::default()).unwrap(), Value::Int(1));
/// ctx.release(Value::Object(obj));
/// assert!(ctx.heap().is_empty());
/// ```
pub struct Context {
    pub(crate) config: RuntimeConfig,
    pub(crate) classes: ClassTable,
    pub(crate) heap: Heap,
    pub(crate) guard: MagicGuard,
    pub(crate) iters: StrongIterTable,
    pub(crate) faults: Vec<FaultKind>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) builtins: Builtins,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates a context with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Creates a context and applies the configured log level.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        if let Some(level) = config.log_level {
            hopper_log::set_level(level);
        }
        let mut classes = ClassTable::default();
        let std_class = classes.define_builtin(STD_CLASS, ClassKind::Normal);
        classes.define_builtin(SERIALIZABLE_INTERFACE, ClassKind::Interface);
        let unserializable = classes.define_builtin(UNSERIALIZABLE_CLASS, ClassKind::Normal);
        let incomplete = classes.define_builtin(INCOMPLETE_CLASS, ClassKind::Normal);

        Context {
            config,
            classes,
            heap: Heap::new(),
            guard: MagicGuard::default(),
            iters: StrongIterTable::new(),
            faults: Vec::new(),
            diagnostics: Vec::new(),
            builtins: Builtins {
                std_class,
                unserializable,
                incomplete,
            },
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The class table.
    #[must_use]
    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// The object heap.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The magic recursion guard.
    #[must_use]
    pub fn guard(&self) -> &MagicGuard {
        &self.guard
    }

    /// The strong iterator table.
    #[must_use]
    pub fn strong_iterators(&self) -> &StrongIterTable {
        &self.iters
    }

    /// Handle of `stdClass`.
    #[must_use]
    pub fn std_class(&self) -> ClassId {
        self.builtins.std_class
    }

    /// Class metadata for a handle.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownClass`] if the handle does not belong to this context.
    pub fn class(&self, id: ClassId) -> Result<Rc<Class>> {
        self.classes
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownClass {
                name: format!("{id:?}"),
            })
    }

    /// Case-insensitive class lookup.
    #[must_use]
    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.classes.lookup(name)
    }

    /// Class metadata of an object.
    pub(crate) fn class_of(&self, obj: ObjectId) -> Result<Rc<Class>> {
        self.class(self.heap.get(obj)?.class)
    }

    /// Object storage.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidObject`] if `obj` is not live.
    pub fn object(&self, obj: ObjectId) -> Result<&ObjectData> {
        self.heap.get(obj)
    }

    /// Mutable object storage, e.g. for a native tail.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidObject`] if `obj` is not live.
    pub fn object_mut(&mut self, obj: ObjectId) -> Result<&mut ObjectData> {
        self.heap.get_mut(obj)
    }

    /// Highest object id handed out and not yet reclaimed.
    #[must_use]
    pub fn max_object_id(&self) -> u32 {
        self.heap.max_id()
    }

    /// Method-call trampoline used for every hook invocation.
    ///
    /// `args` are borrowed; the returned value is owned by the caller.
    pub fn invoke(&mut self, method: &Method, obj: ObjectId, args: &[Value]) -> Result<Value> {
        let body = method.body();
        body(self, obj, args)
    }

    /// Marks a fault as unwinding.
    pub fn push_fault(&mut self, kind: FaultKind) {
        self.faults.push(kind);
    }

    /// Ends the innermost fault.
    pub fn pop_fault(&mut self) -> Option<FaultKind> {
        self.faults.pop()
    }

    /// The innermost unwinding fault.
    #[must_use]
    pub fn current_fault(&self) -> Option<FaultKind> {
        self.faults.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let ctx = Context::new();
        for name in ["stdclass", "Serializable", UNSERIALIZABLE_CLASS, INCOMPLETE_CLASS] {
            assert!(ctx.find_class(name).is_some(), "{name}");
        }
        assert_eq!(ctx.find_class("STDCLASS"), Some(ctx.std_class()));
        assert_eq!(
            ctx.class(ctx.find_class("Serializable").unwrap()).unwrap().kind(),
            ClassKind::Interface
        );
    }

    #[test]
    fn test_fault_stack() {
        let mut ctx = Context::new();
        assert_eq!(ctx.current_fault(), None);
        ctx.push_fault(FaultKind::UserException);
        ctx.push_fault(FaultKind::NativeException);
        assert_eq!(ctx.current_fault(), Some(FaultKind::NativeException));
        assert_eq!(ctx.pop_fault(), Some(FaultKind::NativeException));
        assert_eq!(ctx.current_fault(), Some(FaultKind::UserException));
    }

    #[test]
    fn test_unknown_object() {
        let ctx = Context::new();
        let id = ObjectId::from_raw(3).unwrap();
        assert!(matches!(ctx.object(id), Err(Error::InvalidObject { id: 3 })));
    }
}
