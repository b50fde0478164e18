//! Method dispatch on objects.
//!
//! Lookup walks nothing at call time: every class carries a flattened,
//! case-insensitive method table built at registration. A miss falls back to
//! the class's `__call` catch-all, which receives the method name and the
//! arguments packed into a list.
//!
//! # Example
//!
//! ```rust
//! use hopper::{ClassBuilder, Context, Value};
//!
//! let mut ctx = Context::new();
//! let mut greeter = ClassBuilder::new("Greeter");
//! greeter.add_method("__call", |_, _, args| {
//!     Ok(Value::str(&format!("called {}", args[0].as_str().unwrap_or(""))))
//! });
//! let class = greeter.register(&mut ctx).unwrap();
//! let obj = ctx.new_instance(class).unwrap();
//!
//! let ret = ctx.call_method(obj, "wave", &[]).unwrap();
//! assert_eq!(ret, Value::str("called wave"));
//! ```

use crate::Context;
use crate::error::{Error, Result};
use crate::runtime::array::Array;
use crate::runtime::class::Capabilities;
use crate::runtime::object::ObjectId;
use crate::runtime::value::Value;
use hopper_log::trace;

impl Context {
    /// Calls `name` on `obj`.
    ///
    /// # Arguments
    ///
    /// * `obj` - The receiver
    /// * `name` - Method name, matched case-insensitively
    /// * `args` - Borrowed arguments
    ///
    /// # Errors
    ///
    /// - [`Error::UndefinedMethod`] when neither the method nor `__call` exists
    /// - faults raised by the method
    pub fn call_method(&mut self, obj: ObjectId, name: &str, args: &[Value]) -> Result<Value> {
        let class = self.class_of(obj)?;
        if let Some(method) = class.method(name).cloned() {
            return self.invoke(&method, obj, args);
        }
        let Some(call) = class.method("__call").cloned() else {
            return Err(Error::UndefinedMethod {
                class: class.name().to_string(),
                method: name.to_string(),
            });
        };

        trace!("{}::{} forwarded to __call", class.name(), name);
        let packed: Vec<Value> = args.iter().map(|a| self.dup(a)).collect();
        let packed = Value::Array(Array::list(packed));
        let result = self.invoke(&call, obj, &[Value::str(name), packed.clone()]);
        self.release(packed);
        result
    }

    /// Converts `obj` to a string through `__toString`.
    ///
    /// A missing hook or a non-string result is a recoverable error and
    /// yields the empty string.
    ///
    /// # Errors
    ///
    /// - [`Error::Recoverable`] when recoverable errors are configured fatal
    /// - faults raised by `__toString`
    pub fn to_string(&mut self, obj: ObjectId) -> Result<String> {
        let class = self.class_of(obj)?;
        let hook = class
            .method("__toString")
            .filter(|_| class.has(Capabilities::HAS_TO_STRING))
            .cloned();
        let Some(hook) = hook else {
            self.raise_recoverable(format!(
                "Object of class {} could not be converted to string",
                class.name()
            ))?;
            return Ok(String::new());
        };

        match self.invoke(&hook, obj, &[])? {
            Value::Str(s) => Ok(s.to_string()),
            other => {
                self.release(other);
                self.raise_recoverable(format!(
                    "Method {}::__toString() must return a string value",
                    class.name()
                ))?;
                Ok(String::new())
            }
        }
    }

    /// Returns true when `obj`'s class is `class_name`, derives from it or
    /// implements it. Unknown names are never matched.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidObject`] if `obj` is not live.
    pub fn instance_of(&self, obj: ObjectId, class_name: &str) -> Result<bool> {
        let class = self.heap.get(obj)?.class;
        Ok(self
            .find_class(class_name)
            .is_some_and(|target| self.classes.instance_of(class, target)))
    }

    /// Name of `obj`'s class.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidObject`] if `obj` is not live.
    pub fn class_name(&self, obj: ObjectId) -> Result<String> {
        Ok(self.class_of(obj)?.name().to_string())
    }

    /// Runs `__wakeup` if the class declares it. Returns whether it ran.
    ///
    /// # Errors
    ///
    /// Faults raised by `__wakeup`.
    pub fn wakeup(&mut self, obj: ObjectId) -> Result<bool> {
        let class = self.class_of(obj)?;
        if !class.has(Capabilities::HAS_WAKEUP) {
            return Ok(false);
        }
        let Some(hook) = class.method("__wakeup").cloned() else {
            return Ok(false);
        };
        let ret = self.invoke(&hook, obj, &[])?;
        self.release(ret);
        Ok(true)
    }
}
