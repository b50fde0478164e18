//! Serialization bridge.
//!
//! [`Context::serialize`] decides how each object is represented and drives
//! a [`Serializer`], which owns the output format. Per object, the first
//! matching strategy wins:
//!
//! 1. Classes implementing `Serializable` have their `serialize()` hook
//!    called; a string is written verbatim as a custom record, null as null.
//! 2. Native objects that are not marked serializable are replaced by a
//!    placeholder carrying only their class name.
//! 3. Classes declaring `__sleep` are written with the property subset the
//!    hook names.
//! 4. Everything else is written with the default enumeration from
//!    [`Context::to_array`].
//!
//! [`SerializeMode::DebuggerSerialize`] is the relaxed mode: hook faults and
//! contract violations become warnings and the value is written as null.
//!
//! # Example
//!
//! ```rust
//! use hopper::{ClassBuilder, Context, PropertyDecl, SerializeMode, Value};
//!
//! let mut ctx = Context::new();
//! let mut point = ClassBuilder::new("Point");
//! point
//!     .add_property(PropertyDecl::public("x").with_default(1))
//!     .add_property(PropertyDecl::private("y").with_default(2));
//! let class = point.register(&mut ctx).unwrap();
//! let obj = ctx.new_instance(class).unwrap();
//!
//! let out = ctx
//!     .serialize_to_string(&Value::Object(obj), SerializeMode::Serialize)
//!     .unwrap();
//! assert_eq!(out, "O:5:\"Point\":2:{s:1:\"x\";i:1;s:8:\"\0Point\0y\";i:2;}");
//! ```

use crate::Context;
use crate::error::{Error, Result};
use crate::runtime::array::{Array, ArrayKey};
use crate::runtime::class::{Capabilities, Visibility};
use crate::runtime::mangle::mangle;
use crate::runtime::object::ObjectId;
use crate::runtime::property::{PropLookup, PropSlot};
use crate::runtime::value::{Value, format_double};
use hopper_log::trace;
use std::fmt::Write as _;

const SERIALIZE_METHOD: &str = "serialize";
const DEBUG_DISPLAY_KEY: &str = "__PHP_DebugDisplay";
const INCOMPLETE_CLASS_NAME_KEY: &str = "__PHP_Incomplete_Class_Name";
const UNSERIALIZABLE_CLASS_NAME_KEY: &str = "__PHP_Unserializable_Class_Name";

/// Strictness of a serialization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SerializeMode {
    /// Regular serialization. Contract violations are errors.
    #[default]
    Serialize,
    /// Serialization for a debugger. Faults degrade to warnings.
    DebuggerSerialize,
}

/// Output side of serialization.
///
/// The bridge decides *what* is written; implementations decide *how*.
pub trait Serializer {
    /// Mode of this run.
    fn mode(&self) -> SerializeMode;

    /// Writes null.
    fn write_null(&mut self);

    /// Writes a boolean.
    fn write_bool(&mut self, b: bool);

    /// Writes an integer.
    fn write_int(&mut self, i: i64);

    /// Writes a double.
    fn write_double(&mut self, d: f64);

    /// Writes a string.
    fn write_string(&mut self, s: &str);

    /// Writes the verbatim output of a custom `serialize()` hook.
    fn write_serializable_record(&mut self, class: &str, bytes: &str);

    /// Declares that the next array is an object record of `class`.
    fn set_record_info(&mut self, class: &str, id: ObjectId, tag: char);

    /// Opens an array of `len` entries.
    fn begin_array(&mut self, len: usize);

    /// Writes the key of the next entry.
    fn write_key(&mut self, key: &ArrayKey);

    /// Closes the current array.
    fn end_array(&mut self);

    /// Enters an object. Returns true when the object must not be expanded
    /// (nesting limit exceeded or already on the current path).
    fn enter_level(&mut self, obj: ObjectId) -> bool;

    /// Leaves an object entered with [`enter_level`](Self::enter_level).
    fn exit_level(&mut self, obj: ObjectId);

    /// Writes the marker used in place of an unexpanded object.
    fn write_overflow(&mut self, obj: ObjectId);
}

// ============================================================================
// Reference writer
// ============================================================================

/// Writer for the `serialize()` text format.
#[derive(Debug)]
pub struct PhpSerializer {
    mode: SerializeMode,
    out: String,
    path: Vec<ObjectId>,
    max_depth: usize,
    pending: Option<(String, char)>,
}

impl PhpSerializer {
    /// Creates a writer that stops expanding objects past `max_depth`.
    #[must_use]
    pub fn new(mode: SerializeMode, max_depth: usize) -> Self {
        PhpSerializer {
            mode,
            out: String::new(),
            path: Vec::new(),
            max_depth,
            pending: None,
        }
    }

    /// Output written so far.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.out
    }

    /// Consumes the writer and returns its output.
    #[must_use]
    pub fn into_string(self) -> String {
        self.out
    }
}

impl Serializer for PhpSerializer {
    fn mode(&self) -> SerializeMode {
        self.mode
    }

    fn write_null(&mut self) {
        self.out.push_str("N;");
    }

    fn write_bool(&mut self, b: bool) {
        let _ = write!(self.out, "b:{};", u8::from(b));
    }

    fn write_int(&mut self, i: i64) {
        let _ = write!(self.out, "i:{i};");
    }

    fn write_double(&mut self, d: f64) {
        let _ = write!(self.out, "d:{};", format_double(d));
    }

    fn write_string(&mut self, s: &str) {
        let _ = write!(self.out, "s:{}:\"{}\";", s.len(), s);
    }

    fn write_serializable_record(&mut self, class: &str, bytes: &str) {
        let _ = write!(
            self.out,
            "C:{}:\"{}\":{}:{{{}}}",
            class.len(),
            class,
            bytes.len(),
            bytes
        );
    }

    fn set_record_info(&mut self, class: &str, _id: ObjectId, tag: char) {
        self.pending = Some((class.to_string(), tag));
    }

    fn begin_array(&mut self, len: usize) {
        match self.pending.take() {
            Some((class, tag)) => {
                let _ = write!(self.out, "{tag}:{}:\"{class}\":{len}:{{", class.len());
            }
            None => {
                let _ = write!(self.out, "a:{len}:{{");
            }
        }
    }

    fn write_key(&mut self, key: &ArrayKey) {
        match key {
            ArrayKey::Int(i) => self.write_int(*i),
            ArrayKey::Str(s) => self.write_string(s),
        }
    }

    fn end_array(&mut self) {
        self.out.push('}');
    }

    fn enter_level(&mut self, obj: ObjectId) -> bool {
        let overflow = self.path.len() >= self.max_depth || self.path.contains(&obj);
        self.path.push(obj);
        overflow
    }

    fn exit_level(&mut self, _obj: ObjectId) {
        self.path.pop();
    }

    fn write_overflow(&mut self, _obj: ObjectId) {
        self.write_null();
    }
}

// ============================================================================
// Bridge
// ============================================================================

impl Context {
    /// Serializes `value` into a string with the [`PhpSerializer`].
    ///
    /// # Errors
    ///
    /// Same as [`serialize`](Self::serialize).
    pub fn serialize_to_string(&mut self, value: &Value, mode: SerializeMode) -> Result<String> {
        let mut writer = PhpSerializer::new(mode, self.config.max_nesting_depth);
        self.serialize(value, &mut writer)?;
        Ok(writer.into_string())
    }

    /// Writes `value` through `out`.
    ///
    /// # Errors
    ///
    /// In [`SerializeMode::Serialize`]:
    /// - [`Error::SerializeContract`] when a `serialize()` hook returns
    ///   something other than a string or null
    /// - faults raised by `serialize()`
    pub fn serialize(&mut self, value: &Value, out: &mut dyn Serializer) -> Result<()> {
        match value {
            Value::Uninit | Value::Null => out.write_null(),
            Value::Bool(b) => out.write_bool(*b),
            Value::Int(i) => out.write_int(*i),
            Value::Double(d) => out.write_double(*d),
            Value::Str(s) => out.write_string(s),
            Value::Array(a) => self.serialize_array(a, out)?,
            Value::Object(obj) => self.serialize_object(*obj, out)?,
        }
        Ok(())
    }

    fn serialize_array(&mut self, array: &Array, out: &mut dyn Serializer) -> Result<()> {
        out.begin_array(array.len());
        for (key, value) in array.iter() {
            out.write_key(key);
            self.serialize(value, out)?;
        }
        out.end_array();
        Ok(())
    }

    fn serialize_object(&mut self, obj: ObjectId, out: &mut dyn Serializer) -> Result<()> {
        let result = if out.enter_level(obj) {
            trace!("#{} not expanded: nesting limit or cycle", obj);
            out.write_overflow(obj);
            Ok(())
        } else {
            self.serialize_object_body(obj, out)
        };
        out.exit_level(obj);
        result
    }

    fn serialize_object_body(&mut self, obj: ObjectId, out: &mut dyn Serializer) -> Result<()> {
        let class = self.class_of(obj)?;
        let debugger = out.mode() == SerializeMode::DebuggerSerialize;

        if class.has(Capabilities::SERIALIZABLE) {
            return self.serialize_custom(obj, class.name(), out);
        }

        if class.has(Capabilities::NATIVE) && !class.has(Capabilities::NATIVE_SERIALIZABLE) {
            if debugger {
                out.write_string(class.name());
                return Ok(());
            }
            let placeholder = self.new_instance(self.builtins.unserializable)?;
            let written = self
                .store_dynamic(
                    placeholder,
                    UNSERIALIZABLE_CLASS_NAME_KEY,
                    Value::Str(class.name_str()),
                )
                .and_then(|()| self.serialize_object(placeholder, out));
            self.release(Value::Object(placeholder));
            return written;
        }

        if class.has(Capabilities::HAS_SLEEP) {
            if let Some(sleep) = class.method("__sleep").cloned() {
                return match self.invoke(&sleep, obj, &[]) {
                    Ok(names) => {
                        let written = self.serialize_sleep(obj, &names, out);
                        self.release(names);
                        written
                    }
                    Err(err) => {
                        trace!("{}::__sleep failed: {}", class.name(), err);
                        self.raise_warning(format!("{}::sleep() throws exception", class.name()));
                        out.write_null();
                        Ok(())
                    }
                };
            }
        }

        let mut props = self.to_array(obj)?;
        let mut record_name = class.name().to_string();

        if debugger && class.has(Capabilities::HAS_DEBUG_DISPLAY) {
            if let Some(hook) = class.method("__toDebugDisplay").cloned() {
                match self.invoke(&hook, obj, &[]) {
                    Ok(Value::Uninit) => {}
                    Ok(display) => {
                        if let Some(old) = props.set(DEBUG_DISPLAY_KEY, display) {
                            self.release(old);
                        }
                    }
                    Err(_) => self.raise_warning(format!(
                        "{}::__toDebugDisplay() throws exception",
                        class.name()
                    )),
                }
            }
        }

        if class.id() == self.builtins.incomplete {
            let stored = self
                .heap
                .dyn_props(obj)
                .and_then(|m| m.get_str(INCOMPLETE_CLASS_NAME_KEY))
                .and_then(|v| v.as_str().map(str::to_string));
            if let Some(name) = stored {
                record_name = name;
                if let Some(old) = props.remove_str(INCOMPLETE_CLASS_NAME_KEY) {
                    self.release(old);
                }
            }
        }

        out.set_record_info(&record_name, obj, 'O');
        let written = self.serialize_array(&props, out);
        self.release(Value::Array(props));
        written
    }

    fn serialize_custom(&mut self, obj: ObjectId, class: &str, out: &mut dyn Serializer) -> Result<()> {
        let debugger = out.mode() == SerializeMode::DebuggerSerialize;
        let ret = match self.call_method(obj, SERIALIZE_METHOD, &[]) {
            Ok(ret) => ret,
            Err(_) if debugger => {
                self.raise_warning(format!("{class}::serialize() throws exception"));
                out.write_null();
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        match ret {
            Value::Str(bytes) => out.write_serializable_record(class, &bytes),
            Value::Null | Value::Uninit => out.write_null(),
            other => {
                self.release(other);
                if !debugger {
                    return Err(Error::SerializeContract {
                        class: class.to_string(),
                    });
                }
                self.raise_warning(format!("{class}::serialize() must return a string or NULL"));
                out.write_null();
            }
        }
        Ok(())
    }

    fn serialize_sleep(&mut self, obj: ObjectId, names: &Value, out: &mut dyn Serializer) -> Result<()> {
        let class = self.class_of(obj)?;
        let Some(names) = names.as_array() else {
            self.raise_warning(
                "serialize(): __sleep should return an array only containing the names of \
                 instance-variables to serialize",
            );
            out.write_null();
            return Ok(());
        };

        let mut wanted = Array::with_capacity(names.len());
        for name in names.values() {
            let name = match name {
                Value::Object(o) => self.to_string(*o)?,
                other => other.to_display_string().unwrap_or_default(),
            };
            let lookup = match self.get_prop(obj, Some(class.id()), &name) {
                Ok(lookup) => lookup,
                Err(Error::InvalidPropertyName) => PropLookup::NOT_FOUND,
                Err(err) => return Err(err),
            };
            match lookup.slot {
                Some(slot) if lookup.accessible && !lookup.unset => {
                    let key = match slot {
                        PropSlot::Declared(i) => match class.property(i).map(|p| p.visibility) {
                            Some(vis @ (Visibility::Private | Visibility::Protected)) => {
                                mangle(vis, class.name(), &name)
                            }
                            _ => name.clone(),
                        },
                        PropSlot::Dynamic => name.clone(),
                    };
                    let v = self.slot_value(obj, slot, &name)?;
                    let v = self.dup(&v);
                    if let Some(old) = wanted.set(key.as_str(), v) {
                        self.release(old);
                    }
                }
                _ => {
                    self.raise_warning(format!(
                        "\"{name}\" returned as member variable from __sleep() but does not exist"
                    ));
                    if let Some(old) = wanted.set(name.as_str(), Value::Null) {
                        self.release(old);
                    }
                }
            }
        }

        out.set_record_info(class.name(), obj, 'O');
        let written = self.serialize_array(&wanted, out);
        self.release(Value::Array(wanted));
        written
    }
}
