//! Property resolution and access.
//!
//! Every access starts with [`Context::get_prop`], which resolves a key
//! against the object's declared slots (with visibility computed for the
//! calling class) and then against its dynamic map. When direct access is
//! not possible the accessors fall back to the class's magic hooks.
//!
//! Values handed back by these accessors are owned: object references have
//! been counted for the caller and should eventually go to
//! [`Context::release`]. Values passed in by value are consumed.

use crate::Context;
use crate::error::{Error, Result};
use crate::runtime::array::{Array, ArrayKey};
use crate::runtime::class::{Capabilities, ClassId, Visibility};
use crate::runtime::magic::MagicKind;
use crate::runtime::mangle::{Demangled, demangle};
use crate::runtime::object::ObjectId;
use crate::runtime::value::{IncDecOp, SetOp, Value};
use fxhash::FxHashSet;
use std::rc::Rc;

/// How a read treats a missing property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropFetch {
    /// Raise an "Undefined property" notice.
    pub warn: bool,
    /// Materialize a missing dynamic property as null.
    pub define: bool,
}

impl PropFetch {
    /// Plain read.
    pub const READ: Self = PropFetch {
        warn: false,
        define: false,
    };
    /// Read that warns on undefined properties.
    pub const WARN: Self = PropFetch {
        warn: true,
        define: false,
    };
    /// Read for a write context.
    pub const DEFINE: Self = PropFetch {
        warn: false,
        define: true,
    };
    /// Warning read for a write context.
    pub const WARN_DEFINE: Self = PropFetch {
        warn: true,
        define: true,
    };
}

/// Where a resolved property lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropSlot {
    /// Declared slot index.
    Declared(usize),
    /// Entry in the dynamic map.
    Dynamic,
}

/// Result of resolving a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropLookup {
    /// The slot, when one exists.
    pub slot: Option<PropSlot>,
    /// A declared or dynamic property exists under the key.
    pub visible: bool,
    /// The calling context may access it directly.
    pub accessible: bool,
    /// The declared slot holds the uninitialized marker.
    pub unset: bool,
}

impl PropLookup {
    pub(crate) const NOT_FOUND: Self = PropLookup {
        slot: None,
        visible: false,
        accessible: false,
        unset: false,
    };

    /// Visible, accessible and initialized.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.visible && self.accessible && !self.unset
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        Err(Error::InvalidPropertyName)
    } else {
        Ok(())
    }
}

impl Context {
    // ========================================================================
    // Resolution
    // ========================================================================

    /// Resolves `key` on `obj` for an access made from `ctx`.
    ///
    /// Never allocates storage and never runs hooks.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPropertyName`] for an empty key
    /// - [`Error::InvalidObject`] if `obj` is not live
    pub fn get_prop(&self, obj: ObjectId, ctx: Option<ClassId>, key: &str) -> Result<PropLookup> {
        check_key(key)?;
        let data = self.heap.get(obj)?;
        let class = self.class(data.class)?;

        if let Some((slot, accessible)) = class.decl_prop_index(&self.classes, ctx, key) {
            return Ok(PropLookup {
                slot: Some(PropSlot::Declared(slot)),
                visible: true,
                accessible,
                unset: data.slots[slot].value.is_uninit(),
            });
        }

        if data.has_dyn_props() && self.heap.dyn_props(obj).is_some_and(|m| m.contains_str(key)) {
            return Ok(PropLookup {
                slot: Some(PropSlot::Dynamic),
                visible: true,
                accessible: true,
                unset: false,
            });
        }
        Ok(PropLookup::NOT_FOUND)
    }

    /// Like [`get_prop`](Self::get_prop), but materializes a null dynamic
    /// property when nothing exists under `key`.
    ///
    /// # Errors
    ///
    /// Same as [`get_prop`](Self::get_prop).
    pub fn get_prop_create(
        &mut self,
        obj: ObjectId,
        ctx: Option<ClassId>,
        key: &str,
    ) -> Result<PropLookup> {
        let lookup = self.get_prop(obj, ctx, key)?;
        if lookup.visible {
            return Ok(lookup);
        }
        self.store_dynamic(obj, key, Value::Null)?;
        Ok(PropLookup {
            slot: Some(PropSlot::Dynamic),
            visible: true,
            accessible: true,
            unset: false,
        })
    }

    pub(crate) fn slot_value(&self, obj: ObjectId, slot: PropSlot, key: &str) -> Result<Value> {
        Ok(match slot {
            PropSlot::Declared(i) => self.heap.get(obj)?.slots[i].value.clone(),
            PropSlot::Dynamic => self
                .heap
                .dyn_props(obj)
                .and_then(|m| m.get_str(key))
                .cloned()
                .unwrap_or(Value::Null),
        })
    }

    fn store(&mut self, obj: ObjectId, slot: PropSlot, key: &str, value: Value) -> Result<()> {
        match slot {
            PropSlot::Declared(i) => {
                let old = std::mem::replace(&mut self.heap.get_mut(obj)?.slots[i].value, value);
                self.release(old);
                Ok(())
            }
            PropSlot::Dynamic => self.store_dynamic(obj, key, value),
        }
    }

    pub(crate) fn store_dynamic(&mut self, obj: ObjectId, key: &str, value: Value) -> Result<()> {
        let map = self.heap.reserve_dyn_props_mut(obj, &mut self.iters)?;
        if let Some(old) = map.set(key, value) {
            self.release(old);
        }
        Ok(())
    }

    fn update_in_place<R>(
        &mut self,
        obj: ObjectId,
        slot: PropSlot,
        key: &str,
        f: impl FnOnce(&mut Value) -> R,
    ) -> Result<R> {
        let target = match slot {
            PropSlot::Declared(i) => &mut self.heap.get_mut(obj)?.slots[i].value,
            PropSlot::Dynamic => {
                let map = self.heap.reserve_dyn_props_mut(obj, &mut self.iters)?;
                if !map.contains_str(key) {
                    map.set(key, Value::Null);
                }
                map.get_str_mut(key)
                    .ok_or_else(|| Error::Fatal(format!("lost dynamic property {key}")))?
            }
        };
        Ok(f(target))
    }

    fn inaccessible(&self, obj: ObjectId, key: &str) -> Error {
        let Ok(class) = self.class_of(obj) else {
            return Error::InvalidObject { id: obj.get() };
        };
        let visibility = class
            .lookup_prop(key)
            .and_then(|slot| class.property(slot))
            .map_or(Visibility::Protected, |p| p.visibility);
        Error::InaccessibleProperty {
            class: class.name().to_string(),
            name: key.to_string(),
            visibility,
        }
    }

    fn raise_undefined_property(&mut self, obj: ObjectId, key: &str) {
        let class = self.class_name(obj).unwrap_or_default();
        self.raise_notice(format!("Undefined property: {class}::${key}"));
    }

    fn has_cap(&self, obj: ObjectId, cap: Capabilities) -> Result<bool> {
        Ok(self.class_of(obj)?.has(cap))
    }

    // ========================================================================
    // Reads and writes
    // ========================================================================

    /// Reads a property, falling back to `__get`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPropertyName`] for an empty key
    /// - [`Error::InaccessibleProperty`] when the property is not accessible
    ///   and no `__get` produced a value
    /// - faults raised by `__get`
    pub fn prop(
        &mut self,
        obj: ObjectId,
        ctx: Option<ClassId>,
        key: &str,
        fetch: PropFetch,
    ) -> Result<Value> {
        let lookup = self.get_prop(obj, ctx, key)?;

        if lookup.visible {
            let Some(slot) = lookup.slot else {
                return Ok(Value::Null);
            };
            if lookup.accessible {
                if !lookup.unset {
                    let v = self.slot_value(obj, slot, key)?;
                    return Ok(self.dup(&v));
                }
                if let Some(v) = self.invoke_magic(obj, MagicKind::Get, key, None)? {
                    return Ok(v);
                }
                if fetch.warn {
                    self.raise_undefined_property(obj, key);
                }
                return Ok(Value::Null);
            }
            if let Some(v) = self.invoke_magic(obj, MagicKind::Get, key, None)? {
                return Ok(v);
            }
            return Err(self.inaccessible(obj, key));
        }

        if let Some(v) = self.invoke_magic(obj, MagicKind::Get, key, None)? {
            return Ok(v);
        }
        if fetch.warn {
            self.raise_undefined_property(obj, key);
        }
        if fetch.define {
            self.store_dynamic(obj, key, Value::Null)?;
        }
        Ok(Value::Null)
    }

    /// Writes a property, falling back to `__set`. Consumes `value`.
    ///
    /// An unset declared slot goes through `__set` first when the class has
    /// one. A `__set` declined as recursive on a visible but inaccessible
    /// property leaves the property untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPropertyName`] for an empty key
    /// - [`Error::InaccessibleProperty`] when the property is not accessible
    ///   and the class has no `__set`
    /// - faults raised by `__set`
    pub fn set_prop(
        &mut self,
        obj: ObjectId,
        ctx: Option<ClassId>,
        key: &str,
        value: Value,
    ) -> Result<()> {
        let lookup = match self.get_prop(obj, ctx, key) {
            Ok(lookup) => lookup,
            Err(err) => {
                self.release(value);
                return Err(err);
            }
        };

        if lookup.visible && lookup.accessible {
            let slot = lookup.slot.unwrap_or(PropSlot::Dynamic);
            if lookup.unset {
                match self.invoke_magic(obj, MagicKind::Set, key, Some(&value)) {
                    Ok(Some(ret)) => {
                        self.release(ret);
                        self.release(value);
                        return Ok(());
                    }
                    Ok(None) => {}
                    Err(err) => {
                        self.release(value);
                        return Err(err);
                    }
                }
            }
            return self.store(obj, slot, key, value);
        }

        let use_set = self.has_cap(obj, Capabilities::USE_SET)?;
        if use_set {
            match self.invoke_magic(obj, MagicKind::Set, key, Some(&value)) {
                Ok(Some(ret)) => {
                    self.release(ret);
                    self.release(value);
                    return Ok(());
                }
                Ok(None) if lookup.visible => {
                    hopper_log::trace!("recursive __set left #{}->{} untouched", obj, key);
                    self.release(value);
                    return Ok(());
                }
                Ok(None) => {}
                Err(err) => {
                    self.release(value);
                    return Err(err);
                }
            }
        } else if lookup.visible {
            self.release(value);
            return Err(self.inaccessible(obj, key));
        }
        self.store_dynamic(obj, key, value)
    }

    /// `isset($obj->key)`, falling back to `__isset`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPropertyName`] for an empty key, or faults raised by `__isset`.
    pub fn isset_prop(&mut self, obj: ObjectId, ctx: Option<ClassId>, key: &str) -> Result<bool> {
        let lookup = self.get_prop(obj, ctx, key)?;
        if let (true, Some(slot)) = (lookup.is_usable(), lookup.slot) {
            return Ok(!self.slot_value(obj, slot, key)?.is_null());
        }
        match self.invoke_magic(obj, MagicKind::Isset, key, None)? {
            Some(v) => {
                let set = v.to_bool();
                self.release(v);
                Ok(set)
            }
            None => Ok(false),
        }
    }

    /// `empty($obj->key)`, falling back to `__isset` then `__get`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPropertyName`] for an empty key, or faults raised by the hooks.
    pub fn empty_prop(&mut self, obj: ObjectId, ctx: Option<ClassId>, key: &str) -> Result<bool> {
        let lookup = self.get_prop(obj, ctx, key)?;
        if let (true, Some(slot)) = (lookup.is_usable(), lookup.slot) {
            return Ok(!self.slot_value(obj, slot, key)?.to_bool());
        }
        let isset = match self.invoke_magic(obj, MagicKind::Isset, key, None)? {
            Some(v) => {
                let set = v.to_bool();
                self.release(v);
                set
            }
            None => return Ok(true),
        };
        if !isset {
            return Ok(true);
        }
        match self.invoke_magic(obj, MagicKind::Get, key, None)? {
            Some(v) => {
                let empty = !v.to_bool();
                self.release(v);
                Ok(empty)
            }
            None => Ok(false),
        }
    }

    /// `unset($obj->key)`.
    ///
    /// An accessible declared property becomes uninitialized; a dynamic one
    /// is removed. Otherwise `__unset` is tried.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPropertyName`] for an empty key
    /// - [`Error::CannotUnsetInaccessible`] for a visible, inaccessible
    ///   property that no `__unset` handled
    /// - faults raised by `__unset`
    pub fn unset_prop(&mut self, obj: ObjectId, ctx: Option<ClassId>, key: &str) -> Result<()> {
        let lookup = self.get_prop(obj, ctx, key)?;
        if lookup.visible && lookup.accessible {
            match lookup.slot {
                Some(PropSlot::Declared(i)) => {
                    let old = std::mem::take(&mut self.heap.get_mut(obj)?.slots[i].value);
                    self.release(old);
                }
                Some(PropSlot::Dynamic) => {
                    let map = self.heap.reserve_dyn_props_mut(obj, &mut self.iters)?;
                    let container = map.id();
                    if let Some((pos, old)) = map.remove_str_full(key) {
                        self.iters.entry_removed(container, pos);
                        self.release(old);
                    }
                }
                None => {}
            }
            return Ok(());
        }

        match self.invoke_magic(obj, MagicKind::Unset, key, None)? {
            Some(ret) => {
                self.release(ret);
                Ok(())
            }
            None if lookup.visible => Err(Error::CannotUnsetInaccessible {
                class: self.class_name(obj)?,
                name: key.to_string(),
            }),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Read-modify-write
    // ========================================================================

    fn apply_set_op(&mut self, op: SetOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        let operand = |ctx: &mut Self, v: &Value| -> Result<Value> {
            let Value::Object(o) = v else {
                return Ok(v.clone());
            };
            if op.is_arithmetic() {
                let class = ctx.class_name(*o)?;
                ctx.raise_notice(format!("Object of class {class} could not be converted to int"));
                Ok(Value::Int(1))
            } else {
                Ok(Value::Str(Rc::from(ctx.to_string(*o)?)))
            }
        };
        let lhs = operand(self, lhs)?;
        let rhs = operand(self, rhs)?;
        Ok(op.apply(&lhs, &rhs))
    }

    /// Compound assignment `$obj->key op= rhs`. Returns the new value.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPropertyName`] for an empty key
    /// - [`Error::InaccessibleProperty`] when the property is not accessible
    ///   and the hooks did not take over
    /// - faults raised by the hooks or by `__toString`
    pub fn set_op_prop(
        &mut self,
        obj: ObjectId,
        ctx: Option<ClassId>,
        op: SetOp,
        key: &str,
        rhs: &Value,
    ) -> Result<Value> {
        let lookup = self.get_prop(obj, ctx, key)?;
        let use_get = self.has_cap(obj, Capabilities::USE_GET)?;
        let use_set = self.has_cap(obj, Capabilities::USE_SET)?;

        if lookup.visible && lookup.accessible {
            let slot = lookup.slot.unwrap_or(PropSlot::Dynamic);
            if lookup.unset && use_get {
                if let Some(got) = self.invoke_magic(obj, MagicKind::Get, key, None)? {
                    let result = self.apply_set_op(op, &got, rhs);
                    self.release(got);
                    let result = result?;
                    if use_set {
                        if let Some(ret) = self.invoke_magic(obj, MagicKind::Set, key, Some(&result))? {
                            self.release(ret);
                            return Ok(result);
                        }
                    }
                    self.store(obj, slot, key, result.clone())?;
                    return Ok(result);
                }
            }
            let current = self.slot_value(obj, slot, key)?;
            let result = self.apply_set_op(op, &current, rhs)?;
            self.store(obj, slot, key, result.clone())?;
            return Ok(result);
        }

        if use_get && !use_set {
            let got = self
                .invoke_magic(obj, MagicKind::Get, key, None)?
                .unwrap_or(Value::Null);
            let result = self.apply_set_op(op, &got, rhs);
            self.release(got);
            let result = result?;
            if lookup.visible {
                return Err(self.inaccessible(obj, key));
            }
            self.store_dynamic(obj, key, result.clone())?;
            return Ok(result);
        }

        if use_get && use_set {
            if let Some(got) = self.invoke_magic(obj, MagicKind::Get, key, None)? {
                let result = self.apply_set_op(op, &got, rhs);
                self.release(got);
                let result = result?;
                if let Some(ret) = self.invoke_magic(obj, MagicKind::Set, key, Some(&result))? {
                    self.release(ret);
                }
                return Ok(result);
            }
        }

        if lookup.visible {
            return Err(self.inaccessible(obj, key));
        }
        let result = self.apply_set_op(op, &Value::Null, rhs)?;
        self.store_dynamic(obj, key, result.clone())?;
        Ok(result)
    }

    /// `++$obj->key` and friends. Returns the expression result.
    ///
    /// # Errors
    ///
    /// Same as [`set_op_prop`](Self::set_op_prop).
    pub fn inc_dec_prop(
        &mut self,
        obj: ObjectId,
        ctx: Option<ClassId>,
        op: IncDecOp,
        key: &str,
    ) -> Result<Value> {
        let lookup = self.get_prop(obj, ctx, key)?;
        let use_get = self.has_cap(obj, Capabilities::USE_GET)?;
        let use_set = self.has_cap(obj, Capabilities::USE_SET)?;

        if lookup.visible && lookup.accessible {
            let slot = lookup.slot.unwrap_or(PropSlot::Dynamic);
            if lookup.unset && use_get {
                if let Some(mut got) = self.invoke_magic(obj, MagicKind::Get, key, None)? {
                    let dest = op.apply(&mut got);
                    let dest = self.dup(&dest);
                    if use_set {
                        match self.invoke_magic(obj, MagicKind::Set, key, Some(&got)) {
                            Ok(Some(ret)) => {
                                self.release(ret);
                                self.release(got);
                                return Ok(dest);
                            }
                            Ok(None) => {}
                            Err(err) => {
                                self.release(got);
                                self.release(dest);
                                return Err(err);
                            }
                        }
                    }
                    self.store(obj, slot, key, got)?;
                    return Ok(dest);
                }
            }
            let dest = self.update_in_place(obj, slot, key, |v| op.apply(v))?;
            return Ok(self.dup(&dest));
        }

        if use_get && !use_set {
            let mut got = self
                .invoke_magic(obj, MagicKind::Get, key, None)?
                .unwrap_or(Value::Null);
            let dest = op.apply(&mut got);
            let dest = self.dup(&dest);
            if lookup.visible {
                self.release(got);
                self.release(dest);
                return Err(self.inaccessible(obj, key));
            }
            self.store_dynamic(obj, key, got)?;
            return Ok(dest);
        }

        if use_get && use_set {
            if let Some(mut got) = self.invoke_magic(obj, MagicKind::Get, key, None)? {
                let dest = op.apply(&mut got);
                let dest = self.dup(&dest);
                let set = self.invoke_magic(obj, MagicKind::Set, key, Some(&got));
                self.release(got);
                if let Some(ret) = set? {
                    self.release(ret);
                }
                return Ok(dest);
            }
        }

        if lookup.visible {
            return Err(self.inaccessible(obj, key));
        }
        let mut fresh = Value::Null;
        let dest = op.apply(&mut fresh);
        self.store_dynamic(obj, key, fresh)?;
        Ok(dest)
    }

    // ========================================================================
    // Name-based access
    // ========================================================================

    fn context_class(&self, context: Option<&str>) -> Option<ClassId> {
        context.filter(|c| !c.is_empty()).and_then(|c| self.find_class(c))
    }

    /// Reads a property by name from the class named `context`.
    ///
    /// Initialized accessible slots are read directly; everything else goes
    /// through `__get`. Missing properties read as null, with a notice when
    /// `warn` is set.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPropertyName`] for an empty key, or faults raised by `__get`.
    pub fn get_prop_by_name(
        &mut self,
        obj: ObjectId,
        key: &str,
        context: Option<&str>,
        warn: bool,
    ) -> Result<Value> {
        let ctx = self.context_class(context);
        let lookup = self.get_prop(obj, ctx, key)?;
        if let (true, Some(slot)) = (lookup.is_usable(), lookup.slot) {
            let v = self.slot_value(obj, slot, key)?;
            return Ok(self.dup(&v));
        }
        if let Some(v) = self.invoke_magic(obj, MagicKind::Get, key, None)? {
            return Ok(v);
        }
        if warn {
            self.raise_undefined_property(obj, key);
        }
        Ok(Value::Null)
    }

    /// Writes a property by name from the class named `context`.
    ///
    /// Without `__set` a missing property is created; with `__set` anything
    /// not directly writable goes through the hook. An inaccessible property
    /// of a class without `__set` is left untouched. Consumes `value`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPropertyName`] for an empty key, or faults raised by `__set`.
    pub fn set_prop_by_name(
        &mut self,
        obj: ObjectId,
        key: &str,
        value: Value,
        context: Option<&str>,
    ) -> Result<()> {
        let ctx = self.context_class(context);
        let lookup = match self.get_prop(obj, ctx, key) {
            Ok(lookup) => lookup,
            Err(err) => {
                self.release(value);
                return Err(err);
            }
        };
        let use_set = self.has_cap(obj, Capabilities::USE_SET)?;

        if let (true, Some(slot)) = (lookup.is_usable(), lookup.slot) {
            return self.store(obj, slot, key, value);
        }
        if !lookup.visible && !use_set {
            return self.store_dynamic(obj, key, value);
        }
        let outcome = if use_set {
            self.invoke_magic(obj, MagicKind::Set, key, Some(&value))
        } else {
            Ok(None)
        };
        self.release(value);
        if let Some(ret) = outcome? {
            self.release(ret);
        }
        Ok(())
    }

    // ========================================================================
    // Array conversion
    // ========================================================================

    /// Casts an object to an array keyed by mangled property names.
    ///
    /// Declared properties come first, walking from the object's class up
    /// through its parents (and each class's traits); a slot overridden
    /// along the way appears once, under its most-derived declaration.
    /// Uninitialized slots are skipped. Dynamic properties follow in map
    /// order. The returned array holds counted references.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidObject`] if `obj` is not live.
    pub fn to_array(&mut self, obj: ObjectId) -> Result<Array> {
        let class = self.class_of(obj)?;
        let data = self.heap.get(obj)?;
        let mut entries: Vec<(ArrayKey, Value)> = Vec::with_capacity(data.slots.len());
        let mut inserted = vec![false; data.slots.len()];

        for level in self.classes.ancestry(class.id()) {
            for &slot in level.own_properties() {
                if inserted[slot] || data.slots[slot].value.is_uninit() {
                    continue;
                }
                inserted[slot] = true;
                let name = level.property(slot).map_or_else(
                    || class.properties()[slot].mangled.clone(),
                    |p| p.mangled.clone(),
                );
                entries.push((ArrayKey::Str(name), data.slots[slot].value.clone()));
            }
        }
        if let Some(map) = self.heap.dyn_props(obj) {
            entries.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut out = Array::with_capacity(entries.len());
        for (k, v) in entries {
            let v = self.dup(&v);
            if let Some(old) = out.set(k, v) {
                self.release(old);
            }
        }
        Ok(out)
    }

    /// Enumerates the properties visible from `ctx` for iteration.
    ///
    /// Keys are bare names; inaccessible and uninitialized properties are
    /// skipped. Declared properties come first, most-derived class first,
    /// then dynamic properties with their keys preserved.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidObject`] if `obj` is not live.
    pub fn to_iter_array(&mut self, obj: ObjectId, ctx: Option<ClassId>) -> Result<Array> {
        let class = self.class_of(obj)?;
        let mut names = Vec::new();
        let mut seen = FxHashSet::default();
        for level in self.classes.ancestry(class.id()) {
            for &slot in level.own_properties() {
                if let Some(p) = level.property(slot) {
                    if seen.insert(Rc::clone(&p.name)) {
                        names.push(Rc::clone(&p.name));
                    }
                }
            }
        }

        let mut entries: Vec<(ArrayKey, Value)> = Vec::new();
        for name in names {
            let lookup = self.get_prop(obj, ctx, &name)?;
            if let (true, Some(slot)) = (lookup.is_usable(), lookup.slot) {
                let v = self.slot_value(obj, slot, &name)?;
                if !v.is_uninit() {
                    entries.push((ArrayKey::Str(name), v));
                }
            }
        }
        if let Some(map) = self.heap.dyn_props(obj) {
            entries.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut out = Array::with_capacity(entries.len());
        for (k, v) in entries {
            let v = self.dup(&v);
            if let Some(old) = out.set(k, v) {
                self.release(old);
            }
        }
        Ok(out)
    }

    /// Writes every entry of `props` through [`set_prop`](Self::set_prop).
    ///
    /// Mangled keys pick the access context: `\0*\0name` uses the object's
    /// class, `\0Class\0name` uses `Class` (entries naming an unknown class
    /// are skipped). Plain keys are written from outside any class.
    ///
    /// # Errors
    ///
    /// The first error returned by [`set_prop`](Self::set_prop).
    pub fn set_from_array(&mut self, obj: ObjectId, props: &Array) -> Result<()> {
        let own_class = self.heap.get(obj)?.class;
        let entries: Vec<(Rc<str>, Value)> = props
            .iter()
            .map(|(k, v)| (k.to_name(), v.clone()))
            .collect();
        for (key, v) in entries {
            let (ctx, name) = match demangle(&key) {
                Demangled::Public(name) => (None, name),
                Demangled::Protected(name) => (Some(own_class), name),
                Demangled::Private { class, name } => match self.find_class(class) {
                    Some(c) => (Some(c), name),
                    None => continue,
                },
            };
            let v = self.dup(&v);
            self.set_prop(obj, ctx, name, v)?;
        }
        Ok(())
    }

    /// Casts an array to a `stdClass` whose dynamic map holds its entries.
    ///
    /// # Errors
    ///
    /// Faults from instantiation.
    pub fn object_from_array(&mut self, props: &Array) -> Result<ObjectId> {
        let obj = self.new_instance(self.builtins.std_class)?;
        let mut map = Array::with_capacity(props.len());
        let entries: Vec<(ArrayKey, Value)> =
            props.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (k, v) in entries {
            let v = self.dup(&v);
            map.set(k, v);
        }
        if let Some(old) = self.heap.replace_dyn_props(obj, map)? {
            self.release(Value::Array(old));
        }
        Ok(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::class::{ClassBuilder, PropertyDecl};

    struct Fixture {
        ctx: Context,
        a: ClassId,
        b: ClassId,
    }

    // A { private $x = 1; public $p = "a"; }  B extends A { protected $y = 2; }
    fn fixture() -> Fixture {
        let mut ctx = Context::new();
        let mut a = ClassBuilder::new("A");
        a.add_property(PropertyDecl::private("x").with_default(1))
            .add_property(PropertyDecl::public("p").with_default("a"));
        let a = a.register(&mut ctx).unwrap();
        let mut b = ClassBuilder::new("B");
        b.extends("A")
            .add_property(PropertyDecl::protected("y").with_default(2));
        let b = b.register(&mut ctx).unwrap();
        Fixture { ctx, a, b }
    }

    #[test]
    fn test_resolve_declared_and_missing() {
        let Fixture { mut ctx, a, b } = fixture();
        let obj = ctx.new_instance(b).unwrap();

        let x_from_b = ctx.get_prop(obj, Some(b), "x").unwrap();
        assert!(x_from_b.visible && !x_from_b.accessible);
        let x_from_a = ctx.get_prop(obj, Some(a), "x").unwrap();
        assert!(x_from_a.visible && x_from_a.accessible);

        let missing = ctx.get_prop(obj, None, "foo").unwrap();
        assert_eq!(missing, PropLookup::NOT_FOUND);
        assert!(ctx.heap().dyn_props(obj).is_none());
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let Fixture { mut ctx, b, .. } = fixture();
        let obj = ctx.new_instance(b).unwrap();
        assert_eq!(ctx.get_prop(obj, None, ""), Err(Error::InvalidPropertyName));
        assert_eq!(ctx.isset_prop(obj, None, ""), Err(Error::InvalidPropertyName));
        assert_eq!(
            ctx.set_prop(obj, None, "", Value::Int(1)),
            Err(Error::InvalidPropertyName)
        );
    }

    #[test]
    fn test_write_inaccessible_without_hook_fails() {
        let Fixture { mut ctx, b, .. } = fixture();
        let obj = ctx.new_instance(b).unwrap();
        let err = ctx.set_prop(obj, Some(b), "x", Value::Int(5)).unwrap_err();
        assert_eq!(err.to_string(), "Cannot access private property B::$x");
        let err = ctx.prop(obj, None, "y", PropFetch::READ).unwrap_err();
        assert_eq!(err.to_string(), "Cannot access protected property B::$y");
    }

    #[test]
    fn test_dynamic_property_lifecycle() {
        let Fixture { mut ctx, b, .. } = fixture();
        let obj = ctx.new_instance(b).unwrap();
        ctx.set_prop(obj, None, "extra", Value::Int(9)).unwrap();
        assert!(ctx.object(obj).unwrap().has_dyn_props());
        assert_eq!(ctx.prop(obj, None, "extra", PropFetch::READ).unwrap(), Value::Int(9));
        assert!(ctx.isset_prop(obj, None, "extra").unwrap());

        ctx.unset_prop(obj, None, "extra").unwrap();
        assert!(!ctx.isset_prop(obj, None, "extra").unwrap());
        assert!(!ctx.get_prop(obj, None, "extra").unwrap().visible);
    }

    #[test]
    fn test_unset_declared_becomes_uninit() {
        let Fixture { mut ctx, b, .. } = fixture();
        let obj = ctx.new_instance(b).unwrap();
        ctx.unset_prop(obj, None, "p").unwrap();
        let lookup = ctx.get_prop(obj, None, "p").unwrap();
        assert!(lookup.visible && lookup.unset);
        assert_eq!(ctx.prop(obj, None, "p", PropFetch::WARN).unwrap(), Value::Null);
        assert_eq!(ctx.diagnostics()[0].message, "Undefined property: B::$p");

        ctx.set_prop(obj, None, "p", Value::str("back")).unwrap();
        assert_eq!(
            ctx.prop(obj, None, "p", PropFetch::READ).unwrap(),
            Value::str("back")
        );
    }

    #[test]
    fn test_unset_inaccessible() {
        let Fixture { mut ctx, b, .. } = fixture();
        let obj = ctx.new_instance(b).unwrap();
        assert!(matches!(
            ctx.unset_prop(obj, None, "y"),
            Err(Error::CannotUnsetInaccessible { .. })
        ));
        assert_eq!(ctx.unset_prop(obj, None, "nothing"), Ok(()));
    }

    #[test]
    fn test_define_read_materializes() {
        let Fixture { mut ctx, b, .. } = fixture();
        let obj = ctx.new_instance(b).unwrap();
        assert_eq!(ctx.prop(obj, None, "z", PropFetch::DEFINE).unwrap(), Value::Null);
        assert!(ctx.get_prop(obj, None, "z").unwrap().visible);
    }

    #[test]
    fn test_set_op_and_inc_dec() {
        let Fixture { mut ctx, b, .. } = fixture();
        let obj = ctx.new_instance(b).unwrap();
        assert_eq!(
            ctx.set_op_prop(obj, Some(b), SetOp::Add, "y", &Value::Int(3)).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            ctx.inc_dec_prop(obj, Some(b), IncDecOp::PostInc, "y").unwrap(),
            Value::Int(5)
        );
        assert_eq!(ctx.prop(obj, Some(b), "y", PropFetch::READ).unwrap(), Value::Int(6));

        // New dynamic properties start from null.
        assert_eq!(
            ctx.inc_dec_prop(obj, None, IncDecOp::PreInc, "count").unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            ctx.set_op_prop(obj, None, SetOp::Concat, "label", &Value::str("x")).unwrap(),
            Value::str("x")
        );
        assert!(matches!(
            ctx.inc_dec_prop(obj, None, IncDecOp::PreInc, "y"),
            Err(Error::InaccessibleProperty { .. })
        ));
    }

    #[test]
    fn test_set_op_object_operand_notice() {
        let Fixture { mut ctx, b, .. } = fixture();
        let obj = ctx.new_instance(b).unwrap();
        let other = ctx.new_instance(ctx.std_class()).unwrap();
        let result = ctx
            .set_op_prop(obj, None, SetOp::Mul, "n", &Value::Object(other))
            .unwrap();
        assert_eq!(result, Value::Int(0));
        assert_eq!(
            ctx.diagnostics()[0].message,
            "Object of class stdClass could not be converted to int"
        );
    }

    #[test]
    fn test_to_array_mangles_and_orders() {
        let Fixture { mut ctx, b, .. } = fixture();
        let obj = ctx.new_instance(b).unwrap();
        ctx.set_prop(obj, None, "dyn", Value::Int(7)).unwrap();
        let arr = ctx.to_array(obj).unwrap();
        let keys: Vec<String> = arr.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["\0*\0y", "\0A\0x", "p", "dyn"]);
    }

    #[test]
    fn test_to_iter_array_respects_context() {
        let Fixture { mut ctx, a, b } = fixture();
        let obj = ctx.new_instance(b).unwrap();
        let outside = ctx.to_iter_array(obj, None).unwrap();
        let keys: Vec<String> = outside.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["p"]);

        let from_a = ctx.to_iter_array(obj, Some(a)).unwrap();
        let keys: Vec<String> = from_a.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["y", "x", "p"]);
    }

    #[test]
    fn test_set_from_array_demangles() {
        let Fixture { mut ctx, a, b } = fixture();
        let obj = ctx.new_instance(b).unwrap();
        let mut props = Array::new();
        props.set("\0A\0x", Value::Int(10));
        props.set("\0*\0y", Value::Int(20));
        props.set("\0Nope\0z", Value::Int(30));
        props.set("plain", Value::Int(40));
        ctx.set_from_array(obj, &props).unwrap();

        assert_eq!(ctx.prop(obj, Some(a), "x", PropFetch::READ).unwrap(), Value::Int(10));
        assert_eq!(ctx.prop(obj, Some(b), "y", PropFetch::READ).unwrap(), Value::Int(20));
        assert_eq!(ctx.prop(obj, None, "plain", PropFetch::READ).unwrap(), Value::Int(40));
        assert!(!ctx.get_prop(obj, None, "z").unwrap().visible);
    }

    #[test]
    fn test_object_from_array() {
        let mut ctx = Context::new();
        let mut props = Array::new();
        props.set("name", Value::str("n"));
        props.push(Value::Int(3));
        let obj = ctx.object_from_array(&props).unwrap();
        assert_eq!(ctx.class_name(obj).unwrap(), "stdClass");
        assert_eq!(ctx.prop(obj, None, "name", PropFetch::READ).unwrap(), Value::str("n"));
        assert_eq!(ctx.heap().dyn_props(obj).unwrap().get_int(0), Some(&Value::Int(3)));
    }

    #[test]
    fn test_name_based_access() {
        let Fixture { mut ctx, b, .. } = fixture();
        let obj = ctx.new_instance(b).unwrap();
        assert_eq!(ctx.get_prop_by_name(obj, "y", Some("B"), false).unwrap(), Value::Int(2));
        assert_eq!(ctx.get_prop_by_name(obj, "y", None, true).unwrap(), Value::Null);
        assert_eq!(ctx.diagnostics().len(), 1);

        // Inaccessible without __set: silently ignored.
        ctx.set_prop_by_name(obj, "y", Value::Int(9), None).unwrap();
        assert_eq!(ctx.get_prop_by_name(obj, "y", Some("b"), false).unwrap(), Value::Int(2));

        ctx.set_prop_by_name(obj, "fresh", Value::Int(1), None).unwrap();
        assert_eq!(ctx.get_prop_by_name(obj, "fresh", None, false).unwrap(), Value::Int(1));
    }
}
