//! Construction, reference counting, destruction and cloning.
//!
//! Reference counts are plain integers. A `Value::Object` held in a slot,
//! a container or a local is one counted reference; [`Context::dup`] adds
//! one and [`Context::release`] drops one. When the last reference goes the
//! finalizer runs (at most once), and unless it resurrected the object its
//! slots and dynamic map are released and its storage reclaimed.

use crate::Context;
use crate::error::{Error, Result};
use crate::runtime::array::{Array, ArrayKey};
use crate::runtime::class::{Capabilities, ClassId};
use crate::runtime::context::FaultKind;
use crate::runtime::object::{LifecycleState, ObjectAttrs, ObjectId, TypedSlot};
use crate::runtime::value::Value;
use hopper_log::{debug, trace};

impl Context {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Creates an instance of `class` with a reference count of one.
    ///
    /// Slots start from the class defaults; deep-init defaults are copied so
    /// instances never alias class state. If the class declares `__init__`
    /// it runs right after field initialization. A failing initializer
    /// suppresses the finalizer, releases the object and returns the fault.
    ///
    /// # Errors
    ///
    /// - [`Error::CannotInstantiate`] for abstract classes, interfaces and traits
    /// - any fault raised by `__init__`
    pub fn new_instance(&mut self, class: ClassId) -> Result<ObjectId> {
        let cls = self.class(class)?;
        if let Some(kind) = cls.kind().non_instantiable_label() {
            return Err(Error::CannotInstantiate {
                kind,
                class: cls.name().to_string(),
            });
        }

        let slots: Box<[TypedSlot]> = cls
            .properties()
            .iter()
            .map(|p| {
                let value = match &p.default {
                    Value::Array(a) if p.deep_init => Value::Array(a.deep_copy()),
                    other => other.clone(),
                };
                TypedSlot {
                    value,
                    deep_init: p.deep_init,
                }
            })
            .collect();
        let obj = self.heap.allocate(class, slots, cls.native_tail())?;
        self.heap.get_mut(obj)?.refcount = 1;
        debug!("new {}#{}", cls.name(), obj);

        if cls.has(Capabilities::HAS_INIT) {
            if let Some(init) = cls.method("__init__").cloned() {
                match self.invoke(&init, obj, &[]) {
                    Ok(ret) => self.release(ret),
                    Err(err) => {
                        if let Ok(data) = self.heap.get_mut(obj) {
                            data.attrs.insert(ObjectAttrs::NO_DESTRUCT);
                        }
                        self.release(Value::Object(obj));
                        return Err(err);
                    }
                }
            }
        }
        Ok(obj)
    }

    /// Creates an instance of the class called `name`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownClass`] plus everything [`new_instance`](Self::new_instance) returns.
    pub fn new_instance_by_name(&mut self, name: &str) -> Result<ObjectId> {
        let class = self.find_class(name).ok_or_else(|| Error::UnknownClass {
            name: name.to_string(),
        })?;
        self.new_instance(class)
    }

    // ========================================================================
    // Reference counting
    // ========================================================================

    /// Takes another reference to whatever `value` holds.
    ///
    /// Objects get their count bumped; arrays and strings share storage.
    pub fn dup(&mut self, value: &Value) -> Value {
        if let Value::Object(obj) = value {
            if let Ok(data) = self.heap.get_mut(*obj) {
                data.refcount += 1;
            }
        }
        value.clone()
    }

    /// Drops one reference held by `value`.
    ///
    /// Releasing the last handle of an array frees its storage: strong
    /// iterators bound to it are reset and its contents released.
    pub fn release(&mut self, value: Value) {
        match value {
            Value::Object(obj) => self.release_object(obj),
            Value::Array(array) => self.release_array(array),
            _ => {}
        }
    }

    fn release_array(&mut self, array: Array) {
        if let Ok((container, values)) = array.try_into_values() {
            self.iters.invalidate(container);
            for v in values {
                self.release(v);
            }
        }
    }

    fn release_object(&mut self, obj: ObjectId) {
        let Ok(data) = self.heap.get_mut(obj) else {
            debug!("release of dead object #{}", obj);
            return;
        };
        data.refcount = data.refcount.saturating_sub(1);
        if data.refcount > 0 {
            return;
        }
        if self.run_finalizer(obj) {
            self.delete_object(obj);
        } else {
            debug!("#{} resurrected by its finalizer", obj);
        }
    }

    /// Current reference count of an object.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidObject`] if `obj` is not live.
    pub fn refcount(&self, obj: ObjectId) -> Result<u32> {
        Ok(self.heap.get(obj)?.refcount)
    }

    // ========================================================================
    // Destruction
    // ========================================================================

    /// Runs the finalizer if it has not run yet.
    ///
    /// Returns false when the finalizer took new references to the object.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidObject`] if `obj` is not live.
    pub fn destruct(&mut self, obj: ObjectId) -> Result<bool> {
        self.heap.get(obj)?;
        Ok(self.run_finalizer(obj))
    }

    fn run_finalizer(&mut self, obj: ObjectId) -> bool {
        let Ok(data) = self.heap.get_mut(obj) else {
            return false;
        };
        if data.attrs.contains(ObjectAttrs::NO_DESTRUCT) {
            return true;
        }
        data.attrs.insert(ObjectAttrs::NO_DESTRUCT);
        let class = data.class;

        let Ok(cls) = self.class(class) else {
            return true;
        };
        if !cls.has(Capabilities::HAS_DTOR) {
            return true;
        }
        let Some(dtor) = cls.method("__destruct").cloned() else {
            return true;
        };
        if self.current_fault() == Some(FaultKind::NativeException) {
            trace!("skipping {}::__destruct while a native fault unwinds", cls.name());
            return true;
        }

        let Ok(data) = self.heap.get_mut(obj) else {
            return false;
        };
        data.refcount += 1;
        data.state = LifecycleState::Finalizing;
        let elevated = data.refcount;

        match self.invoke(&dtor, obj, &[]) {
            Ok(ret) => self.release(ret),
            Err(err) => {
                self.raise_warning(format!(
                    "Uncaught exception in {}::__destruct(): {}",
                    cls.name(),
                    err
                ));
            }
        }

        let Ok(data) = self.heap.get_mut(obj) else {
            return false;
        };
        data.state = LifecycleState::Live;
        let unchanged = data.refcount == elevated;
        data.refcount -= 1;
        unchanged
    }

    fn delete_object(&mut self, obj: ObjectId) {
        let Some((data, dyn_props)) = self.heap.remove(obj) else {
            return;
        };
        debug!("freed #{} ({} slots)", obj, data.slots.len());
        self.iters.invalidate_owner(obj);
        for slot in data.slots.into_vec() {
            self.release(slot.value);
        }
        if let Some(map) = dyn_props {
            self.release(Value::Array(map));
        }
    }

    // ========================================================================
    // Cloning
    // ========================================================================

    /// Clones an object.
    ///
    /// Natively cloneable classes use their native clone. Otherwise a fresh
    /// instance gets a counted copy of every slot (arrays shared
    /// copy-on-write) and an entry-by-entry copy of the dynamic map, then
    /// `__clone` runs on the clone.
    ///
    /// # Errors
    ///
    /// Faults from instantiation or `__clone`; the clone is released first.
    pub fn clone_object(&mut self, obj: ObjectId) -> Result<ObjectId> {
        let cls = self.class_of(obj)?;
        if let Some(native_clone) = cls.native_clone() {
            return native_clone(self, obj);
        }

        let clone = self.new_instance(cls.id())?;
        if let Err(err) = self.copy_fields(obj, clone) {
            self.release(Value::Object(clone));
            return Err(err);
        }

        if cls.has(Capabilities::HAS_CLONE) {
            if let Some(hook) = cls.method("__clone").cloned() {
                match self.invoke(&hook, clone, &[]) {
                    Ok(ret) => self.release(ret),
                    Err(err) => {
                        self.release(Value::Object(clone));
                        return Err(err);
                    }
                }
            }
        }
        trace!("cloned #{} into #{}", obj, clone);
        Ok(clone)
    }

    fn copy_fields(&mut self, from: ObjectId, to: ObjectId) -> Result<()> {
        let values: Vec<Value> = self
            .heap
            .get(from)?
            .slots
            .iter()
            .map(|s| s.value.clone())
            .collect();
        for (i, v) in values.iter().enumerate() {
            let v = self.dup(v);
            let old = std::mem::replace(&mut self.heap.get_mut(to)?.slots[i].value, v);
            self.release(old);
        }

        let entries: Vec<_> = match self.heap.dyn_props(from) {
            Some(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            None => return Ok(()),
        };
        for (key, v) in entries {
            let v = self.dup(&v);
            let map = self.heap.reserve_dyn_props_mut(to, &mut self.iters)?;
            if let Some(old) = map.set(key, v) {
                self.release(old);
            }
        }
        if self.heap.dyn_props(to).is_none() {
            // An empty source map still yields a map on the clone.
            self.heap.reserve_dyn_props_mut(to, &mut self.iters)?;
        }
        Ok(())
    }

    // ========================================================================
    // Containers
    // ========================================================================

    /// Separates shared array storage so `array` can be written in place.
    ///
    /// Object references in the copy are counted and strong iterators move
    /// from the old storage to the new one. Returns true when a copy was made.
    pub fn separate_array(&mut self, array: &mut Array) -> bool {
        let heap = &mut self.heap;
        let moved = array.separate_with(|v| {
            if let Value::Object(o) = v {
                if let Ok(data) = heap.get_mut(*o) {
                    data.refcount += 1;
                }
            }
            v.clone()
        });
        match moved {
            Some((old, new)) => {
                self.iters.retarget(old, new);
                true
            }
            None => false,
        }
    }

    /// Writes `array[key] = value`, taking ownership of `value`.
    ///
    /// Shared storage is separated first, so strong iterators follow the
    /// write. A replaced value is released and the entry keeps its position.
    pub fn array_set(&mut self, array: &mut Array, key: impl Into<ArrayKey>, value: Value) {
        self.separate_array(array);
        if let Some(old) = array.set(key, value) {
            self.release(old);
        }
    }

    /// Appends `value` under the next free integer key.
    pub fn array_push(&mut self, array: &mut Array, value: Value) {
        self.separate_array(array);
        array.push(value);
    }

    /// Removes `array[key]`. Returns false when the key was absent.
    ///
    /// Cursors past the removed entry step back by one so they resume at the
    /// entry they would have yielded next.
    pub fn array_remove(&mut self, array: &mut Array, key: &ArrayKey) -> bool {
        if array.get(key).is_none() {
            return false;
        }
        self.separate_array(array);
        let container = array.id();
        match array.remove_full(key) {
            Some((pos, old)) => {
                self.iters.entry_removed(container, pos);
                self.release(old);
                true
            }
            None => false,
        }
    }
}
