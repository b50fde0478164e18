//! Object heap and dynamic property side table.
//!
//! The heap owns every live [`ObjectData`] and hands out [`ObjectId`]s from a
//! `max_id` counter. When an object holding the current maximum dies the
//! counter steps back by one, so a churn of short-lived objects keeps
//! reusing the same id.
//!
//! Dynamic property maps are kept in a side table keyed by object id. An
//! entry exists exactly when the object's `HAS_DYN_PROPS` bit is set.

use crate::error::{Error, Result};
use crate::runtime::array::Array;
use crate::runtime::class::ClassId;
use crate::runtime::iterator::StrongIterTable;
use crate::runtime::object::{LifecycleState, ObjectAttrs, ObjectData, ObjectId, TypedSlot};
use crate::runtime::value::Value;
use fxhash::FxHashMap;

/// Storage for all objects of one context.
#[derive(Debug, Default)]
pub struct Heap {
    objects: FxHashMap<ObjectId, ObjectData>,
    dyn_props: FxHashMap<ObjectId, Array>,
    max_id: u32,
}

impl Heap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true when no object is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Highest id handed out and not yet reclaimed.
    #[must_use]
    pub fn max_id(&self) -> u32 {
        self.max_id
    }

    /// Returns true when `id` names a live object.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Looks up an object.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidObject`] if `id` is not live.
    pub fn get(&self, id: ObjectId) -> Result<&ObjectData> {
        self.objects
            .get(&id)
            .ok_or(Error::InvalidObject { id: id.get() })
    }

    /// Looks up an object for mutation.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidObject`] if `id` is not live.
    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut ObjectData> {
        self.objects
            .get_mut(&id)
            .ok_or(Error::InvalidObject { id: id.get() })
    }

    pub(crate) fn allocate(
        &mut self,
        class: ClassId,
        slots: Box<[TypedSlot]>,
        native_tail: usize,
    ) -> Result<ObjectId> {
        let id = self
            .max_id
            .checked_add(1)
            .and_then(ObjectId::from_raw)
            .ok_or_else(|| Error::Fatal("object id space exhausted".to_string()))?;
        self.max_id = id.get();
        self.objects
            .insert(id, ObjectData::new(id, class, slots, native_tail));
        Ok(id)
    }

    /// Removes an object, reclaiming its id when it is the current maximum.
    ///
    /// Returns the storage (marked [`LifecycleState::Dead`]) and its dynamic
    /// property map, if any. Releasing their contents is the caller's job.
    pub(crate) fn remove(&mut self, id: ObjectId) -> Option<(ObjectData, Option<Array>)> {
        let mut data = self.objects.remove(&id)?;
        data.state = LifecycleState::Dead;
        if id.get() == self.max_id {
            self.max_id -= 1;
        }
        let dyn_props = if data.has_dyn_props() {
            data.attrs.remove(ObjectAttrs::HAS_DYN_PROPS);
            self.dyn_props.remove(&id)
        } else {
            None
        };
        Some((data, dyn_props))
    }

    /// The dynamic property map, if one exists.
    #[must_use]
    pub fn dyn_props(&self, id: ObjectId) -> Option<&Array> {
        let data = self.objects.get(&id)?;
        if !data.has_dyn_props() {
            return None;
        }
        self.dyn_props.get(&id)
    }

    /// Mutable access to the dynamic property map, creating it on first use.
    ///
    /// Shared storage is separated first: object references in the copy are
    /// counted and strong iterators on the old storage move to the copy.
    pub(crate) fn reserve_dyn_props_mut(
        &mut self,
        id: ObjectId,
        iters: &mut StrongIterTable,
    ) -> Result<&mut Array> {
        let Heap {
            objects, dyn_props, ..
        } = self;
        let data = objects
            .get_mut(&id)
            .ok_or(Error::InvalidObject { id: id.get() })?;
        data.attrs.insert(ObjectAttrs::HAS_DYN_PROPS);
        let map = dyn_props.entry(id).or_default();
        let moved = map.separate_with(|v| {
            if let Value::Object(o) = v {
                if let Some(held) = objects.get_mut(o) {
                    held.refcount += 1;
                }
            }
            v.clone()
        });
        if let Some((old, new)) = moved {
            iters.retarget(old, new);
        }
        Ok(map)
    }

    /// Installs a dynamic property map, returning the one it replaces.
    pub(crate) fn replace_dyn_props(&mut self, id: ObjectId, map: Array) -> Result<Option<Array>> {
        let data = self.get_mut(id)?;
        data.attrs.insert(ObjectAttrs::HAS_DYN_PROPS);
        Ok(self.dyn_props.insert(id, map))
    }

    /// Iterates live object ids.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.keys().copied()
    }
}
