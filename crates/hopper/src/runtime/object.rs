//! Object instances.
//!
//! An [`ObjectData`] holds everything one instance owns:
//!
//! - identity ([`ObjectId`])
//! - a non-owning [`ClassId`] naming its shared class metadata
//! - a fixed array of declared-property slots laid out by the class
//! - attribute bits and a non-atomic reference count
//! - an explicit [`LifecycleState`]
//!
//! # Lifecycle
//!
//! ```text
//! Live --(refcount hits 0 / destruct)--> Finalizing --> Live (finalizer bit set)
//!                                                  \--> Dead (storage reclaimed)
//! ```
//!
//! The finalizer bit ([`ObjectAttrs::NO_DESTRUCT`]) is set before the
//! finalizer runs, so a second trip through destruction never calls it
//! again. Instances are stored in the context's heap and reached through
//! their id; the dynamic property map lives in a heap side table.

use crate::runtime::class::ClassId;
use crate::runtime::value::Value;
use std::fmt;
use std::num::NonZeroU32;

/// Process-unique object identity.
///
/// An `ObjectId` is a plain handle. It does not keep the object alive;
/// ownership is tracked by the object's reference count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(NonZeroU32);

impl ObjectId {
    pub(crate) fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(ObjectId)
    }

    /// The numeric id.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-object attribute bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectAttrs(u8);

impl ObjectAttrs {
    /// A dynamic property map exists for this object.
    pub const HAS_DYN_PROPS: Self = Self(1 << 0);
    /// The finalizer has run or must never run.
    pub const NO_DESTRUCT: Self = Self(1 << 1);
    /// The object carries a native tail.
    pub const NATIVE: Self = Self(1 << 2);

    /// Returns true when every bit of `other` is set.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

/// Where an object is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Reachable and usable.
    Live,
    /// Its finalizer is running.
    Finalizing,
    /// Storage has been reclaimed. Only observed on the value handed back
    /// from heap removal.
    Dead,
}

/// A declared-property slot.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedSlot {
    /// Current value; `Value::Uninit` once unset.
    pub value: Value,
    /// Initialized by deep copy rather than sharing the class default.
    pub deep_init: bool,
}

/// Storage owned by one object.
#[derive(Debug)]
pub struct ObjectData {
    pub(crate) id: ObjectId,
    pub(crate) class: ClassId,
    pub(crate) attrs: ObjectAttrs,
    pub(crate) refcount: u32,
    pub(crate) state: LifecycleState,
    pub(crate) slots: Box<[TypedSlot]>,
    pub(crate) native: Box<[u8]>,
}

impl ObjectData {
    pub(crate) fn new(id: ObjectId, class: ClassId, slots: Box<[TypedSlot]>, native_tail: usize) -> Self {
        let mut attrs = ObjectAttrs::default();
        if native_tail > 0 {
            attrs.insert(ObjectAttrs::NATIVE);
        }
        ObjectData {
            id,
            class,
            attrs,
            refcount: 0,
            state: LifecycleState::Live,
            slots,
            native: vec![0; native_tail].into_boxed_slice(),
        }
    }

    /// Identity.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Class handle.
    #[must_use]
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Attribute bits.
    #[must_use]
    pub fn attrs(&self) -> ObjectAttrs {
        self.attrs
    }

    /// Current reference count.
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Declared-property slots.
    #[must_use]
    pub fn slots(&self) -> &[TypedSlot] {
        &self.slots
    }

    /// Native tail bytes.
    #[must_use]
    pub fn native(&self) -> &[u8] {
        &self.native
    }

    /// Mutable native tail bytes.
    pub fn native_mut(&mut self) -> &mut [u8] {
        &mut self.native
    }

    /// Returns true when a dynamic property map exists.
    #[must_use]
    pub fn has_dyn_props(&self) -> bool {
        self.attrs.contains(ObjectAttrs::HAS_DYN_PROPS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_rejects_zero() {
        assert!(ObjectId::from_raw(0).is_none());
        assert_eq!(ObjectId::from_raw(7).map(ObjectId::get), Some(7));
    }

    #[test]
    fn test_attrs() {
        let mut attrs = ObjectAttrs::default();
        attrs.insert(ObjectAttrs::HAS_DYN_PROPS);
        attrs.insert(ObjectAttrs::NO_DESTRUCT);
        assert!(attrs.contains(ObjectAttrs::HAS_DYN_PROPS));
        attrs.remove(ObjectAttrs::HAS_DYN_PROPS);
        assert!(!attrs.contains(ObjectAttrs::HAS_DYN_PROPS));
        assert!(attrs.contains(ObjectAttrs::NO_DESTRUCT));
    }

    #[test]
    fn test_native_tail_is_zeroed() {
        let id = ObjectId::from_raw(1).unwrap();
        let mut table = crate::runtime::class::ClassTable::default();
        let class = table.define_builtin("Buffer", crate::runtime::class::ClassKind::Normal);
        let obj = ObjectData::new(id, class, Box::new([]), 16);
        assert_eq!(obj.native(), &[0u8; 16]);
        assert!(obj.attrs().contains(ObjectAttrs::NATIVE));
        assert_eq!(obj.state(), LifecycleState::Live);
        assert_eq!(obj.refcount(), 0);
    }
}
