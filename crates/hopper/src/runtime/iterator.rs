//! Strong iterator registry.
//!
//! A strong iterator is a by-reference cursor over a container that may be
//! relocated (copy-on-write separation) or freed while the cursor is live.
//! Every such cursor is registered here, and whoever relocates or frees a
//! container tells the table:
//!
//! - [`StrongIterTable::retarget`] rebinds cursors from the old storage to
//!   the new one, keeping their position.
//! - [`StrongIterTable::invalidate`] moves cursors to [`CursorState::Reset`];
//!   the next advance reports the end of the sequence.
//! - [`StrongIterTable::entry_removed`] keeps positions pointing at the same
//!   entries when an earlier entry is removed.
//!
//! Cursors over an object's dynamic properties also record the object and
//! are reset when it dies, even if its map outlives it through an exported
//! handle.
//!
//! The table keeps [`STRONG_ITER_INLINE_CAPACITY`] entries inline and spills
//! the rest into an overflow vector. Occupied inline slots always form a
//! prefix, so [`StrongIterTable::exists`] is a single check of the first
//! slot. Callers check it before traversing.

use crate::Context;
use crate::error::{Error, Result};
use crate::runtime::array::{Array, ArrayKey, ContainerId};
use crate::runtime::object::ObjectId;
use crate::runtime::value::Value;
use hopper_log::debug;

/// Number of entries held inline before spilling to the overflow vector.
pub const STRONG_ITER_INLINE_CAPACITY: usize = 7;

/// Handle of a registered cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorHandle(u32);

/// State of a registered cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Iterating `container`; `pos` is the next position to yield.
    Bound {
        /// Identity of the storage being iterated.
        container: ContainerId,
        /// Next position.
        pos: usize,
    },
    /// The container was freed. Terminal.
    Reset,
}

/// One registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrongIterEntry {
    /// Cursor handle.
    pub handle: CursorHandle,
    /// Cursor state.
    pub state: CursorState,
    /// Object whose dynamic properties the cursor walks, if any.
    pub owner: Option<ObjectId>,
}

/// Inline-plus-overflow table of live strong iterators.
#[derive(Debug, Default)]
pub struct StrongIterTable {
    fixed: [Option<StrongIterEntry>; STRONG_ITER_INLINE_CAPACITY],
    overflow: Vec<StrongIterEntry>,
    next_handle: u32,
}

impl StrongIterTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when any cursor is registered.
    #[inline]
    #[must_use]
    pub fn exists(&self) -> bool {
        self.fixed[0].is_some()
    }

    /// Number of registered cursors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fixed.iter().flatten().count() + self.overflow.len()
    }

    /// Returns true when no cursor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.exists()
    }

    /// Number of entries in the overflow vector.
    #[must_use]
    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    /// Registers a cursor at the start of `container`.
    pub fn register(&mut self, container: ContainerId) -> CursorHandle {
        self.insert(container, None)
    }

    /// Registers a cursor over the dynamic property map of `owner`.
    pub fn register_owned(&mut self, container: ContainerId, owner: ObjectId) -> CursorHandle {
        self.insert(container, Some(owner))
    }

    fn insert(&mut self, container: ContainerId, owner: Option<ObjectId>) -> CursorHandle {
        self.next_handle = self.next_handle.wrapping_add(1);
        let entry = StrongIterEntry {
            handle: CursorHandle(self.next_handle),
            state: CursorState::Bound { container, pos: 0 },
            owner,
        };
        match self.fixed.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = Some(entry),
            None => self.overflow.push(entry),
        }
        entry.handle
    }

    /// Unregisters a cursor. Returns false if it was not registered.
    pub fn remove(&mut self, handle: CursorHandle) -> bool {
        let inline = self
            .fixed
            .iter()
            .position(|slot| slot.is_some_and(|e| e.handle == handle));
        if let Some(i) = inline {
            self.fixed[i] = None;
            self.fixed[i..].rotate_left(1);
            if !self.overflow.is_empty() {
                let spilled = self.overflow.remove(0);
                if let Some(slot) = self.fixed.iter_mut().find(|slot| slot.is_none()) {
                    *slot = Some(spilled);
                }
            }
            return true;
        }
        match self.overflow.iter().position(|e| e.handle == handle) {
            Some(i) => {
                self.overflow.remove(i);
                true
            }
            None => false,
        }
    }

    /// Current state of a cursor.
    #[must_use]
    pub fn state(&self, handle: CursorHandle) -> Option<CursorState> {
        self.fixed
            .iter()
            .flatten()
            .chain(self.overflow.iter())
            .find(|e| e.handle == handle)
            .map(|e| e.state)
    }

    /// Applies `f` to every entry, inline slots first.
    ///
    /// Callers check [`exists`](Self::exists) first.
    pub fn for_each_entry(&mut self, mut f: impl FnMut(&mut StrongIterEntry)) {
        debug_assert!(self.exists(), "traversal of an empty strong iterator table");
        for entry in self.fixed.iter_mut().flatten() {
            f(entry);
        }
        if !self.overflow.is_empty() {
            for entry in &mut self.overflow {
                f(entry);
            }
        }
    }

    /// Rebinds every cursor on `old` to `new`. Returns how many moved.
    pub fn retarget(&mut self, old: ContainerId, new: ContainerId) -> usize {
        if !self.exists() {
            return 0;
        }
        let mut moved = 0;
        self.for_each_entry(|entry| {
            if let CursorState::Bound { container, .. } = &mut entry.state {
                if *container == old {
                    *container = new;
                    moved += 1;
                }
            }
        });
        if moved > 0 {
            debug!("retargeted {} strong iterator(s) from {} to {}", moved, old, new);
        }
        moved
    }

    /// Resets every cursor on `container`. Returns how many were reset.
    pub fn invalidate(&mut self, container: ContainerId) -> usize {
        if !self.exists() {
            return 0;
        }
        let mut reset = 0;
        self.for_each_entry(|entry| {
            if matches!(entry.state, CursorState::Bound { container: c, .. } if c == container) {
                entry.state = CursorState::Reset;
                reset += 1;
            }
        });
        if reset > 0 {
            debug!("invalidated {} strong iterator(s) on {}", reset, container);
        }
        reset
    }

    /// Shifts cursors on `container` past a removed entry at `index`.
    ///
    /// A cursor that already yielded the entry keeps its place in the
    /// remaining sequence. Returns how many cursors moved.
    pub fn entry_removed(&mut self, container: ContainerId, index: usize) -> usize {
        if !self.exists() {
            return 0;
        }
        let mut shifted = 0;
        self.for_each_entry(|entry| {
            if let CursorState::Bound { container: c, pos } = &mut entry.state {
                if *c == container && *pos > index {
                    *pos -= 1;
                    shifted += 1;
                }
            }
        });
        shifted
    }

    /// Resets every cursor walking the dynamic properties of `owner`.
    pub fn invalidate_owner(&mut self, owner: ObjectId) -> usize {
        if !self.exists() {
            return 0;
        }
        let mut reset = 0;
        self.for_each_entry(|entry| {
            if entry.owner == Some(owner) && entry.state != CursorState::Reset {
                entry.state = CursorState::Reset;
                reset += 1;
            }
        });
        if reset > 0 {
            debug!("reset {} dynamic property cursor(s) of dead #{}", reset, owner);
        }
        reset
    }

    fn entry_mut(&mut self, handle: CursorHandle) -> Option<&mut StrongIterEntry> {
        self.fixed
            .iter_mut()
            .flatten()
            .chain(self.overflow.iter_mut())
            .find(|e| e.handle == handle)
    }

    /// Yields the next entry of `array` for a cursor.
    ///
    /// Returns `Ok(None)` at the end of the sequence or when the cursor was
    /// reset. The returned value is an uncounted handle copy.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCursor`] if the handle is not registered
    /// - [`Error::CursorContainerMismatch`] if the cursor is bound to other storage
    pub fn advance(&mut self, handle: CursorHandle, array: &Array) -> Result<Option<(ArrayKey, Value)>> {
        let entry = self.entry_mut(handle).ok_or(Error::InvalidCursor)?;
        match &mut entry.state {
            CursorState::Reset => Ok(None),
            CursorState::Bound { container, .. } if *container != array.id() => {
                Err(Error::CursorContainerMismatch)
            }
            CursorState::Bound { pos, .. } => match array.get_index(*pos) {
                Some((k, v)) => {
                    *pos += 1;
                    Ok(Some((k.clone(), v.clone())))
                }
                None => Ok(None),
            },
        }
    }
}

// ============================================================================
// Context operations
// ============================================================================

impl Context {
    /// Starts a by-reference iteration over the dynamic properties of `obj`.
    ///
    /// Returns `None` when the object has no dynamic map. The cursor follows
    /// the map when a write relocates it and is reset when the map is freed.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidObject`] if `obj` is not live.
    pub fn begin_dyn_props_iteration(&mut self, obj: ObjectId) -> Result<Option<CursorHandle>> {
        self.heap.get(obj)?;
        Ok(self
            .heap
            .dyn_props(obj)
            .map(|map| map.id())
            .map(|container| self.iters.register_owned(container, obj)))
    }

    /// Advances a dynamic-property cursor. The value is a counted reference.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCursor`] if the handle is not registered
    /// - [`Error::CursorContainerMismatch`] if the cursor belongs to another map
    pub fn next_dyn_prop(
        &mut self,
        obj: ObjectId,
        handle: CursorHandle,
    ) -> Result<Option<(ArrayKey, Value)>> {
        match self.iters.state(handle) {
            None => return Err(Error::InvalidCursor),
            Some(CursorState::Reset) => return Ok(None),
            Some(CursorState::Bound { .. }) => {}
        }
        let Some(map) = self.heap.dyn_props(obj) else {
            return Err(Error::CursorContainerMismatch);
        };
        match self.iters.advance(handle, map)? {
            Some((key, value)) => Ok(Some((key, self.dup(&value)))),
            None => Ok(None),
        }
    }

    /// Unregisters a cursor. Returns false if it was not registered.
    pub fn end_iteration(&mut self, handle: CursorHandle) -> bool {
        self.iters.remove(handle)
    }

    /// Shares the dynamic map of `obj` copy-on-write.
    ///
    /// The returned handle is owned by the caller. A later write to the
    /// object's properties separates the map and moves the object's cursors
    /// to the new storage.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidObject`] if `obj` is not live.
    pub fn export_dyn_props(&mut self, obj: ObjectId) -> Result<Option<Array>> {
        self.heap.get(obj)?;
        Ok(self.heap.dyn_props(obj).cloned())
    }

    /// Starts a by-reference iteration over `array`'s current storage.
    pub fn begin_strong_iteration(&mut self, array: &Array) -> CursorHandle {
        self.iters.register(array.id())
    }

    /// Advances a cursor over `array`. The value is a counted reference.
    ///
    /// # Errors
    ///
    /// Same as [`StrongIterTable::advance`].
    pub fn next_strong(
        &mut self,
        handle: CursorHandle,
        array: &Array,
    ) -> Result<Option<(ArrayKey, Value)>> {
        match self.iters.advance(handle, array)? {
            Some((key, value)) => Ok(Some((key, self.dup(&value)))),
            None => Ok(None),
        }
    }
}
