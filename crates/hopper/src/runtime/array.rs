//! The container collaborator: an insertion-ordered, copy-on-write map.
//!
//! [`Array`] shares its storage through `Rc`. Cloning an array shares the
//! storage; the first writer holding a shared handle separates it into a
//! private copy with a fresh [`ContainerId`]. Strong iterators are bound to a
//! `ContainerId`, so whoever separates or frees storage that cursors may be
//! bound to must notify the iterator table (see
//! [`Context::separate_array`](crate::Context::separate_array) and
//! [`Context::release`](crate::Context::release)).
//!
//! In-place mutators are crate-private. Outside the crate, arrays are built
//! with [`Array::list`] or `collect()` and written through
//! [`Context::array_set`](crate::Context::array_set) and friends, which
//! separate shared storage and keep strong iterators in step.

use crate::runtime::value::{Str, Value};
use fxhash::FxBuildHasher;
use indexmap::{Equivalent, IndexMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

type Map = IndexMap<ArrayKey, Value, FxBuildHasher>;

static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one container storage.
///
/// Copy-on-write separation produces storage with a new id; the old id stays
/// with the handles that still share the old storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl ContainerId {
    fn next() -> Self {
        ContainerId(NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

// ============================================================================
// Keys
// ============================================================================

/// An array key: integer or string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArrayKey {
    /// Integer key.
    Int(i64),
    /// String key.
    Str(Str),
}

impl ArrayKey {
    /// Converts a string key the way array writes do: canonical decimal
    /// integers become integer keys.
    ///
    /// ```rust
    /// use hopper::runtime::array::ArrayKey;
    ///
    /// assert_eq!(ArrayKey::normalized("42"), ArrayKey::Int(42));
    /// assert_eq!(ArrayKey::normalized("042"), ArrayKey::from("042"));
    /// ```
    #[must_use]
    pub fn normalized(s: &str) -> Self {
        match canonical_int(s) {
            Some(i) => ArrayKey::Int(i),
            None => ArrayKey::Str(Rc::from(s)),
        }
    }

    /// Returns the string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArrayKey::Str(s) => Some(s),
            ArrayKey::Int(_) => None,
        }
    }

    /// Renders the key as a property name.
    #[must_use]
    pub fn to_name(&self) -> Str {
        match self {
            ArrayKey::Str(s) => s.clone(),
            ArrayKey::Int(i) => Rc::from(i.to_string()),
        }
    }
}

// Hashed by hand so `StrLookup` can hash a borrowed `&str` identically.
impl Hash for ArrayKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ArrayKey::Int(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            ArrayKey::Str(s) => {
                1u8.hash(state);
                (**s).hash(state);
            }
        }
    }
}

impl From<i64> for ArrayKey {
    fn from(i: i64) -> Self {
        ArrayKey::Int(i)
    }
}

impl From<i32> for ArrayKey {
    fn from(i: i32) -> Self {
        ArrayKey::Int(i64::from(i))
    }
}

impl From<&str> for ArrayKey {
    fn from(s: &str) -> Self {
        ArrayKey::Str(Rc::from(s))
    }
}

impl From<Str> for ArrayKey {
    fn from(s: Str) -> Self {
        ArrayKey::Str(s)
    }
}

impl fmt::Display for ArrayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayKey::Int(i) => write!(f, "{i}"),
            ArrayKey::Str(s) => f.write_str(s),
        }
    }
}

/// Borrowed string lookup key.
struct StrLookup<'a>(&'a str);

impl Hash for StrLookup<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        1u8.hash(state);
        self.0.hash(state);
    }
}

impl Equivalent<ArrayKey> for StrLookup<'_> {
    fn equivalent(&self, key: &ArrayKey) -> bool {
        match key {
            ArrayKey::Str(s) => &**s == self.0,
            ArrayKey::Int(_) => false,
        }
    }
}

fn canonical_int(s: &str) -> Option<i64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    if s == "-0" {
        return None;
    }
    s.parse().ok()
}

// ============================================================================
// Storage
// ============================================================================

struct Storage {
    id: ContainerId,
    map: Map,
    next_free: i64,
}

impl Storage {
    fn with_map(map: Map, next_free: i64) -> Self {
        Storage {
            id: ContainerId::next(),
            map,
            next_free,
        }
    }
}

// A copy is new storage, so it gets a new identity.
impl Clone for Storage {
    fn clone(&self) -> Self {
        Storage::with_map(self.map.clone(), self.next_free)
    }
}

/// Insertion-ordered copy-on-write map from [`ArrayKey`] to [`Value`].
///
/// # Example
///
/// ```rust
/// use hopper::runtime::array::{Array, ArrayKey};
/// use hopper::{Context, Value};
///
/// let mut ctx = Context::new();
/// let mut a: Array = [(ArrayKey::from("name"), Value::from("hopper"))]
///     .into_iter()
///     .collect();
/// ctx.array_push(&mut a, Value::Int(1));
///
/// let shared = a.clone();
/// assert!(a.is_shared());
/// assert_eq!(a.id(), shared.id());
///
/// ctx.array_push(&mut a, Value::Int(2));
/// assert_ne!(a.id(), shared.id());
/// assert_eq!(shared.len(), 2);
/// assert_eq!(a.len(), 3);
/// ```
#[derive(Clone)]
pub struct Array {
    inner: Rc<Storage>,
}

impl Default for Array {
    fn default() -> Self {
        Array::new()
    }
}

impl Array {
    /// Creates an empty array.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty array with room for `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Array {
            inner: Rc::new(Storage::with_map(
                Map::with_capacity_and_hasher(capacity, FxBuildHasher::default()),
                0,
            )),
        }
    }

    /// Creates a list keyed `0..n`.
    pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
        let mut array = Array::new();
        for v in values {
            array.push(v);
        }
        array
    }

    /// Identity of the current storage.
    #[must_use]
    pub fn id(&self) -> ContainerId {
        self.inner.id
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    /// Returns true when there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }

    /// Returns true when another handle shares this storage.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        Rc::strong_count(&self.inner) > 1
    }

    /// Returns true when both handles share storage.
    #[must_use]
    pub fn ptr_eq(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Looks up a key.
    #[must_use]
    pub fn get(&self, key: &ArrayKey) -> Option<&Value> {
        self.inner.map.get(key)
    }

    /// Looks up a string key without allocating.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.inner.map.get(&StrLookup(key))
    }

    /// Looks up an integer key.
    #[must_use]
    pub fn get_int(&self, key: i64) -> Option<&Value> {
        self.inner.map.get(&ArrayKey::Int(key))
    }

    /// Returns true when the string key is present.
    #[must_use]
    pub fn contains_str(&self, key: &str) -> bool {
        self.inner.map.contains_key(&StrLookup(key))
    }

    /// Cursor access by position.
    #[must_use]
    pub fn get_index(&self, pos: usize) -> Option<(&ArrayKey, &Value)> {
        self.inner.map.get_index(pos)
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&ArrayKey, &Value)> {
        self.inner.map.iter()
    }

    /// Iterates values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.inner.map.values()
    }

    fn storage_mut(&mut self) -> &mut Storage {
        Rc::make_mut(&mut self.inner)
    }

    /// Inserts or replaces an entry and returns the previous value.
    ///
    /// Replacing keeps the entry's position.
    pub(crate) fn set(&mut self, key: impl Into<ArrayKey>, value: Value) -> Option<Value> {
        let key = key.into();
        let storage = self.storage_mut();
        if let ArrayKey::Int(i) = key {
            if i >= storage.next_free {
                storage.next_free = i.saturating_add(1);
            }
        }
        storage.map.insert(key, value)
    }

    /// Appends under the next free integer key.
    pub(crate) fn push(&mut self, value: Value) {
        let key = self.inner.next_free;
        self.set(key, value);
    }

    /// Mutable access to an existing string-keyed entry.
    pub(crate) fn get_str_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.storage_mut().map.get_mut(&StrLookup(key))
    }

    /// Removes an entry, preserving the order of the rest.
    ///
    /// Returns the position the entry held and its value. Later entries move
    /// down by one; cursors on this storage must be told.
    pub(crate) fn remove_full(&mut self, key: &ArrayKey) -> Option<(usize, Value)> {
        if !self.inner.map.contains_key(key) {
            return None;
        }
        let (pos, _, v) = self.storage_mut().map.shift_remove_full(key)?;
        Some((pos, v))
    }

    /// String-keyed [`remove_full`](Self::remove_full) without allocating.
    pub(crate) fn remove_str_full(&mut self, key: &str) -> Option<(usize, Value)> {
        if !self.contains_str(key) {
            return None;
        }
        let (pos, _, v) = self.storage_mut().map.shift_remove_full(&StrLookup(key))?;
        Some((pos, v))
    }

    /// Removes a string-keyed entry, preserving the order of the rest.
    pub(crate) fn remove_str(&mut self, key: &str) -> Option<Value> {
        self.remove_str_full(key).map(|(_, v)| v)
    }

    /// Copies the storage eagerly, recursing into nested arrays.
    ///
    /// Used for class defaults flagged for deep initialization, which never
    /// hold objects.
    #[must_use]
    pub fn deep_copy(&self) -> Array {
        let map = self
            .inner
            .map
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::Array(nested) => Value::Array(nested.deep_copy()),
                    other => other.clone(),
                };
                (k.clone(), v)
            })
            .collect();
        Array {
            inner: Rc::new(Storage::with_map(map, self.inner.next_free)),
        }
    }

    /// Returns true when an object handle appears anywhere inside.
    #[must_use]
    pub fn contains_object(&self) -> bool {
        self.values().any(|v| match v {
            Value::Object(_) => true,
            Value::Array(nested) => nested.contains_object(),
            _ => false,
        })
    }

    /// Separates shared storage, copying each value through `dup`.
    ///
    /// Returns the old and new ids when a copy was made.
    pub(crate) fn separate_with(
        &mut self,
        mut dup: impl FnMut(&Value) -> Value,
    ) -> Option<(ContainerId, ContainerId)> {
        if !self.is_shared() {
            return None;
        }
        let old = self.id();
        let map: Map = self
            .inner
            .map
            .iter()
            .map(|(k, v)| (k.clone(), dup(v)))
            .collect();
        let next_free = self.inner.next_free;
        self.inner = Rc::new(Storage::with_map(map, next_free));
        Some((old, self.id()))
    }

    /// Takes the values out of uniquely owned storage.
    ///
    /// Returns the array back unchanged when the storage is shared.
    pub(crate) fn try_into_values(self) -> Result<(ContainerId, Vec<Value>), Array> {
        let id = self.id();
        match Rc::try_unwrap(self.inner) {
            Ok(storage) => Ok((id, storage.map.into_values().collect())),
            Err(inner) => Err(Array { inner }),
        }
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.inner.map.iter().eq(other.inner.map.iter())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl FromIterator<(ArrayKey, Value)> for Array {
    fn from_iter<I: IntoIterator<Item = (ArrayKey, Value)>>(iter: I) -> Self {
        let mut array = Array::new();
        for (k, v) in iter {
            array.set(k, v);
        }
        array
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_lookup_matches_owned_key() {
        let mut a = Array::new();
        a.set("alpha", Value::Int(1));
        a.set(7, Value::Int(2));

        assert_eq!(a.get_str("alpha"), Some(&Value::Int(1)));
        assert_eq!(a.get(&ArrayKey::from("alpha")), Some(&Value::Int(1)));
        assert_eq!(a.get_int(7), Some(&Value::Int(2)));
        assert_eq!(a.get_str("7"), None);
    }

    #[test]
    fn test_push_uses_next_free_key() {
        let mut a = Array::new();
        a.set(10, Value::Null);
        a.push(Value::Int(1));
        assert_eq!(a.get_index(1).map(|(k, _)| k.clone()), Some(ArrayKey::Int(11)));
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut a = Array::new();
        a.set("a", Value::Int(1));
        a.set("b", Value::Int(2));
        a.set("a", Value::Int(3));

        let keys: Vec<_> = a.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(a.get_str("a"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_copy_on_write_separation() {
        let mut a = Array::list([Value::Int(1), Value::Int(2)]);
        let b = a.clone();
        assert!(a.is_shared());

        let old = a.id();
        a.set(0, Value::Int(9));

        assert_eq!(b.id(), old);
        assert_ne!(a.id(), old);
        assert_eq!(b.get_int(0), Some(&Value::Int(1)));
        assert_eq!(a.get_int(0), Some(&Value::Int(9)));
    }

    #[test]
    fn test_separate_with_reports_ids() {
        let mut a = Array::list([Value::Int(1)]);
        assert_eq!(a.separate_with(Value::clone), None);

        let b = a.clone();
        let (old, new) = a.separate_with(Value::clone).unwrap();
        assert_eq!(old, b.id());
        assert_eq!(new, a.id());
        assert!(!a.is_shared());
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let inner = Array::list([Value::Int(1)]);
        let mut outer = Array::new();
        outer.set("inner", Value::Array(inner.clone()));

        let copy = outer.deep_copy();
        assert_ne!(copy.id(), outer.id());
        let copied_inner = copy.get_str("inner").and_then(Value::as_array).unwrap();
        assert!(!copied_inner.ptr_eq(&inner));
        assert_eq!(copied_inner, &inner);
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut a = Array::new();
        a.set("x", Value::Int(1));
        a.set("y", Value::Int(2));
        a.set("z", Value::Int(3));

        assert_eq!(a.remove_full(&ArrayKey::from("x")), Some((0, Value::Int(1))));
        a.set("x", Value::Int(1));
        assert_eq!(a.remove_str("y"), Some(Value::Int(2)));
        assert_eq!(a.remove_str("missing"), None);
        let keys: Vec<_> = a.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["x", "z"]);
    }

    #[test]
    fn test_normalized_keys() {
        assert_eq!(ArrayKey::normalized("-3"), ArrayKey::Int(-3));
        assert_eq!(ArrayKey::normalized("-0"), ArrayKey::from("-0"));
        assert_eq!(ArrayKey::normalized("1.5"), ArrayKey::from("1.5"));
        assert_eq!(ArrayKey::normalized(""), ArrayKey::from(""));
    }

    #[test]
    fn test_try_into_values_requires_unique() {
        let a = Array::list([Value::Int(1)]);
        let b = a.clone();
        let a = a.try_into_values().unwrap_err();
        drop(b);
        let (_, values) = a.try_into_values().unwrap();
        assert_eq!(values, vec![Value::Int(1)]);
    }
}
