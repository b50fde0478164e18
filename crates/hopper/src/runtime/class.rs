//! Class metadata, layout and registration.
//!
//! Classes are registered once through a [`ClassBuilder`] and never change
//! afterwards. Registration computes everything instances and accessors need
//! up front:
//!
//! - The declared-property layout. Parent slots come first at the same
//!   indices, then the class's own properties, then properties imported from
//!   traits. A redeclared non-private property reuses the inherited slot; a
//!   property whose inherited namesake is private gets a new slot.
//! - The flattened, case-insensitive method table.
//! - The [`Capabilities`] bitset, so accessors never probe the method table
//!   to find out whether a hook exists.
//!
//! The [`ClassTable`] is append-only. A [`ClassId`] is a plain index into it
//! and never owns anything.

use crate::Context;
use crate::error::{Error, Result};
use crate::runtime::mangle::mangle;
use crate::runtime::object::ObjectId;
use crate::runtime::value::{Str, Value};
use fxhash::{FxHashMap, FxHashSet};
use std::borrow::Cow;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::rc::Rc;

/// Method implementation: `(context, receiver, args) -> return value`.
///
/// Arguments are borrowed: a method that keeps an object argument must take
/// its own reference with [`Context::dup`].
pub type MethodFn = Rc<dyn Fn(&mut Context, ObjectId, &[Value]) -> Result<Value>>;

/// Native clone implementation for natively-implemented classes.
pub type NativeCloneFn = Rc<dyn Fn(&mut Context, ObjectId) -> Result<ObjectId>>;

/// Name of the built-in empty class.
pub const STD_CLASS: &str = "stdClass";
/// Name of the custom-serialization interface.
pub const SERIALIZABLE_INTERFACE: &str = "Serializable";
/// Placeholder class for native objects that cannot be serialized.
pub const UNSERIALIZABLE_CLASS: &str = "__PHP_Unserializable_Class";
/// Class of objects whose original class was unavailable on unserialize.
pub const INCOMPLETE_CLASS: &str = "__PHP_Incomplete_Class";

// ============================================================================
// Handles and small enums
// ============================================================================

/// Non-owning handle to registered class metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Declared access level of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Accessible from anywhere.
    Public,
    /// Accessible from the declaring class and its relatives.
    Protected,
    /// Accessible from the declaring class only.
    Private,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        })
    }
}

/// What kind of class a registration describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClassKind {
    /// An instantiable class.
    #[default]
    Normal,
    /// A class that must be extended before instantiation.
    Abstract,
    /// An interface.
    Interface,
    /// A trait.
    Trait,
}

impl ClassKind {
    /// The phrase used when instantiation is refused, or `None` if allowed.
    #[must_use]
    pub fn non_instantiable_label(self) -> Option<&'static str> {
        match self {
            ClassKind::Normal => None,
            ClassKind::Abstract => Some("abstract class"),
            ClassKind::Interface => Some("interface"),
            ClassKind::Trait => Some("trait"),
        }
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Per-class bitset computed once at registration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u16);

impl Capabilities {
    /// Declares `__get`.
    pub const USE_GET: Self = Self(1 << 0);
    /// Declares `__set`.
    pub const USE_SET: Self = Self(1 << 1);
    /// Declares `__isset`.
    pub const USE_ISSET: Self = Self(1 << 2);
    /// Declares `__unset`.
    pub const USE_UNSET: Self = Self(1 << 3);
    /// Declares `__clone` or has a native clone.
    pub const HAS_CLONE: Self = Self(1 << 4);
    /// Declares `__sleep`.
    pub const HAS_SLEEP: Self = Self(1 << 5);
    /// Declares `__wakeup`.
    pub const HAS_WAKEUP: Self = Self(1 << 6);
    /// Declares `__destruct`.
    pub const HAS_DTOR: Self = Self(1 << 7);
    /// Declares the per-instance initializer `__init__`.
    pub const HAS_INIT: Self = Self(1 << 8);
    /// Declares `__toString`.
    pub const HAS_TO_STRING: Self = Self(1 << 9);
    /// Declares `__toDebugDisplay`.
    pub const HAS_DEBUG_DISPLAY: Self = Self(1 << 10);
    /// Implements `Serializable`.
    pub const SERIALIZABLE: Self = Self(1 << 11);
    /// Natively implemented.
    pub const NATIVE: Self = Self(1 << 12);
    /// Natively implemented and able to round-trip through serialization.
    pub const NATIVE_SERIALIZABLE: Self = Self(1 << 13);

    const NAMES: [(Self, &'static str); 14] = [
        (Self::USE_GET, "USE_GET"),
        (Self::USE_SET, "USE_SET"),
        (Self::USE_ISSET, "USE_ISSET"),
        (Self::USE_UNSET, "USE_UNSET"),
        (Self::HAS_CLONE, "HAS_CLONE"),
        (Self::HAS_SLEEP, "HAS_SLEEP"),
        (Self::HAS_WAKEUP, "HAS_WAKEUP"),
        (Self::HAS_DTOR, "HAS_DTOR"),
        (Self::HAS_INIT, "HAS_INIT"),
        (Self::HAS_TO_STRING, "HAS_TO_STRING"),
        (Self::HAS_DEBUG_DISPLAY, "HAS_DEBUG_DISPLAY"),
        (Self::SERIALIZABLE, "SERIALIZABLE"),
        (Self::NATIVE, "NATIVE"),
        (Self::NATIVE_SERIALIZABLE, "NATIVE_SERIALIZABLE"),
    ];

    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns true when every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true when no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    fn hook_bit(method: &str) -> Option<Self> {
        Some(match method {
            "__get" => Self::USE_GET,
            "__set" => Self::USE_SET,
            "__isset" => Self::USE_ISSET,
            "__unset" => Self::USE_UNSET,
            "__clone" => Self::HAS_CLONE,
            "__sleep" => Self::HAS_SLEEP,
            "__wakeup" => Self::HAS_WAKEUP,
            "__destruct" => Self::HAS_DTOR,
            "__init__" => Self::HAS_INIT,
            "__tostring" => Self::HAS_TO_STRING,
            "__todebugdisplay" => Self::HAS_DEBUG_DISPLAY,
            _ => return None,
        })
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (bit, name) in Self::NAMES {
            if self.contains(bit) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

// ============================================================================
// Properties and methods
// ============================================================================

/// A property as written in a class body.
#[derive(Debug, Clone)]
pub struct PropertyDecl {
    name: Str,
    visibility: Visibility,
    default: Value,
}

impl PropertyDecl {
    /// Declares a property with a `null` default.
    pub fn new(name: &str, visibility: Visibility) -> Self {
        PropertyDecl {
            name: Rc::from(name),
            visibility,
            default: Value::Null,
        }
    }

    /// Declares a public property.
    pub fn public(name: &str) -> Self {
        Self::new(name, Visibility::Public)
    }

    /// Declares a protected property.
    pub fn protected(name: &str) -> Self {
        Self::new(name, Visibility::Protected)
    }

    /// Declares a private property.
    pub fn private(name: &str) -> Self {
        Self::new(name, Visibility::Private)
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }
}

/// A property slot as laid out in a registered class.
#[derive(Debug, Clone)]
pub struct DeclaredProperty {
    /// Bare name.
    pub name: Str,
    /// External (mangled) name.
    pub mangled: Str,
    /// Access level of the most-derived declaration.
    pub visibility: Visibility,
    /// Class the access check is made against.
    pub declaring: ClassId,
    /// Initial value for new instances.
    pub default: Value,
    /// The default must be copied, not shared, into each instance.
    pub deep_init: bool,
}

/// A resolved method.
#[derive(Clone)]
pub struct Method {
    name: Str,
    declaring: ClassId,
    body: MethodFn,
}

impl Method {
    /// Method name as declared.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class that provided this method.
    #[must_use]
    pub fn declaring(&self) -> ClassId {
        self.declaring
    }

    pub(crate) fn body(&self) -> MethodFn {
        Rc::clone(&self.body)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("declaring", &self.declaring)
            .finish_non_exhaustive()
    }
}

fn method_key(name: &str) -> Cow<'_, str> {
    if name.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(name.to_ascii_lowercase())
    } else {
        Cow::Borrowed(name)
    }
}

// ============================================================================
// Class
// ============================================================================

/// Immutable metadata of a registered class.
pub struct Class {
    id: ClassId,
    name: Str,
    kind: ClassKind,
    parent: Option<ClassId>,
    interfaces: Vec<ClassId>,
    traits: Vec<ClassId>,
    props: Vec<DeclaredProperty>,
    prop_index: FxHashMap<Str, usize>,
    own_props: Vec<usize>,
    own_private: FxHashMap<Str, usize>,
    methods: FxHashMap<Box<str>, Method>,
    caps: Capabilities,
    native_tail: usize,
    native_clone: Option<NativeCloneFn>,
}

impl Class {
    fn bare(id: ClassId, name: &str, kind: ClassKind) -> Self {
        Class {
            id,
            name: Rc::from(name),
            kind,
            parent: None,
            interfaces: Vec::new(),
            traits: Vec::new(),
            props: Vec::new(),
            prop_index: FxHashMap::default(),
            own_props: Vec::new(),
            own_private: FxHashMap::default(),
            methods: FxHashMap::default(),
            caps: Capabilities::empty(),
            native_tail: 0,
            native_clone: None,
        }
    }

    /// Handle of this class.
    #[must_use]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Class name as declared.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_str(&self) -> Str {
        Rc::clone(&self.name)
    }

    /// Kind of class.
    #[must_use]
    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    /// Direct parent class.
    #[must_use]
    pub fn parent(&self) -> Option<ClassId> {
        self.parent
    }

    /// All implemented interfaces, including inherited ones.
    #[must_use]
    pub fn interfaces(&self) -> &[ClassId] {
        &self.interfaces
    }

    /// Traits used directly by this class.
    #[must_use]
    pub fn traits(&self) -> &[ClassId] {
        &self.traits
    }

    /// Capability bits.
    #[must_use]
    pub fn caps(&self) -> Capabilities {
        self.caps
    }

    /// Returns true when every bit of `cap` is set.
    #[must_use]
    pub fn has(&self, cap: Capabilities) -> bool {
        self.caps.contains(cap)
    }

    /// Number of declared-property slots in every instance.
    #[must_use]
    pub fn num_props(&self) -> usize {
        self.props.len()
    }

    /// All declared-property slots in layout order.
    #[must_use]
    pub fn properties(&self) -> &[DeclaredProperty] {
        &self.props
    }

    /// Slot metadata.
    #[must_use]
    pub fn property(&self, slot: usize) -> Option<&DeclaredProperty> {
        self.props.get(slot)
    }

    /// Most-derived slot declared under `name`.
    #[must_use]
    pub fn lookup_prop(&self, name: &str) -> Option<usize> {
        self.prop_index.get(name).copied()
    }

    /// Slots declared or redeclared by this class, own declarations first,
    /// then trait imports.
    #[must_use]
    pub fn own_properties(&self) -> &[usize] {
        &self.own_props
    }

    /// Size of the native tail of each instance.
    #[must_use]
    pub fn native_tail(&self) -> usize {
        self.native_tail
    }

    pub(crate) fn native_clone(&self) -> Option<NativeCloneFn> {
        self.native_clone.clone()
    }

    /// Case-insensitive method lookup.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(&*method_key(name))
    }

    /// Resolves `key` for an access made from `ctx`.
    ///
    /// Returns the slot and whether it is accessible. A private property of
    /// a strict ancestor wins when the access is made from that ancestor.
    pub fn decl_prop_index(
        &self,
        table: &ClassTable,
        ctx: Option<ClassId>,
        key: &str,
    ) -> Option<(usize, bool)> {
        if let Some(ctx) = ctx {
            if ctx != self.id && table.derives_from(self.id, ctx) {
                if let Some(ancestor) = table.get(ctx) {
                    if let Some(&slot) = ancestor.own_private.get(key) {
                        return Some((slot, true));
                    }
                }
            }
        }

        let slot = self.lookup_prop(key)?;
        let prop = &self.props[slot];
        let accessible = match prop.visibility {
            Visibility::Public => true,
            Visibility::Protected => {
                ctx.is_some_and(|ctx| table.is_related(ctx, prop.declaring))
            }
            Visibility::Private => ctx == Some(prop.declaring),
        };
        Some((slot, accessible))
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("parent", &self.parent)
            .field("props", &self.props.len())
            .field("caps", &self.caps)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Class table
// ============================================================================

/// Append-only registry of class metadata.
#[derive(Default)]
pub struct ClassTable {
    classes: Vec<Rc<Class>>,
    by_name: FxHashMap<String, ClassId>,
}

impl ClassTable {
    /// Number of registered classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Metadata for a handle.
    #[must_use]
    pub fn get(&self, id: ClassId) -> Option<&Rc<Class>> {
        self.classes.get(id.index())
    }

    /// Case-insensitive lookup by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    /// Returns true when `class` is `ancestor` or inherits from it.
    #[must_use]
    pub fn derives_from(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.get(id).and_then(|c| c.parent);
        }
        false
    }

    /// Returns true when either class derives from the other.
    #[must_use]
    pub fn is_related(&self, a: ClassId, b: ClassId) -> bool {
        self.derives_from(a, b) || self.derives_from(b, a)
    }

    /// Returns true when `class` is `target`, a subclass of it, or implements it.
    #[must_use]
    pub fn instance_of(&self, class: ClassId, target: ClassId) -> bool {
        self.derives_from(class, target)
            || self
                .get(class)
                .is_some_and(|c| c.interfaces.contains(&target))
    }

    /// Iterates `class` and its ancestors, most-derived first.
    pub fn ancestry(&self, class: ClassId) -> impl Iterator<Item = &Rc<Class>> {
        std::iter::successors(self.get(class), |c| c.parent.and_then(|p| self.get(p)))
    }

    fn next_id(&self) -> ClassId {
        ClassId(self.classes.len() as u32)
    }

    fn insert(&mut self, class: Class) -> ClassId {
        let id = class.id;
        self.by_name.insert(class.name.to_ascii_lowercase(), id);
        self.classes.push(Rc::new(class));
        id
    }

    pub(crate) fn define_builtin(&mut self, name: &str, kind: ClassKind) -> ClassId {
        let class = Class::bare(self.next_id(), name, kind);
        self.insert(class)
    }

    fn resolve(&self, name: &str) -> Result<&Rc<Class>> {
        self.lookup(name)
            .and_then(|id| self.get(id))
            .ok_or_else(|| Error::UnknownClass {
                name: name.to_string(),
            })
    }

    fn define(&mut self, builder: ClassBuilder) -> Result<ClassId> {
        let ClassBuilder {
            name,
            kind,
            parent,
            interfaces,
            traits,
            properties,
            methods,
            native_tail,
            native_serializable,
            native_clone,
        } = builder;

        if self.lookup(&name).is_some() {
            return Err(Error::ClassAlreadyExists { name });
        }
        let id = self.next_id();

        // Parent
        let parent = match parent {
            Some(parent_name) => {
                if parent_name.eq_ignore_ascii_case(&name) {
                    return Err(Error::InheritanceCycle { name });
                }
                let parent = Rc::clone(self.resolve(&parent_name)?);
                if matches!(kind, ClassKind::Interface | ClassKind::Trait) {
                    return Err(Error::InvalidParent {
                        class: name,
                        parent: parent_name,
                        reason: "only classes can extend a class",
                    });
                }
                if matches!(parent.kind, ClassKind::Interface | ClassKind::Trait) {
                    return Err(Error::InvalidParent {
                        class: name,
                        parent: parent_name,
                        reason: "parent is not a class",
                    });
                }
                Some(parent)
            }
            None => None,
        };

        // Interfaces, transitively
        let mut all_interfaces: Vec<ClassId> =
            parent.as_ref().map(|p| p.interfaces.clone()).unwrap_or_default();
        for iface_name in &interfaces {
            let iface = self.resolve(iface_name)?;
            if iface.kind != ClassKind::Interface {
                return Err(Error::InvalidParent {
                    class: name,
                    parent: iface_name.clone(),
                    reason: "not an interface",
                });
            }
            for candidate in std::iter::once(iface.id).chain(iface.interfaces.iter().copied()) {
                if !all_interfaces.contains(&candidate) {
                    all_interfaces.push(candidate);
                }
            }
        }

        // Traits
        let mut used_traits = Vec::with_capacity(traits.len());
        for trait_name in &traits {
            let t = self.resolve(trait_name)?;
            if t.kind != ClassKind::Trait {
                return Err(Error::InvalidTrait {
                    class: name,
                    name: trait_name.clone(),
                });
            }
            used_traits.push(Rc::clone(t));
        }

        // Property layout
        let mut props = parent.as_ref().map(|p| p.props.clone()).unwrap_or_default();
        let mut prop_index = parent
            .as_ref()
            .map(|p| p.prop_index.clone())
            .unwrap_or_default();
        let mut own_props = Vec::new();
        let mut own_private = FxHashMap::default();
        let mut seen: FxHashSet<Str> = FxHashSet::default();

        let imported = used_traits.iter().flat_map(|t| {
            t.own_props.iter().map(|&slot| {
                let p = &t.props[slot];
                (
                    PropertyDecl {
                        name: Rc::clone(&p.name),
                        visibility: p.visibility,
                        default: p.default.clone(),
                    },
                    true,
                )
            })
        });
        let decls: Vec<(PropertyDecl, bool)> = properties
            .into_iter()
            .map(|d| (d, false))
            .chain(imported)
            .collect();

        for (decl, from_trait) in decls {
            if !seen.insert(Rc::clone(&decl.name)) {
                if from_trait {
                    continue;
                }
                return Err(Error::DuplicateProperty {
                    class: name,
                    property: decl.name.to_string(),
                });
            }
            let bad_default = match &decl.default {
                Value::Object(_) => true,
                Value::Array(a) => a.contains_object(),
                _ => false,
            };
            if bad_default {
                return Err(Error::InvalidDefault {
                    class: name,
                    property: decl.name.to_string(),
                });
            }

            let inherited = prop_index
                .get(&*decl.name)
                .copied()
                .filter(|&slot| props[slot].visibility != Visibility::Private);
            let declaring = match inherited {
                Some(slot)
                    if props[slot].visibility == Visibility::Protected
                        && decl.visibility == Visibility::Protected =>
                {
                    props[slot].declaring
                }
                _ => id,
            };
            let deep_init = matches!(&decl.default, Value::Array(a) if !a.is_empty());
            let slot_meta = DeclaredProperty {
                mangled: Rc::from(mangle(decl.visibility, &name, &decl.name)),
                name: Rc::clone(&decl.name),
                visibility: decl.visibility,
                declaring,
                default: decl.default,
                deep_init,
            };
            let slot = match inherited {
                Some(slot) => {
                    props[slot] = slot_meta;
                    slot
                }
                None => {
                    props.push(slot_meta);
                    props.len() - 1
                }
            };
            prop_index.insert(Rc::clone(&decl.name), slot);
            own_props.push(slot);
            if decl.visibility == Visibility::Private {
                own_private.insert(decl.name, slot);
            }
        }

        // Methods: inherited, then trait, then own
        let mut method_table = parent
            .as_ref()
            .map(|p| p.methods.clone())
            .unwrap_or_default();
        for t in &used_traits {
            for (key, m) in &t.methods {
                method_table.insert(
                    key.clone(),
                    Method {
                        name: Rc::clone(&m.name),
                        declaring: id,
                        body: Rc::clone(&m.body),
                    },
                );
            }
        }
        for (method_name, body) in methods {
            method_table.insert(
                method_name.to_ascii_lowercase().into_boxed_str(),
                Method {
                    name: Rc::from(method_name.as_str()),
                    declaring: id,
                    body,
                },
            );
        }

        // Capabilities
        let mut caps = Capabilities::empty();
        for key in method_table.keys() {
            if let Some(bit) = Capabilities::hook_bit(key) {
                caps |= bit;
            }
        }
        if let Some(serializable) = self.lookup(SERIALIZABLE_INTERFACE) {
            if all_interfaces.contains(&serializable) {
                caps |= Capabilities::SERIALIZABLE;
            }
        }
        let parent_caps = parent.as_ref().map(|p| p.caps).unwrap_or_default();
        let native_tail = native_tail
            .or_else(|| parent.as_ref().filter(|p| p.has(Capabilities::NATIVE)).map(|p| p.native_tail));
        if native_tail.is_some() {
            caps |= Capabilities::NATIVE;
        }
        if native_serializable || parent_caps.contains(Capabilities::NATIVE_SERIALIZABLE) {
            caps |= Capabilities::NATIVE_SERIALIZABLE;
        }
        let native_clone = native_clone.or_else(|| parent.as_ref().and_then(|p| p.native_clone.clone()));
        if native_clone.is_some() {
            caps |= Capabilities::HAS_CLONE;
        }

        let class = Class {
            id,
            name: Rc::from(name.as_str()),
            kind,
            parent: parent.as_ref().map(|p| p.id),
            interfaces: all_interfaces,
            traits: used_traits.iter().map(|t| t.id).collect(),
            props,
            prop_index,
            own_props,
            own_private,
            methods: method_table,
            caps,
            native_tail: native_tail.unwrap_or(0),
            native_clone,
        };
        hopper_log::debug!(
            "registered class {} ({} slots, caps {:?})",
            class.name,
            class.props.len(),
            class.caps
        );
        Ok(self.insert(class))
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for registering a class.
///
/// # Example
///
/// ```rust
/// use hopper::{ClassBuilder, Context, PropertyDecl, Value};
///
/// let mut ctx = Context::new();
///
/// let mut base = ClassBuilder::new("Point");
/// base.add_property(PropertyDecl::public("x").with_default(0))
///     .add_property(PropertyDecl::private("secret"));
/// let point = base.register(&mut ctx).unwrap();
///
/// let mut derived = ClassBuilder::new("Point3");
/// derived
///     .extends("Point")
///     .add_property(PropertyDecl::protected("z"));
/// let point3 = derived.register(&mut ctx).unwrap();
///
/// let class = ctx.class(point3).unwrap();
/// assert_eq!(class.num_props(), 3);
/// assert_eq!(class.parent(), Some(point));
/// ```
pub struct ClassBuilder {
    name: String,
    kind: ClassKind,
    parent: Option<String>,
    interfaces: Vec<String>,
    traits: Vec<String>,
    properties: Vec<PropertyDecl>,
    methods: Vec<(String, MethodFn)>,
    native_tail: Option<usize>,
    native_serializable: bool,
    native_clone: Option<NativeCloneFn>,
}

impl ClassBuilder {
    /// Creates a builder for a normal class.
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            name: name.to_string(),
            kind: ClassKind::Normal,
            parent: None,
            interfaces: Vec::new(),
            traits: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            native_tail: None,
            native_serializable: false,
            native_clone: None,
        }
    }

    /// Sets the parent class.
    pub fn extends(&mut self, parent: &str) -> &mut Self {
        self.parent = Some(parent.to_string());
        self
    }

    /// Adds an implemented interface.
    pub fn implements(&mut self, interface: &str) -> &mut Self {
        self.interfaces.push(interface.to_string());
        self
    }

    /// Imports a trait's properties and methods.
    pub fn use_trait(&mut self, name: &str) -> &mut Self {
        self.traits.push(name.to_string());
        self
    }

    /// Sets the class kind.
    pub fn set_kind(&mut self, kind: ClassKind) -> &mut Self {
        self.kind = kind;
        self
    }

    /// Declares a property.
    pub fn add_property(&mut self, decl: PropertyDecl) -> &mut Self {
        self.properties.push(decl);
        self
    }

    /// Adds a method. Later additions under the same name win.
    pub fn add_method<F>(&mut self, name: &str, body: F) -> &mut Self
    where
        F: Fn(&mut Context, ObjectId, &[Value]) -> Result<Value> + 'static,
    {
        self.methods.push((name.to_string(), Rc::new(body)));
        self
    }

    /// Marks the class as natively implemented with a zeroed tail of
    /// `tail_size` bytes per instance.
    pub fn native(&mut self, tail_size: usize) -> &mut Self {
        self.native_tail = Some(tail_size);
        self
    }

    /// Allows a native class to be serialized.
    pub fn native_serializable(&mut self) -> &mut Self {
        self.native_serializable = true;
        self
    }

    /// Installs a native clone used instead of field duplication.
    pub fn native_clone<F>(&mut self, clone: F) -> &mut Self
    where
        F: Fn(&mut Context, ObjectId) -> Result<ObjectId> + 'static,
    {
        self.native_clone = Some(Rc::new(clone));
        self
    }

    /// Registers the class.
    ///
    /// # Errors
    ///
    /// - [`Error::ClassAlreadyExists`] if the name is taken
    /// - [`Error::UnknownClass`] if a parent, interface or trait is missing
    /// - [`Error::InvalidParent`] / [`Error::InvalidTrait`] for kind mismatches
    /// - [`Error::DuplicateProperty`] / [`Error::InvalidDefault`] for bad declarations
    pub fn register(self, ctx: &mut Context) -> Result<ClassId> {
        ctx.classes.define(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ClassTable {
        let mut t = ClassTable::default();
        t.define_builtin(STD_CLASS, ClassKind::Normal);
        t.define_builtin(SERIALIZABLE_INTERFACE, ClassKind::Interface);
        t
    }

    fn define(t: &mut ClassTable, b: ClassBuilder) -> ClassId {
        t.define(b).unwrap()
    }

    #[test]
    fn test_layout_parent_slots_first() {
        let mut t = table();
        let mut a = ClassBuilder::new("A");
        a.add_property(PropertyDecl::public("p"))
            .add_property(PropertyDecl::private("x"));
        let a = define(&mut t, a);

        let mut b = ClassBuilder::new("B");
        b.extends("A")
            .add_property(PropertyDecl::protected("y"))
            .add_property(PropertyDecl::public("p").with_default(5));
        let b = define(&mut t, b);

        let b_class = t.get(b).unwrap();
        assert_eq!(b_class.num_props(), 3);
        // redeclared public property reuses the parent's slot
        assert_eq!(b_class.lookup_prop("p"), Some(0));
        assert_eq!(b_class.property(0).unwrap().default, Value::Int(5));
        assert_eq!(b_class.lookup_prop("x"), Some(1));
        assert_eq!(b_class.property(1).unwrap().declaring, a);
        assert_eq!(b_class.lookup_prop("y"), Some(2));
        assert_eq!(b_class.own_properties(), &[2, 0]);
    }

    #[test]
    fn test_private_shadowing_gets_new_slot() {
        let mut t = table();
        let mut a = ClassBuilder::new("A");
        a.add_property(PropertyDecl::private("x"));
        let a = define(&mut t, a);
        let mut b = ClassBuilder::new("B");
        b.extends("A").add_property(PropertyDecl::public("x"));
        let b = define(&mut t, b);

        let class = t.get(b).unwrap();
        assert_eq!(class.num_props(), 2);
        assert_eq!(class.lookup_prop("x"), Some(1));

        // From A's context the ancestor's private slot wins.
        assert_eq!(class.decl_prop_index(&t, Some(a), "x"), Some((0, true)));
        assert_eq!(class.decl_prop_index(&t, None, "x"), Some((1, true)));
    }

    #[test]
    fn test_accessibility_rules() {
        let mut t = table();
        let mut a = ClassBuilder::new("A");
        a.add_property(PropertyDecl::private("x"));
        let a = define(&mut t, a);
        let mut b = ClassBuilder::new("B");
        b.extends("A").add_property(PropertyDecl::protected("y"));
        let b = define(&mut t, b);
        let mut c = ClassBuilder::new("C");
        c.extends("B");
        let c = define(&mut t, c);
        let other = define(&mut t, ClassBuilder::new("Other"));

        let class_c = Rc::clone(t.get(c).unwrap());
        assert_eq!(class_c.decl_prop_index(&t, Some(b), "x"), Some((0, false)));
        assert_eq!(class_c.decl_prop_index(&t, Some(a), "x"), Some((0, true)));
        assert_eq!(class_c.decl_prop_index(&t, Some(c), "y"), Some((1, true)));
        assert_eq!(class_c.decl_prop_index(&t, Some(a), "y"), Some((1, true)));
        assert_eq!(class_c.decl_prop_index(&t, Some(other), "y"), Some((1, false)));
        assert_eq!(class_c.decl_prop_index(&t, None, "y"), Some((1, false)));
        assert_eq!(class_c.decl_prop_index(&t, None, "missing"), None);
    }

    #[test]
    fn test_protected_redeclaration_keeps_first_declarer() {
        let mut t = table();
        let mut a = ClassBuilder::new("A");
        a.add_property(PropertyDecl::protected("y"));
        let a = define(&mut t, a);
        let mut b = ClassBuilder::new("B");
        b.extends("A").add_property(PropertyDecl::protected("y"));
        let b = define(&mut t, b);

        let class = t.get(b).unwrap();
        assert_eq!(class.property(0).unwrap().declaring, a);
        assert_eq!(&*class.property(0).unwrap().mangled, "\0*\0y");
    }

    #[test]
    fn test_capabilities_from_methods() {
        let mut t = table();
        let mut b = ClassBuilder::new("Magic");
        b.add_method("__GET", |_, _, _| Ok(Value::Null))
            .add_method("__toString", |_, _, _| Ok(Value::str("m")))
            .implements(SERIALIZABLE_INTERFACE);
        let id = define(&mut t, b);

        let class = t.get(id).unwrap();
        assert!(class.has(Capabilities::USE_GET));
        assert!(class.has(Capabilities::HAS_TO_STRING));
        assert!(class.has(Capabilities::SERIALIZABLE));
        assert!(!class.has(Capabilities::USE_SET));
        assert!(class.method("__get").is_some());
        assert!(class.method("__TOSTRING").is_some());
    }

    #[test]
    fn test_capabilities_are_inherited() {
        let mut t = table();
        let mut a = ClassBuilder::new("A");
        a.add_method("__destruct", |_, _, _| Ok(Value::Null));
        define(&mut t, a);
        let mut b = ClassBuilder::new("B");
        b.extends("a");
        let b = define(&mut t, b);

        assert!(t.get(b).unwrap().has(Capabilities::HAS_DTOR));
    }

    #[test]
    fn test_trait_properties_and_methods_import() {
        let mut t = table();
        let mut tr = ClassBuilder::new("Counts");
        tr.set_kind(ClassKind::Trait)
            .add_property(PropertyDecl::private("count").with_default(0))
            .add_method("__isset", |_, _, _| Ok(Value::Bool(true)));
        define(&mut t, tr);

        let mut c = ClassBuilder::new("Counter");
        c.add_property(PropertyDecl::public("label")).use_trait("Counts");
        let c = define(&mut t, c);

        let class = t.get(c).unwrap();
        assert_eq!(class.lookup_prop("count"), Some(1));
        assert_eq!(class.property(1).unwrap().declaring, c);
        assert_eq!(&*class.property(1).unwrap().mangled, "\0Counter\0count");
        assert!(class.has(Capabilities::USE_ISSET));
    }

    #[test]
    fn test_registration_errors() {
        let mut t = table();
        assert!(matches!(
            t.define(ClassBuilder::new("STDCLASS")),
            Err(Error::ClassAlreadyExists { .. })
        ));

        let mut b = ClassBuilder::new("Orphan");
        b.extends("Nope");
        assert!(matches!(t.define(b), Err(Error::UnknownClass { .. })));

        let mut b = ClassBuilder::new("Loop");
        b.extends("Loop");
        assert!(matches!(t.define(b), Err(Error::InheritanceCycle { .. })));

        let mut b = ClassBuilder::new("Impl");
        b.extends(SERIALIZABLE_INTERFACE);
        assert!(matches!(t.define(b), Err(Error::InvalidParent { .. })));

        let mut b = ClassBuilder::new("Twice");
        b.add_property(PropertyDecl::public("a"))
            .add_property(PropertyDecl::private("a"));
        assert!(matches!(t.define(b), Err(Error::DuplicateProperty { .. })));

        let mut b = ClassBuilder::new("NotTrait");
        b.use_trait(STD_CLASS);
        assert!(matches!(t.define(b), Err(Error::InvalidTrait { .. })));
    }

    #[test]
    fn test_deep_init_flag() {
        let mut t = table();
        let mut b = ClassBuilder::new("Defaults");
        b.add_property(PropertyDecl::public("list").with_default(Value::Array(
            crate::runtime::array::Array::list([Value::Int(1)]),
        )))
        .add_property(PropertyDecl::public("empty").with_default(Value::Array(
            crate::runtime::array::Array::new(),
        )))
        .add_property(PropertyDecl::public("n").with_default(3));
        let id = define(&mut t, b);

        let props = t.get(id).unwrap().properties();
        assert!(props[0].deep_init);
        assert!(!props[1].deep_init);
        assert!(!props[2].deep_init);
    }

    #[test]
    fn test_instance_of_interfaces() {
        let mut t = table();
        let mut i = ClassBuilder::new("Shape");
        i.set_kind(ClassKind::Interface);
        let shape = define(&mut t, i);
        let mut a = ClassBuilder::new("Square");
        a.implements("Shape");
        define(&mut t, a);
        let mut b = ClassBuilder::new("Tile");
        b.extends("Square");
        let tile = define(&mut t, b);

        assert!(t.instance_of(tile, shape));
        assert!(!t.derives_from(tile, shape));
        let names: Vec<_> = t.ancestry(tile).map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["Tile", "Square"]);
    }
}
