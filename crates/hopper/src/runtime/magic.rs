//! Magic property hooks and their recursion guard.
//!
//! When direct property access is unavailable the accessors fall back to the
//! class's `__get`, `__set`, `__isset` or `__unset` hook. A hook may touch
//! the same property again; re-entering the *same* `(object, key, kind)`
//! while it is already running is declined instead of recursing, while any
//! other combination proceeds and is tracked in turn.
//!
//! The guard keeps one active access inline. A set is allocated only once a
//! second, distinct access is active at the same time, and is dropped again
//! when the outermost access exits.

use crate::Context;
use crate::error::Result;
use crate::runtime::class::Capabilities;
use crate::runtime::object::ObjectId;
use crate::runtime::value::{Str, Value};
use fxhash::FxHashSet;
use hopper_log::trace;
use std::fmt;
use std::rc::Rc;

/// Which hook an access goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MagicKind {
    /// `__get($name)`
    Get,
    /// `__set($name, $value)`
    Set,
    /// `__isset($name)`
    Isset,
    /// `__unset($name)`
    Unset,
}

impl MagicKind {
    /// Hook method name.
    #[must_use]
    pub fn method_name(self) -> &'static str {
        match self {
            MagicKind::Get => "__get",
            MagicKind::Set => "__set",
            MagicKind::Isset => "__isset",
            MagicKind::Unset => "__unset",
        }
    }

    /// Capability bit a class must carry for the hook to be tried.
    #[must_use]
    pub fn capability(self) -> Capabilities {
        match self {
            MagicKind::Get => Capabilities::USE_GET,
            MagicKind::Set => Capabilities::USE_SET,
            MagicKind::Isset => Capabilities::USE_ISSET,
            MagicKind::Unset => Capabilities::USE_UNSET,
        }
    }
}

impl fmt::Display for MagicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method_name())
    }
}

/// One in-flight hook invocation. Compared by object identity, key content
/// and kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropAccess {
    /// Receiver.
    pub obj: ObjectId,
    /// Property name.
    pub key: Str,
    /// Hook kind.
    pub kind: MagicKind,
}

/// Proof of entry, handed back to [`MagicGuard::exit`].
#[derive(Debug)]
#[must_use = "a guard entry must be exited"]
pub enum GuardToken {
    /// The access became the single active one.
    Outermost,
    /// The access joined the tracking set.
    Nested(PropAccess),
}

/// Recursion guard for magic hooks, scoped to one context.
#[derive(Debug, Default)]
pub struct MagicGuard {
    active: Option<PropAccess>,
    nested: Option<FxHashSet<PropAccess>>,
}

impl MagicGuard {
    /// Enters `access`. Returns `None` when the same access is already
    /// running, in which case the hook must not be invoked.
    pub fn enter(&mut self, access: PropAccess) -> Option<GuardToken> {
        let Some(active) = &self.active else {
            self.active = Some(access);
            return Some(GuardToken::Outermost);
        };
        if self.nested.is_none() && *active == access {
            return None;
        }
        let set = self.nested.get_or_insert_with(|| {
            let mut set = FxHashSet::default();
            set.insert(active.clone());
            set
        });
        if set.insert(access.clone()) {
            Some(GuardToken::Nested(access))
        } else {
            None
        }
    }

    /// Leaves a previously entered access.
    pub fn exit(&mut self, token: GuardToken) {
        match token {
            GuardToken::Outermost => {
                self.active = None;
                self.nested = None;
            }
            GuardToken::Nested(access) => {
                if let Some(set) = &mut self.nested {
                    set.remove(&access);
                }
            }
        }
    }

    /// Returns true while `access` is in progress.
    #[must_use]
    pub fn is_active(&self, access: &PropAccess) -> bool {
        self.active.as_ref() == Some(access)
            || self.nested.as_ref().is_some_and(|set| set.contains(access))
    }

    /// Returns true when nothing is in progress and no set is allocated.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.nested.is_none()
    }

    /// Returns true when the tracking set has been allocated.
    #[must_use]
    pub fn has_tracking_set(&self) -> bool {
        self.nested.is_some()
    }
}

impl Context {
    /// Runs a magic hook on `obj` for `key`.
    ///
    /// Returns `Ok(None)` when the class does not declare the hook or when
    /// the call was declined as recursive. A returned value is owned by the
    /// caller. The guard entry is removed before any fault propagates.
    pub fn invoke_magic(
        &mut self,
        obj: ObjectId,
        kind: MagicKind,
        key: &str,
        value: Option<&Value>,
    ) -> Result<Option<Value>> {
        let class = self.class_of(obj)?;
        if !class.has(kind.capability()) {
            return Ok(None);
        }
        let Some(method) = class.method(kind.method_name()).cloned() else {
            return Ok(None);
        };

        let key: Str = Rc::from(key);
        let access = PropAccess {
            obj,
            key: Rc::clone(&key),
            kind,
        };
        let Some(token) = self.guard.enter(access) else {
            trace!("declined recursive {} on #{}->{}", kind, obj, key);
            return Ok(None);
        };

        trace!("{}::{}('{}') on #{}", class.name(), kind, key, obj);
        let mut args = Vec::with_capacity(2);
        args.push(Value::Str(key));
        if let Some(v) = value {
            args.push(v.clone());
        }
        let result = self.invoke(&method, obj, &args);
        self.guard.exit(token);
        result.map(Some)
    }
}
