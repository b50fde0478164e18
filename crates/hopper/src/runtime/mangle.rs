//! External names of private and protected properties.
//!
//! A private property `name` declared in `ClassName` is keyed as
//! `"\0ClassName\0name"`, a protected one as `"\0*\0name"`, a public one by
//! its bare name. Array casts, serialization and `set_from_array` all agree
//! on this format.

use crate::runtime::class::Visibility;

/// Marker byte that starts a mangled name.
pub const MANGLE_MARKER: char = '\0';

/// Qualifier used for protected properties.
pub const PROTECTED_QUALIFIER: &str = "*";

/// Mangles a property name for its visibility.
///
/// # Example
///
/// ```rust
/// use hopper::runtime::class::Visibility;
/// use hopper::runtime::mangle::mangle;
///
/// assert_eq!(mangle(Visibility::Private, "A", "x"), "\0A\0x");
/// assert_eq!(mangle(Visibility::Protected, "A", "y"), "\0*\0y");
/// assert_eq!(mangle(Visibility::Public, "A", "z"), "z");
/// ```
#[must_use]
pub fn mangle(visibility: Visibility, declaring_class: &str, name: &str) -> String {
    match visibility {
        Visibility::Public => name.to_string(),
        Visibility::Protected => format!("\0{PROTECTED_QUALIFIER}\0{name}"),
        Visibility::Private => format!("\0{declaring_class}\0{name}"),
    }
}

/// A property name split back into its qualifier and bare name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demangled<'a> {
    /// No marker: a public or dynamic property.
    Public(&'a str),
    /// `\0*\0name`
    Protected(&'a str),
    /// `\0Class\0name`
    Private {
        /// The declaring class qualifier.
        class: &'a str,
        /// The bare property name.
        name: &'a str,
    },
}

impl<'a> Demangled<'a> {
    /// The bare property name.
    #[must_use]
    pub fn name(&self) -> &'a str {
        match *self {
            Demangled::Public(name) | Demangled::Protected(name) => name,
            Demangled::Private { name, .. } => name,
        }
    }
}

/// Splits a possibly mangled key.
///
/// A leading NUL marks a mangled key; the qualifier runs to the next NUL. A
/// marker with no closing NUL yields an empty qualifier and the remainder
/// as the name.
#[must_use]
pub fn demangle(key: &str) -> Demangled<'_> {
    let Some(rest) = key.strip_prefix(MANGLE_MARKER) else {
        return Demangled::Public(key);
    };
    let (qualifier, name) = match rest.find(MANGLE_MARKER) {
        Some(end) => (&rest[..end], &rest[end + 1..]),
        None => ("", rest),
    };
    if qualifier == PROTECTED_QUALIFIER {
        Demangled::Protected(name)
    } else {
        Demangled::Private {
            class: qualifier,
            name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demangle_public() {
        assert_eq!(demangle("plain"), Demangled::Public("plain"));
    }

    #[test]
    fn test_demangle_protected() {
        assert_eq!(demangle("\0*\0y"), Demangled::Protected("y"));
    }

    #[test]
    fn test_demangle_private() {
        let d = demangle("\0Base\0secret");
        assert_eq!(
            d,
            Demangled::Private {
                class: "Base",
                name: "secret"
            }
        );
        assert_eq!(d.name(), "secret");
    }

    #[test]
    fn test_demangle_splits_on_first_nul() {
        assert_eq!(
            demangle("\0A\0b\0c"),
            Demangled::Private {
                class: "A",
                name: "b\0c"
            }
        );
    }

    #[test]
    fn test_mangle_roundtrips_through_demangle() {
        for vis in [Visibility::Public, Visibility::Protected, Visibility::Private] {
            let key = mangle(vis, "Owner", "field");
            assert_eq!(demangle(&key).name(), "field");
        }
    }
}
