//! Tagged values stored in property slots, containers and hook arguments.
//!
//! A [`Value`] is a type tag plus payload. Strings and arrays are shared
//! through `Rc`; objects are referenced by [`ObjectId`] and counted by the
//! heap. Cloning a `Value` copies the handle only, it never touches an
//! object's reference count. Counted copies go through
//! [`Context::dup`](crate::Context::dup) and are dropped with
//! [`Context::release`](crate::Context::release).

use crate::runtime::array::Array;
use crate::runtime::object::ObjectId;
use std::fmt;
use std::rc::Rc;

/// Shared immutable string payload.
pub type Str = Rc<str>;

/// A tagged runtime value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// The uninitialized marker. Distinct from `Null`: a declared property
    /// holding `Uninit` has been unset.
    #[default]
    Uninit,
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// Double-precision float.
    Double(f64),
    /// Immutable string.
    Str(Str),
    /// Copy-on-write container.
    Array(Array),
    /// Counted object reference.
    Object(ObjectId),
}

/// A numeric view of a value used by arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    /// Integer result.
    Int(i64),
    /// Float result.
    Double(f64),
}

impl Number {
    fn into_value(self) -> Value {
        match self {
            Number::Int(i) => Value::Int(i),
            Number::Double(d) => Value::Double(d),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Double(d) => d,
        }
    }
}

impl Value {
    /// Builds a string value.
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    /// Returns true for the uninitialized marker.
    #[must_use]
    pub fn is_uninit(&self) -> bool {
        matches!(self, Value::Uninit)
    }

    /// Returns true for `Null` and `Uninit`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Uninit)
    }

    /// Returns true when the payload is reference counted by the heap or by `Rc`.
    #[must_use]
    pub fn is_refcounted(&self) -> bool {
        matches!(self, Value::Str(_) | Value::Array(_) | Value::Object(_))
    }

    /// Returns the object handle, if this is an object.
    #[must_use]
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the container, if this is an array.
    #[must_use]
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Name of the type tag, as shown in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Uninit | Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Truthiness. Objects are always true.
    #[must_use]
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Uninit | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Double(d) => *d != 0.0,
            Value::Str(s) => !(s.is_empty() || &**s == "0"),
            Value::Array(a) => !a.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// Numeric coercion. Objects count as `1`.
    #[must_use]
    pub fn to_number(&self) -> Number {
        match self {
            Value::Uninit | Value::Null => Number::Int(0),
            Value::Bool(b) => Number::Int(i64::from(*b)),
            Value::Int(i) => Number::Int(*i),
            Value::Double(d) => Number::Double(*d),
            Value::Str(s) => parse_numeric(s).unwrap_or(Number::Int(0)),
            Value::Array(a) => Number::Int(i64::from(!a.is_empty())),
            Value::Object(_) => Number::Int(1),
        }
    }

    /// String conversion for everything except objects, which need a
    /// `__toString` hook and therefore a context.
    #[must_use]
    pub fn to_display_string(&self) -> Option<String> {
        match self {
            Value::Uninit | Value::Null | Value::Bool(false) => Some(String::new()),
            Value::Bool(true) => Some("1".to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Double(d) => Some(format_double(*d)),
            Value::Str(s) => Some(s.to_string()),
            Value::Array(_) => Some("Array".to_string()),
            Value::Object(_) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<Str> for Value {
    fn from(s: Str) -> Self {
        Value::Str(s)
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Object(id)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Object(id) => write!(f, "Object(#{id})"),
            other => f.write_str(&other.to_display_string().unwrap_or_default()),
        }
    }
}

/// Renders a double the way the engine prints it.
pub(crate) fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NAN".to_string()
    } else if d.is_infinite() {
        (if d > 0.0 { "INF" } else { "-INF" }).to_string()
    } else {
        format!("{d}")
    }
}

fn parse_numeric(s: &str) -> Option<Number> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Number::Int(i));
    }
    // Rust accepts "inf" and "nan"; numeric strings do not.
    if trimmed.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E') {
        return None;
    }
    trimmed.parse::<f64>().ok().map(Number::Double)
}

// ============================================================================
// Compound assignment and increment/decrement
// ============================================================================

/// Binary operator of a compound property assignment (`$o->p += v`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOp {
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `*=`
    Mul,
    /// `.=`
    Concat,
}

impl SetOp {
    /// Applies the operator to two non-object operands.
    ///
    /// `Concat` on an object operand is resolved by the context, which can
    /// run `__toString`; here objects render as an empty string.
    #[must_use]
    pub fn apply(self, lhs: &Value, rhs: &Value) -> Value {
        match self {
            SetOp::Add => arith(lhs, rhs, i64::checked_add, |a, b| a + b),
            SetOp::Sub => arith(lhs, rhs, i64::checked_sub, |a, b| a - b),
            SetOp::Mul => arith(lhs, rhs, i64::checked_mul, |a, b| a * b),
            SetOp::Concat => {
                let mut out = lhs.to_display_string().unwrap_or_default();
                out.push_str(&rhs.to_display_string().unwrap_or_default());
                Value::Str(Rc::from(out))
            }
        }
    }

    /// Returns true for the arithmetic operators.
    #[must_use]
    pub fn is_arithmetic(self) -> bool {
        !matches!(self, SetOp::Concat)
    }
}

fn arith(
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    match (lhs.to_number(), rhs.to_number()) {
        (Number::Int(a), Number::Int(b)) => match int_op(a, b) {
            Some(r) => Value::Int(r),
            None => Value::Double(float_op(a as f64, b as f64)),
        },
        (a, b) => Value::Double(float_op(a.as_f64(), b.as_f64())),
    }
}

/// Increment/decrement flavour (`++$o->p`, `$o->p--`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncDecOp {
    /// `++$x`
    PreInc,
    /// `$x++`
    PostInc,
    /// `--$x`
    PreDec,
    /// `$x--`
    PostDec,
}

impl IncDecOp {
    /// Returns true for the increment flavours.
    #[must_use]
    pub fn is_inc(self) -> bool {
        matches!(self, IncDecOp::PreInc | IncDecOp::PostInc)
    }

    /// Returns true when the expression yields the updated value.
    #[must_use]
    pub fn is_pre(self) -> bool {
        matches!(self, IncDecOp::PreInc | IncDecOp::PreDec)
    }

    /// Updates `target` in place and returns the expression result.
    ///
    /// The result is an uncounted handle copy of either the old or the new
    /// value.
    ///
    /// # Example
    ///
    /// ```rust
    /// use hopper::runtime::value::{IncDecOp, Value};
    ///
    /// let mut v = Value::Int(1);
    /// assert_eq!(IncDecOp::PostInc.apply(&mut v), Value::Int(1));
    /// assert_eq!(v, Value::Int(2));
    ///
    /// let mut n = Value::Null;
    /// assert_eq!(IncDecOp::PreDec.apply(&mut n), Value::Null);
    /// ```
    pub fn apply(self, target: &mut Value) -> Value {
        let old = target.clone();
        let new = if self.is_inc() {
            increment(&old)
        } else {
            decrement(&old)
        };
        if let Some(new) = new {
            *target = new;
        }
        if self.is_pre() { target.clone() } else { old }
    }
}

fn increment(v: &Value) -> Option<Value> {
    match v {
        Value::Uninit | Value::Null => Some(Value::Int(1)),
        Value::Int(i) => Some(
            i.checked_add(1)
                .map_or(Value::Double(*i as f64 + 1.0), Value::Int),
        ),
        Value::Double(d) => Some(Value::Double(d + 1.0)),
        Value::Str(s) if s.is_empty() => Some(Value::str("1")),
        Value::Str(s) => parse_numeric(s).map(|n| match n {
            Number::Int(i) => SetOp::Add.apply(&Value::Int(i), &Value::Int(1)),
            Number::Double(d) => Number::Double(d + 1.0).into_value(),
        }),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

fn decrement(v: &Value) -> Option<Value> {
    match v {
        Value::Int(i) => Some(
            i.checked_sub(1)
                .map_or(Value::Double(*i as f64 - 1.0), Value::Int),
        ),
        Value::Double(d) => Some(Value::Double(d - 1.0)),
        Value::Str(s) if s.is_empty() => Some(Value::Int(-1)),
        Value::Str(s) => parse_numeric(s).map(|n| match n {
            Number::Int(i) => SetOp::Sub.apply(&Value::Int(i), &Value::Int(1)),
            Number::Double(d) => Number::Double(d - 1.0).into_value(),
        }),
        Value::Uninit | Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninit_is_distinct_from_null() {
        assert!(Value::Uninit.is_uninit());
        assert!(!Value::Null.is_uninit());
        assert!(Value::Uninit.is_null());
        assert_ne!(Value::Uninit, Value::Null);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::str("0").to_bool());
        assert!(!Value::str("").to_bool());
        assert!(Value::str("0.0").to_bool());
        assert!(!Value::Array(Array::new()).to_bool());
        assert!(Value::Double(0.1).to_bool());
    }

    #[test]
    fn test_set_op_arithmetic() {
        assert_eq!(SetOp::Add.apply(&Value::Int(2), &Value::Int(3)), Value::Int(5));
        assert_eq!(SetOp::Mul.apply(&Value::str("4"), &Value::Int(2)), Value::Int(8));
        assert_eq!(
            SetOp::Sub.apply(&Value::Double(1.5), &Value::Int(1)),
            Value::Double(0.5)
        );
        assert_eq!(
            SetOp::Add.apply(&Value::Int(i64::MAX), &Value::Int(1)),
            Value::Double(i64::MAX as f64 + 1.0)
        );
    }

    #[test]
    fn test_set_op_concat() {
        let v = SetOp::Concat.apply(&Value::str("n="), &Value::Int(7));
        assert_eq!(v, Value::str("n=7"));
        let v = SetOp::Concat.apply(&Value::Null, &Value::Bool(true));
        assert_eq!(v, Value::str("1"));
    }

    #[test]
    fn test_inc_dec() {
        let mut v = Value::Null;
        assert_eq!(IncDecOp::PreInc.apply(&mut v), Value::Int(1));

        let mut v = Value::Int(5);
        assert_eq!(IncDecOp::PostDec.apply(&mut v), Value::Int(5));
        assert_eq!(v, Value::Int(4));

        let mut v = Value::str("9");
        assert_eq!(IncDecOp::PreInc.apply(&mut v), Value::Int(10));

        let mut v = Value::str("");
        assert_eq!(IncDecOp::PreDec.apply(&mut v), Value::Int(-1));

        let mut v = Value::Bool(true);
        assert_eq!(IncDecOp::PreInc.apply(&mut v), Value::Bool(true));
    }

    #[test]
    fn test_format_double() {
        assert_eq!(format_double(0.5), "0.5");
        assert_eq!(format_double(2.0), "2");
        assert_eq!(format_double(f64::INFINITY), "INF");
        assert_eq!(format_double(f64::NAN), "NAN");
    }
}
