//! Dynamic Values
//!
//! [`Value`] is the host value type flowing through targets, views, refs and
//! watchers. Scalars are stored inline; containers, views and refs are
//! reference handles compared by identity.
//!
//! # Equality
//!
//! - `PartialEq` for `Value` is `Object.is`: `NaN` equals `NaN` and `+0`
//!   differs from `-0`. This is the change check used by every setter.
//! - [`MapKey`] uses `SameValueZero` (`NaN` equals `NaN`, `+0` equals `-0`),
//!   the comparison associative collections use for keys.
//! - [`Value::strict_equals`] is `===`, used by sequence index searches.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use super::proxy::Reactive;
use super::target::{Key, Store, Target, TargetId};
use crate::reactive::{AnyRef, Computed, Ref};

/// A host value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    /// A raw, untracked container.
    Object(Target),
    /// A tracked view over a container.
    Proxy(Reactive),
    /// A ref, computed, or other single-value container.
    Ref(AnyRef),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Containers and views; refs are not objects for wrapping purposes.
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Proxy(_))
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Self::Ref(_))
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, Self::Proxy(_))
    }

    /// A mutable (non-readonly) tracked view.
    pub fn is_reactive(&self) -> bool {
        matches!(self, Self::Proxy(p) if !p.is_readonly())
    }

    pub fn is_readonly(&self) -> bool {
        matches!(self, Self::Proxy(p) if p.is_readonly())
    }

    pub fn is_shallow(&self) -> bool {
        match self {
            Self::Proxy(p) => p.is_shallow(),
            Self::Ref(r) => r.is_shallow(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64()
            .filter(|n| n.fract() == 0.0 && n.is_finite())
            .map(|n| n as i64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The raw target of a container or view.
    pub fn as_target(&self) -> Option<&Target> {
        match self {
            Self::Object(t) => Some(t),
            Self::Proxy(p) => Some(p.target()),
            _ => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Self::Proxy(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_any_ref(&self) -> Option<&AnyRef> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// JavaScript-style truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Object(_) | Self::Proxy(_) | Self::Ref(_) => true,
        }
    }

    /// Strip a view down to its raw target. Other values are returned as-is.
    pub fn to_raw(&self) -> Value {
        match self {
            Self::Proxy(p) => Value::Object(p.target().clone()),
            other => other.clone(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Object(_) => "object",
            Self::Proxy(_) => "reactive object",
            Self::Ref(_) => "ref",
        }
    }

    /// Identity of reference values: targets, views and refs.
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            Self::Object(t) => Some(t.addr()),
            Self::Proxy(p) => Some(p.addr()),
            Self::Ref(r) => Some(r.addr()),
            _ => None,
        }
    }

    fn compare(&self, other: &Value, numbers: fn(f64, f64) -> bool) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => numbers(*a, *b),
            (Self::String(a), Self::String(b)) => a == b,
            (a, b) => match (a.identity(), b.identity()) {
                (Some(x), Some(y)) => x == y && std::mem::discriminant(a) == std::mem::discriminant(b),
                _ => false,
            },
        }
    }

    /// `Object.is`.
    pub fn same_value(&self, other: &Value) -> bool {
        self.compare(other, |a, b| {
            (a.is_nan() && b.is_nan()) || (a == b && a.is_sign_negative() == b.is_sign_negative())
        })
    }

    /// `SameValueZero`.
    pub fn same_value_zero(&self, other: &Value) -> bool {
        self.compare(other, |a, b| (a.is_nan() && b.is_nan()) || a == b)
    }

    /// `===`.
    pub fn strict_equals(&self, other: &Value) -> bool {
        self.compare(other, |a, b| a == b)
    }
}

/// Whether a write from `old` to `new` counts as a change.
pub(crate) fn has_changed(new: &Value, old: &Value) -> bool {
    !new.same_value(old)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Object(t) => write!(f, "{t:?}"),
            Self::Proxy(p) => write!(f, "{p:?}"),
            Self::Ref(r) => write!(f, "{r:?}"),
        }
    }
}

/// A collection key compared with `SameValueZero`.
#[derive(Clone, Debug)]
pub struct MapKey(Value);

impl MapKey {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.same_value_zero(&other.0)
    }
}

impl Eq for MapKey {}

impl Hash for MapKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            Value::Undefined | Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Number(n) => {
                let bits = if n.is_nan() {
                    f64::NAN.to_bits()
                } else if *n == 0.0 {
                    0
                } else {
                    n.to_bits()
                };
                bits.hash(state);
            }
            Value::String(s) => s.hash(state),
            other => other.identity().hash(state),
        }
    }
}

// ----------------------------------------------------------------------------
// Conversions
// ----------------------------------------------------------------------------

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Self::Undefined
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

macro_rules! number_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Self::Number(n as f64)
            }
        })*
    };
}

number_from!(i32, i64, u32, u64, usize, f32, f64);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Self::String(s)
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Index(i) => Self::Number(i as f64),
            Key::Name(name) => Self::String(name),
        }
    }
}

impl From<Target> for Value {
    fn from(t: Target) -> Self {
        Self::Object(t)
    }
}

impl From<Reactive> for Value {
    fn from(p: Reactive) -> Self {
        Self::Proxy(p)
    }
}

impl From<AnyRef> for Value {
    fn from(r: AnyRef) -> Self {
        Self::Ref(r)
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self {
        Self::Ref(AnyRef::Value(r))
    }
}

impl From<Computed> for Value {
    fn from(c: Computed) -> Self {
        Self::Ref(AnyRef::Computed(c))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Undefined, Into::into)
    }
}

/// JSON arrays become sequences and JSON objects become records, all raw.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Self::from(s),
            Json::Array(items) => Self::Object(Target::sequence_from(items)),
            Json::Object(props) => Self::Object(Target::record_from(props)),
        }
    }
}

// ----------------------------------------------------------------------------
// Serialization
// ----------------------------------------------------------------------------

/// Serializes an untracked snapshot. Views serialize their raw target, refs
/// their current value, maps as `[key, value]` pairs and sets as arrays.
/// Cyclic graphs are rejected.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let path = RefCell::new(Vec::new());
        Snapshot { value: self, path: &path }.serialize(serializer)
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Value::Object(self.clone()).serialize(serializer)
    }
}

struct Snapshot<'a> {
    value: &'a Value,
    path: &'a RefCell<Vec<TargetId>>,
}

impl Snapshot<'_> {
    fn child<'b>(&'b self, value: &'b Value) -> Snapshot<'b> {
        Snapshot { value, path: self.path }
    }
}

impl Serialize for Snapshot<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.value {
            Value::Undefined | Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Ref(r) => {
                let current = r.peek();
                self.child(&current).serialize(serializer)
            }
            Value::Object(t) => self.target(t, serializer),
            Value::Proxy(p) => self.target(p.target(), serializer),
        }
    }
}

impl Snapshot<'_> {
    fn target<S: Serializer>(&self, target: &Target, serializer: S) -> Result<S::Ok, S::Error> {
        if self.path.borrow().contains(&target.id()) {
            return Err(S::Error::custom(format!(
                "cannot serialize cyclic reference to {target:?}"
            )));
        }
        self.path.borrow_mut().push(target.id());
        let result = match &*target.store() {
            Store::Record { props, .. } => {
                let mut map = serializer.serialize_map(Some(props.len()))?;
                for (key, value) in props {
                    map.serialize_entry(&**key, &self.child(value))?;
                }
                map.end()
            }
            Store::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&self.child(item))?;
                }
                seq.end()
            }
            Store::Map(entries) => {
                let mut seq = serializer.serialize_seq(Some(entries.len()))?;
                for (key, value) in entries {
                    seq.serialize_element(&(self.child(key.value()), self.child(value)))?;
                }
                seq.end()
            }
            Store::Set(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(&self.child(value.value()))?;
                }
                seq.end()
            }
        };
        self.path.borrow_mut().pop();
        result
    }
}
