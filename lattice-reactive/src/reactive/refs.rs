//! Refs
//!
//! A ref is a single reactive value with its own [`Dep`]. Reading it tracks
//! the dep, writing a different value triggers it.
//!
//! Besides plain refs this module provides the other single-value
//! containers that can stand wherever a ref is accepted:
//!
//! - [`PropertyRef`]: a ref backed by one property of a tracked view.
//! - [`CustomRef`]: a ref whose getter and setter decide when to track
//!   and trigger.
//! - [`Computed`]: see the `computed` module.
//!
//! [`AnyRef`] unifies them and is what [`Value::Ref`] holds.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::computed::Computed;
use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::Dep;
use crate::error::ReactiveError;
use crate::graph::{has_changed, Key, Reactive, Value};

struct RefInner {
    runtime: WeakRuntime,
    raw: RefCell<Value>,
    value: RefCell<Value>,
    dep: Dep,
    shallow: bool,
}

/// A reactive value cell.
///
/// Deep refs store containers as reactive views and compare by raw
/// identity. Shallow refs store what they are given.
#[derive(Clone)]
pub struct Ref(Rc<RefInner>);

impl Ref {
    fn new(runtime: &Runtime, value: Value, shallow: bool) -> Self {
        let (raw, value) = if shallow {
            (value.clone(), value)
        } else {
            (value.to_raw(), to_reactive(runtime, value))
        };
        Self(Rc::new(RefInner {
            runtime: runtime.downgrade(),
            raw: RefCell::new(raw),
            value: RefCell::new(value),
            dep: Dep::new(),
            shallow,
        }))
    }

    /// Read the value, tracking it.
    pub fn get(&self) -> Value {
        if let Some(runtime) = self.0.runtime.upgrade() {
            runtime.track_dep(&self.0.dep);
        }
        self.peek()
    }

    /// Read the value without tracking.
    pub fn peek(&self) -> Value {
        self.0.value.borrow().clone()
    }

    /// Replace the value. Subscribers are notified only when the raw value
    /// changed (`NaN` is equal to itself).
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        let direct = self.0.shallow || value.is_shallow() || value.is_readonly();
        let raw = if direct { value.clone() } else { value.to_raw() };
        if !has_changed(&raw, &self.0.raw.borrow()) {
            return;
        }
        let stored = match (direct, self.0.runtime.upgrade()) {
            (false, Some(runtime)) => to_reactive(&runtime, raw.clone()),
            _ => raw.clone(),
        };
        *self.0.raw.borrow_mut() = raw;
        *self.0.value.borrow_mut() = stored;
        self.trigger();
    }

    /// Notify subscribers without changing the value.
    pub fn trigger(&self) {
        if let Some(runtime) = self.0.runtime.upgrade() {
            runtime.trigger_dep(&self.0.dep);
        }
    }

    pub fn is_shallow(&self) -> bool {
        self.0.shallow
    }

    /// Number of effects subscribed to this ref.
    pub fn subscriber_count(&self) -> usize {
        self.0.dep.len()
    }

    pub fn ptr_eq(&self, other: &Ref) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("value", &*self.0.value.borrow())
            .field("shallow", &self.0.shallow)
            .finish()
    }
}

fn to_reactive(runtime: &Runtime, value: Value) -> Value {
    if value.is_object() {
        runtime.reactive(value)
    } else {
        value
    }
}

// ----------------------------------------------------------------------------
// Property refs
// ----------------------------------------------------------------------------

struct PropertyRefInner {
    object: Reactive,
    key: Key,
    default: Option<Value>,
}

/// A ref that reads and writes one property of a view.
#[derive(Clone)]
pub struct PropertyRef(Rc<PropertyRefInner>);

impl PropertyRef {
    pub fn get(&self) -> Value {
        let value = self.0.object.get(self.0.key.clone());
        match (&value, &self.0.default) {
            (Value::Undefined, Some(default)) => default.clone(),
            _ => value,
        }
    }

    pub fn set(&self, value: impl Into<Value>) -> bool {
        self.0.object.set(self.0.key.clone(), value)
    }

    pub fn key(&self) -> &Key {
        &self.0.key
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

// ----------------------------------------------------------------------------
// Custom refs
// ----------------------------------------------------------------------------

/// The track and trigger hooks handed to a [`Runtime::custom_ref`] factory.
#[derive(Clone)]
pub struct CustomRefHandle {
    runtime: WeakRuntime,
    dep: Dep,
}

impl CustomRefHandle {
    /// Subscribe the running effect to this ref.
    pub fn track(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.track_dep(&self.dep);
        }
    }

    /// Notify this ref's subscribers.
    pub fn trigger(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.trigger_dep(&self.dep);
        }
    }
}

struct CustomRefInner {
    handle: CustomRefHandle,
    get: Box<dyn Fn() -> Value>,
    set: Box<dyn Fn(Value)>,
}

/// A ref with user-defined tracking.
#[derive(Clone)]
pub struct CustomRef(Rc<CustomRefInner>);

impl CustomRef {
    pub fn get(&self) -> Value {
        (self.0.get)()
    }

    pub fn set(&self, value: impl Into<Value>) {
        (self.0.set)(value.into())
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.handle.dep.len()
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

// ----------------------------------------------------------------------------
// AnyRef
// ----------------------------------------------------------------------------

/// Any single-value container.
#[derive(Clone)]
pub enum AnyRef {
    Value(Ref),
    Computed(Computed),
    Property(PropertyRef),
    Custom(CustomRef),
}

impl AnyRef {
    /// Read the value, tracking it.
    pub fn get(&self) -> Value {
        match self {
            Self::Value(r) => r.get(),
            Self::Computed(c) => c.get(),
            Self::Property(p) => p.get(),
            Self::Custom(c) => c.get(),
        }
    }

    /// Write the value. Returns `false` when the ref is readonly or the
    /// write was refused.
    pub fn set(&self, value: impl Into<Value>) -> bool {
        match self {
            Self::Value(r) => {
                r.set(value);
                true
            }
            Self::Computed(c) => c.set(value),
            Self::Property(p) => p.set(value),
            Self::Custom(c) => {
                c.set(value);
                true
            }
        }
    }

    /// Read the value without tracking.
    pub fn peek(&self) -> Value {
        match self {
            Self::Value(r) => r.peek(),
            Self::Computed(c) => c.peek(),
            Self::Property(p) => match p.0.object.runtime() {
                Some(runtime) => runtime.untracked(|| p.get()),
                None => p.get(),
            },
            Self::Custom(c) => match c.0.handle.runtime.upgrade() {
                Some(runtime) => runtime.untracked(|| c.get()),
                None => c.get(),
            },
        }
    }

    pub fn is_shallow(&self) -> bool {
        matches!(self, Self::Value(r) if r.is_shallow())
    }

    /// Computeds without a setter.
    pub fn is_readonly(&self) -> bool {
        matches!(self, Self::Computed(c) if c.is_readonly())
    }

    pub(crate) fn addr(&self) -> usize {
        match self {
            Self::Value(r) => r.addr(),
            Self::Computed(c) => c.addr(),
            Self::Property(p) => p.addr(),
            Self::Custom(c) => c.addr(),
        }
    }

    pub fn ptr_eq(&self, other: &AnyRef) -> bool {
        self.addr() == other.addr()
    }
}

impl fmt::Debug for AnyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(r) => r.fmt(f),
            Self::Computed(c) => c.fmt(f),
            Self::Property(p) => write!(f, "PropertyRef({:?}.{})", p.0.object, p.0.key),
            Self::Custom(_) => f.write_str("CustomRef"),
        }
    }
}

impl From<Ref> for AnyRef {
    fn from(r: Ref) -> Self {
        Self::Value(r)
    }
}

impl From<Computed> for AnyRef {
    fn from(c: Computed) -> Self {
        Self::Computed(c)
    }
}

impl From<PropertyRef> for AnyRef {
    fn from(p: PropertyRef) -> Self {
        Self::Property(p)
    }
}

impl From<CustomRef> for AnyRef {
    fn from(c: CustomRef) -> Self {
        Self::Custom(c)
    }
}

/// Whether `value` is any kind of ref.
pub fn is_ref(value: &Value) -> bool {
    value.is_ref()
}

/// The value of a ref, or `value` itself. Tracks refs.
pub fn unref(value: &Value) -> Value {
    match value {
        Value::Ref(r) => r.get(),
        other => other.clone(),
    }
}

impl Runtime {
    /// Create a deep ref. Containers are stored as reactive views. Passing
    /// a plain ref returns it.
    pub fn ref_value(&self, value: impl Into<Value>) -> Ref {
        match value.into() {
            Value::Ref(AnyRef::Value(existing)) => existing,
            value => Ref::new(self, value, false),
        }
    }

    /// Create a ref that stores its value as given.
    pub fn shallow_ref(&self, value: impl Into<Value>) -> Ref {
        match value.into() {
            Value::Ref(AnyRef::Value(existing)) => existing,
            value => Ref::new(self, value, true),
        }
    }

    /// Force subscribers of a shallow ref to re-run after its contents were
    /// mutated in place.
    pub fn trigger_ref(&self, r: &Ref) {
        r.trigger();
    }

    /// A ref bound to `key` of `object`. A ref already stored at that key
    /// is returned as-is.
    pub fn to_ref(&self, object: &Reactive, key: impl Into<Key>) -> AnyRef {
        self.to_ref_with_default(object, key, None)
    }

    /// Like [`to_ref`](Self::to_ref), reading `default` while the property
    /// is `Undefined`.
    pub fn to_ref_with_default(
        &self,
        object: &Reactive,
        key: impl Into<Key>,
        default: Option<Value>,
    ) -> AnyRef {
        let key = object.target().normalize_key(key.into());
        if let Value::Ref(existing) = object.target().get(key.clone()) {
            return existing;
        }
        AnyRef::Property(PropertyRef(Rc::new(PropertyRefInner {
            object: object.clone(),
            key,
            default,
        })))
    }

    /// One property ref per own key of a view. Warns when `value` is not a
    /// view.
    pub fn to_refs(&self, value: &Value) -> IndexMap<Key, AnyRef> {
        let Some(object) = value.as_reactive() else {
            self.warn(ReactiveError::NotReactive(value.type_name().to_string()));
            return IndexMap::new();
        };
        object
            .target()
            .keys()
            .into_iter()
            .map(|key| (key.clone(), self.to_ref(object, key)))
            .collect()
    }

    /// Create a ref whose tracking is controlled by `factory`. The factory
    /// receives the track/trigger hooks and returns the getter and setter.
    pub fn custom_ref<F, G, S>(&self, factory: F) -> AnyRef
    where
        F: FnOnce(CustomRefHandle) -> (G, S),
        G: Fn() -> Value + 'static,
        S: Fn(Value) + 'static,
    {
        let handle = CustomRefHandle {
            runtime: self.downgrade(),
            dep: Dep::new(),
        };
        let (get, set) = factory(handle.clone());
        AnyRef::Custom(CustomRef(Rc::new(CustomRefInner {
            handle,
            get: Box::new(get),
            set: Box::new(set),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Target;
    use crate::reactive::EffectOptions;
    use std::cell::Cell;

    fn watch_value(rt: &Runtime, r: AnyRef) -> Rc<RefCell<Vec<Value>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        rt.effect(move || s.borrow_mut().push(r.get()), EffectOptions::default());
        seen
    }

    #[test]
    fn ref_notifies_on_change_only() {
        let rt = Runtime::new();
        let count = rt.ref_value(1);
        let seen = watch_value(&rt, count.clone().into());

        count.set(2);
        count.set(2);
        count.set(f64::NAN);
        count.set(f64::NAN);
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn deep_ref_wraps_containers() {
        let rt = Runtime::new();
        let target = Target::record_from([("n", 1)]);
        let r = rt.ref_value(target.clone());
        assert!(r.peek().is_reactive());

        // Assigning the view of the same target is not a change.
        let runs = Rc::new(Cell::new(0));
        let (rc, c) = (runs.clone(), r.clone());
        rt.effect(
            move || {
                rc.set(rc.get() + 1);
                c.get();
            },
            EffectOptions::default(),
        );
        r.set(rt.reactive(target));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn shallow_ref_needs_manual_trigger_for_inner_mutation() {
        let rt = Runtime::new();
        let target = Target::record_from([("n", 1)]);
        let r = rt.shallow_ref(target.clone());
        assert_eq!(r.peek(), Value::Object(target.clone()));

        let seen = watch_value(&rt, r.clone().into());
        target.insert("n", 2).unwrap();
        assert_eq!(seen.borrow().len(), 1);
        rt.trigger_ref(&r);
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn ref_of_ref_is_the_same_ref() {
        let rt = Runtime::new();
        let a = rt.ref_value(1);
        let b = rt.ref_value(a.clone());
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn property_ref_reads_and_writes_through() {
        let rt = Runtime::new();
        let state = rt.reactive(Target::record_from([("n", 1)]));
        let object = state.as_reactive().unwrap();
        let n = rt.to_ref(object, "n");

        let seen = watch_value(&rt, n.clone());
        object.set("n", 2);
        assert!(n.set(3));
        assert_eq!(
            *seen.borrow(),
            vec![Value::from(1), Value::from(2), Value::from(3)]
        );
    }

    #[test]
    fn property_ref_default_applies_to_undefined() {
        let rt = Runtime::new();
        let state = rt.reactive(Target::record());
        let object = state.as_reactive().unwrap();
        let r = rt.to_ref_with_default(object, "missing", Some(Value::from("fallback")));
        assert_eq!(r.get(), Value::from("fallback"));
        object.set("missing", "set");
        assert_eq!(r.get(), Value::from("set"));
    }

    #[test]
    fn to_ref_returns_stored_refs() {
        let rt = Runtime::new();
        let inner = rt.ref_value(1);
        let state = rt.reactive(Target::record_from([("inner", inner.clone())]));
        let r = rt.to_ref(state.as_reactive().unwrap(), "inner");
        assert!(r.ptr_eq(&AnyRef::Value(inner)));
    }

    #[test]
    fn to_refs_covers_every_key_and_warns_on_plain_values() {
        let rt = Runtime::new();
        let warnings = Rc::new(Cell::new(0));
        let w = warnings.clone();
        rt.set_warn_handler(move |_| w.set(w.get() + 1));

        let state = rt.reactive(Target::record_from([("a", 1), ("b", 2)]));
        let refs = rt.to_refs(&state);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[&Key::from("b")].get(), Value::from(2));

        assert!(rt.to_refs(&Value::from(Target::record())).is_empty());
        assert_eq!(warnings.get(), 1);
    }

    #[test]
    fn custom_ref_controls_tracking() {
        let rt = Runtime::new();
        let store = Rc::new(RefCell::new(Value::from(0)));
        let s = store.clone();
        let r = rt.custom_ref(move |handle| {
            let (h1, h2, s2) = (handle.clone(), handle, s.clone());
            (
                move || {
                    h1.track();
                    s.borrow().clone()
                },
                move |value: Value| {
                    *s2.borrow_mut() = value;
                    h2.trigger();
                },
            )
        });

        let seen = watch_value(&rt, r.clone());
        r.set(5);
        assert_eq!(*seen.borrow(), vec![Value::from(0), Value::from(5)]);
        assert_eq!(*store.borrow(), Value::from(5));
        assert_eq!(r.peek(), Value::from(5));
    }

    #[test]
    fn unref_tracks_refs_and_passes_other_values() {
        let rt = Runtime::new();
        let r = rt.ref_value("x");
        assert_eq!(unref(&Value::from(r.clone())), Value::from("x"));
        assert_eq!(unref(&Value::from(3)), Value::from(3));
        assert!(is_ref(&Value::from(r)));
    }
}
