//! Tracked Views
//!
//! A [`Reactive`] is a view over a raw [`Target`]. Reads made through the
//! view subscribe the running effect to what was read; writes notify the
//! effects subscribed to what changed.
//!
//! # Variants
//!
//! | Variant | Writes | Nested containers |
//! |---|---|---|
//! | `Reactive` | allowed | wrapped reactive on read |
//! | `ShallowReactive` | allowed | returned raw |
//! | `Readonly` | warn, no-op | wrapped readonly on read |
//! | `ShallowReadonly` | warn, no-op | returned raw |
//!
//! Readonly views track their reads like mutable ones. A readonly view is
//! always built over the raw target, so a mutable view of the same target
//! still notifies readers of the readonly one.
//!
//! # Identity
//!
//! The runtime keeps a weak identity map per variant. Wrapping a target
//! that already has a live view of the requested variant returns that view.

use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::target::{Key, Target, TargetId, TargetKind};
use super::value::{has_changed, Value};
use crate::error::ReactiveError;
use crate::reactive::{Runtime, TrackKey, TrackOp, TriggerOp, WeakRuntime};

/// Which kind of view to create over a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyVariant {
    Reactive,
    ShallowReactive,
    Readonly,
    ShallowReadonly,
}

impl ProxyVariant {
    pub fn is_readonly(self) -> bool {
        matches!(self, Self::Readonly | Self::ShallowReadonly)
    }

    pub fn is_shallow(self) -> bool {
        matches!(self, Self::ShallowReactive | Self::ShallowReadonly)
    }
}

pub(crate) struct ReactiveInner {
    runtime: WeakRuntime,
    target: Target,
    variant: ProxyVariant,
}

/// A tracked view over a raw container.
///
/// Cloning a `Reactive` produces another handle to the same view.
#[derive(Clone)]
pub struct Reactive(Rc<ReactiveInner>);

/// A weak handle that does not keep its view alive.
#[derive(Clone)]
pub struct WeakReactive(Weak<ReactiveInner>);

impl WeakReactive {
    pub fn upgrade(&self) -> Option<Reactive> {
        self.0.upgrade().map(Reactive)
    }
}

/// (target, variant) -> live view.
#[derive(Default)]
pub(crate) struct ProxyRegistry {
    proxies: HashMap<(TargetId, ProxyVariant), WeakReactive>,
    inserts_since_sweep: usize,
}

impl ProxyRegistry {
    fn get(&self, id: TargetId, variant: ProxyVariant) -> Option<Reactive> {
        self.proxies.get(&(id, variant)).and_then(WeakReactive::upgrade)
    }

    fn insert(&mut self, proxy: &Reactive, sweep_interval: usize) {
        self.inserts_since_sweep += 1;
        if sweep_interval > 0 && self.inserts_since_sweep >= sweep_interval {
            self.proxies.retain(|_, view| view.0.strong_count() > 0);
            self.inserts_since_sweep = 0;
        }
        self.proxies
            .insert((proxy.target().id(), proxy.variant()), proxy.downgrade());
    }

    /// Number of live views.
    pub(crate) fn len(&self) -> usize {
        self.proxies
            .values()
            .filter(|view| view.0.strong_count() > 0)
            .count()
    }
}

impl Runtime {
    /// Wrap a container in a deep mutable view.
    ///
    /// Views are returned unchanged, including readonly ones.
    /// Non-containers are returned unchanged with a warning.
    pub fn reactive(&self, value: impl Into<Value>) -> Value {
        self.wrap(value.into(), ProxyVariant::Reactive)
    }

    /// Wrap a container in a mutable view whose nested containers are
    /// returned raw.
    pub fn shallow_reactive(&self, value: impl Into<Value>) -> Value {
        self.wrap(value.into(), ProxyVariant::ShallowReactive)
    }

    /// Wrap a container, or the raw target of a mutable view, in a deep
    /// readonly view.
    pub fn readonly(&self, value: impl Into<Value>) -> Value {
        self.wrap(value.into(), ProxyVariant::Readonly)
    }

    pub fn shallow_readonly(&self, value: impl Into<Value>) -> Value {
        self.wrap(value.into(), ProxyVariant::ShallowReadonly)
    }

    /// Get or create the `variant` view of `value`.
    pub fn wrap(&self, value: Value, variant: ProxyVariant) -> Value {
        let target = match value {
            Value::Proxy(proxy) => {
                if !variant.is_readonly() || proxy.is_readonly() {
                    return Value::Proxy(proxy);
                }
                proxy.target().clone()
            }
            Value::Object(target) => target,
            other => {
                self.warn(ReactiveError::NotObservable(other.type_name().to_string()));
                return other;
            }
        };

        if let Some(existing) = self.inner.proxies.borrow().get(target.id(), variant) {
            return Value::Proxy(existing);
        }
        if target.is_marked_raw() || !target.is_extensible() {
            return Value::Object(target);
        }

        let proxy = Reactive(Rc::new(ReactiveInner {
            runtime: self.downgrade(),
            target,
            variant,
        }));
        self.inner
            .proxies
            .borrow_mut()
            .insert(&proxy, self.inner.config.registry_sweep_interval);
        Value::Proxy(proxy)
    }

    /// Number of live views created by this runtime.
    pub fn proxy_count(&self) -> usize {
        self.inner.proxies.borrow().len()
    }
}

impl Reactive {
    /// The raw container behind this view.
    pub fn target(&self) -> &Target {
        &self.0.target
    }

    pub fn variant(&self) -> ProxyVariant {
        self.0.variant
    }

    /// A mutable view.
    pub fn is_reactive(&self) -> bool {
        !self.0.variant.is_readonly()
    }

    pub fn is_readonly(&self) -> bool {
        self.0.variant.is_readonly()
    }

    pub fn is_shallow(&self) -> bool {
        self.0.variant.is_shallow()
    }

    pub fn kind(&self) -> TargetKind {
        self.0.target.kind()
    }

    pub fn runtime(&self) -> Option<Runtime> {
        self.0.runtime.upgrade()
    }

    pub fn downgrade(&self) -> WeakReactive {
        WeakReactive(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Reactive) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn track(&self, op: TrackOp, key: TrackKey) {
        if let Some(runtime) = self.runtime() {
            runtime.track(&self.0.target, op, key);
        }
    }

    pub(crate) fn trigger(&self, op: TriggerOp, key: Option<TrackKey>, new_value: Option<&Value>) {
        if let Some(runtime) = self.runtime() {
            runtime.trigger(&self.0.target, op, key, new_value);
        }
    }

    pub(crate) fn warn(&self, error: ReactiveError) {
        match self.runtime() {
            Some(runtime) => runtime.warn(error),
            None => tracing::warn!(%error, "reactivity warning"),
        }
    }

    /// Wrap a value read out of this view according to its variant.
    pub(crate) fn wrap_child(&self, value: Value) -> Value {
        if self.is_shallow() || !value.is_object() {
            return value;
        }
        let variant = if self.is_readonly() {
            ProxyVariant::Readonly
        } else {
            ProxyVariant::Reactive
        };
        match self.runtime() {
            Some(runtime) => runtime.wrap(value, variant),
            None => value,
        }
    }

    // ------------------------------------------------------------------
    // Property access
    // ------------------------------------------------------------------

    /// Read a property, tracking it.
    ///
    /// Refs stored in records unwrap to their value; refs stored at a
    /// sequence index are returned as refs. Missing record properties are
    /// looked up on the prototype.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let target = self.target();
        let key = target.normalize_key(key.into());
        let kind = target.kind();
        if kind.is_collection() {
            return match &key {
                Key::Name(name) if &**name == "size" => Value::from(self.size()),
                _ => Value::Undefined,
            };
        }

        let (own, proto) = {
            let store = target.store();
            (store.read_own(&key), store.proto())
        };
        let value = match (own, proto) {
            (Some(value), _) => value,
            (None, Some(Value::Proxy(parent))) => parent.get(key.clone()),
            (None, Some(Value::Object(parent))) => parent.get(key.clone()),
            _ => Value::Undefined,
        };

        let is_index = key.is_index();
        self.track(TrackOp::Get, TrackKey::Prop(key));

        if self.is_shallow() {
            return value;
        }
        if let Value::Ref(r) = &value {
            if kind == TargetKind::Sequence && is_index {
                return value;
            }
            return r.get();
        }
        self.wrap_child(value)
    }

    /// Write a property, notifying subscribers when a key was added or a
    /// value changed. Returns `false` when the write was refused.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        let target = self.target();
        let key = target.normalize_key(key.into());
        let mut value = value.into();

        if self.is_readonly() {
            self.warn(ReactiveError::ReadonlyWrite {
                key: key.to_string(),
            });
            return false;
        }
        let kind = target.kind();
        if kind.is_collection() {
            self.warn(ReactiveError::InvalidKey {
                key: key.to_string(),
                kind,
            });
            return false;
        }

        let mut old = target.store().read_own(&key).unwrap_or_default();
        if !self.is_shallow() {
            if !value.is_shallow() && !value.is_readonly() {
                old = old.to_raw();
                value = value.to_raw();
            }
            if kind != TargetKind::Sequence {
                if let Value::Ref(r) = &old {
                    if !value.is_ref() {
                        if r.is_readonly() {
                            return false;
                        }
                        r.set(value);
                        return true;
                    }
                }
            }
        }

        let had_key = target.store().has_own(&key);
        if let Err(error) = target.insert(key.clone(), value.clone()) {
            self.warn(error);
            return false;
        }
        if !had_key {
            self.trigger(TriggerOp::Add, Some(TrackKey::Prop(key)), Some(&value));
        } else if has_changed(&value, &old) {
            self.trigger(TriggerOp::Set, Some(TrackKey::Prop(key)), Some(&value));
        }
        true
    }

    /// Delete a property. A sequence element is overwritten with
    /// `Undefined` rather than left as a hole, so [`has`](Self::has) still
    /// reports its index.
    pub fn delete(&self, key: impl Into<Key>) -> bool {
        let target = self.target();
        let key = target.normalize_key(key.into());
        if self.is_readonly() {
            self.warn(ReactiveError::ReadonlyDelete {
                key: key.to_string(),
            });
            return false;
        }
        if target.kind().is_collection() {
            return false;
        }
        let had_key = target.store().has_own(&key);
        let removed = target.remove(key.clone());
        if removed && had_key {
            self.trigger(TriggerOp::Delete, Some(TrackKey::Prop(key)), None);
        }
        removed
    }

    /// Whether the property exists on the target or its prototype.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        let target = self.target();
        let key = target.normalize_key(key.into());
        if target.kind().is_collection() {
            return false;
        }
        let (own, proto) = {
            let store = target.store();
            (store.has_own(&key), store.proto())
        };
        let found = own
            || match proto {
                Some(Value::Proxy(parent)) => parent.has(key.clone()),
                Some(Value::Object(parent)) => has_in_chain(&parent, &key),
                _ => false,
            };
        self.track(TrackOp::Has, TrackKey::Prop(key));
        found
    }

    /// Own property keys. Tracks `length` for sequences and key iteration
    /// for records, so adding or removing a key re-runs the reader.
    pub fn own_keys(&self) -> Vec<Key> {
        let key = if self.kind() == TargetKind::Sequence {
            TrackKey::length()
        } else {
            TrackKey::Iterate
        };
        self.track(TrackOp::Iterate, key);
        self.target().keys()
    }

    /// Sequence length, record key count, or collection size. Tracked.
    pub fn len(&self) -> usize {
        match self.kind() {
            TargetKind::Sequence => self.sequence_len(),
            TargetKind::Record => self.own_keys().len(),
            TargetKind::Map | TargetKind::Set => self.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sequence_len(&self) -> usize {
        self.get(Key::length())
            .as_f64()
            .map_or(0, |n| n as usize)
    }

    // ------------------------------------------------------------------
    // Sequence searches
    // ------------------------------------------------------------------

    /// `SameValueZero` membership test over a sequence.
    pub fn includes(&self, value: impl Into<Value>) -> bool {
        self.search(&value.into(), |items, needle| {
            items.iter().position(|item| item.same_value_zero(needle))
        })
        .is_some()
    }

    /// First index strictly equal to `value`.
    pub fn index_of(&self, value: impl Into<Value>) -> Option<usize> {
        self.search(&value.into(), |items, needle| {
            items.iter().position(|item| item.strict_equals(needle))
        })
    }

    /// Last index strictly equal to `value`.
    pub fn last_index_of(&self, value: impl Into<Value>) -> Option<usize> {
        self.search(&value.into(), |items, needle| {
            items.iter().rposition(|item| item.strict_equals(needle))
        })
    }

    /// Track every index, search the raw elements, and retry with the raw
    /// form of a view argument on a miss.
    fn search(
        &self,
        needle: &Value,
        find: impl Fn(&[Value], &Value) -> Option<usize>,
    ) -> Option<usize> {
        if self.kind() != TargetKind::Sequence {
            return None;
        }
        let len = self.sequence_len();
        for i in 0..len {
            self.track(TrackOp::Get, TrackKey::Prop(Key::Index(i)));
        }
        let items = self.target().values();
        find(&items, needle).or_else(|| match needle {
            Value::Proxy(_) => find(&items, &needle.to_raw()),
            _ => None,
        })
    }

    // ------------------------------------------------------------------
    // Length-mutating sequence methods
    // ------------------------------------------------------------------

    /// Run a length-mutating method with tracking paused. Every element
    /// write still goes through [`set`](Self::set) and triggers.
    fn mutate_sequence<R>(&self, method: &'static str, f: impl FnOnce(&Self) -> R) -> Option<R> {
        let kind = self.kind();
        if kind != TargetKind::Sequence {
            self.warn(ReactiveError::InvalidKey {
                key: method.to_string(),
                kind,
            });
            return None;
        }
        if self.is_readonly() {
            self.warn(ReactiveError::ReadonlyWrite {
                key: "length".to_string(),
            });
            return None;
        }
        match self.runtime() {
            Some(runtime) => Some(runtime.untracked(|| f(self))),
            None => Some(f(self)),
        }
    }

    fn raw_len(&self) -> usize {
        self.target().len()
    }

    fn raw_at(&self, index: usize) -> Value {
        self.target().get(index)
    }

    /// Append values. Returns the new length.
    pub fn push<I, V>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.mutate_sequence("push", |this| {
            let mut len = this.raw_len();
            for value in values {
                this.set(len, value);
                len += 1;
            }
            this.set(Key::length(), len);
            len
        })
        .unwrap_or_else(|| self.target().len())
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Value {
        self.mutate_sequence("pop", |this| {
            let len = this.raw_len();
            if len == 0 {
                this.set(Key::length(), 0);
                return Value::Undefined;
            }
            let last = this.get(len - 1);
            this.delete(len - 1);
            this.set(Key::length(), len - 1);
            last
        })
        .unwrap_or_default()
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Value {
        self.mutate_sequence("shift", |this| {
            let len = this.raw_len();
            if len == 0 {
                this.set(Key::length(), 0);
                return Value::Undefined;
            }
            let first = this.get(0usize);
            for k in 1..len {
                this.set(k - 1, this.raw_at(k));
            }
            this.delete(len - 1);
            this.set(Key::length(), len - 1);
            first
        })
        .unwrap_or_default()
    }

    /// Prepend values. Returns the new length.
    pub fn unshift<I, V>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.mutate_sequence("unshift", |this| {
            let len = this.raw_len();
            let count = items.len();
            if count > 0 {
                for k in (0..len).rev() {
                    this.set(k + count, this.raw_at(k));
                }
                for (j, item) in items.into_iter().enumerate() {
                    this.set(j, item);
                }
            }
            this.set(Key::length(), len + count);
            len + count
        })
        .unwrap_or_else(|| self.target().len())
    }

    /// Remove `delete_count` elements at `start`, insert `items` in their
    /// place, and return the removed elements.
    pub fn splice<I, V>(&self, start: usize, delete_count: usize, items: I) -> Vec<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();
        self.mutate_sequence("splice", |this| {
            let len = this.raw_len();
            let start = start.min(len);
            let delete_count = delete_count.min(len - start);
            let item_count = items.len();

            let removed: Vec<Value> = (0..delete_count)
                .map(|k| this.get(start + k))
                .collect();

            if item_count < delete_count {
                for k in start..len - delete_count {
                    this.set(k + item_count, this.raw_at(k + delete_count));
                }
                for k in ((len - delete_count + item_count)..len).rev() {
                    this.delete(k);
                }
            } else if item_count > delete_count {
                for k in (start..len - delete_count).rev() {
                    this.set(k + item_count, this.raw_at(k + delete_count));
                }
            }
            for (j, item) in items.into_iter().enumerate() {
                this.set(start + j, item);
            }
            this.set(Key::length(), len - delete_count + item_count);
            removed
        })
        .unwrap_or_default()
    }
}

fn has_in_chain(target: &Target, key: &Key) -> bool {
    let (own, proto) = {
        let store = target.store();
        (store.has_own(key), store.proto())
    };
    own || match proto {
        Some(Value::Object(parent)) => has_in_chain(&parent, key),
        Some(Value::Proxy(parent)) => has_in_chain(parent.target(), key),
        _ => false,
    }
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Reactive {}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:?})", self.0.variant, self.0.target)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
