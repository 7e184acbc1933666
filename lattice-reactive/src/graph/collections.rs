//! Collection Instrumentation
//!
//! Maps and sets are not observed through property access. Their views
//! expose instrumented methods instead, each of which tracks or triggers
//! the entry it touches and the iteration sentinels it affects.
//!
//! Keys are resolved twice: once as given and once in raw form. A map may
//! hold a view and its raw target as two different keys; when both are
//! present a diagnostic is reported because reads through a view can no
//! longer tell them apart.
//!
//! The iteration methods on records and sequences enumerate own keys, so
//! one set of helpers works for every container kind.

use super::proxy::Reactive;
use super::target::{Key, TargetKind};
use super::value::{has_changed, MapKey, Value};
use crate::error::ReactiveError;
use crate::reactive::{TrackKey, TrackOp, TriggerOp};

fn entry(key: &Value) -> TrackKey {
    TrackKey::Entry(MapKey::new(key.clone()))
}

impl Reactive {
    fn refuse_readonly(&self, operation: &'static str) -> bool {
        if self.is_readonly() {
            self.warn(ReactiveError::ReadonlyCollection { operation });
            return true;
        }
        false
    }

    fn require_kind(&self, kind: TargetKind, operation: &'static str) -> bool {
        let actual = self.kind();
        if actual != kind {
            self.warn(ReactiveError::InvalidKey {
                key: operation.to_string(),
                kind: actual,
            });
            return false;
        }
        true
    }

    fn check_identity_keys(&self, key: &Value) {
        let raw = key.to_raw();
        if raw != *key && self.target().collection_has(&raw) {
            self.warn(ReactiveError::DuplicateIdentityKey { kind: self.kind() });
        }
    }

    /// Resolve a write key: the key as given if present, else its raw form.
    fn resolve_key(&self, key: Value) -> (Value, bool) {
        let target = self.target();
        if target.collection_has(&key) {
            self.check_identity_keys(&key);
            return (key, true);
        }
        let raw = key.to_raw();
        let had = target.collection_has(&raw);
        (raw, had)
    }

    /// Look up a map entry, tracking both the given and the raw key.
    pub fn map_get(&self, key: impl Into<Value>) -> Value {
        let key = key.into();
        let raw = key.to_raw();
        if key != raw {
            self.track(TrackOp::Get, entry(&key));
        }
        self.track(TrackOp::Get, entry(&raw));

        let target = self.target();
        match target.map_get(&key).or_else(|| target.map_get(&raw)) {
            Some(value) => self.wrap_child(value),
            None => Value::Undefined,
        }
    }

    /// Whether a map has the key or a set has the member.
    pub fn contains(&self, key: impl Into<Value>) -> bool {
        let key = key.into();
        let raw = key.to_raw();
        if key != raw {
            self.track(TrackOp::Has, entry(&key));
        }
        self.track(TrackOp::Has, entry(&raw));

        let target = self.target();
        if key == raw {
            target.collection_has(&key)
        } else {
            target.collection_has(&key) || target.collection_has(&raw)
        }
    }

    /// Number of entries. Tracks iteration.
    pub fn size(&self) -> usize {
        self.track(TrackOp::Iterate, TrackKey::Iterate);
        self.target().len()
    }

    /// Insert or replace a map entry. The value is stored raw.
    pub fn map_set(&self, key: impl Into<Value>, value: impl Into<Value>) -> bool {
        if self.refuse_readonly("set") || !self.require_kind(TargetKind::Map, "set") {
            return false;
        }
        let value = value.into().to_raw();
        let (key, had_key) = self.resolve_key(key.into());

        let target = self.target();
        let old = target.map_get(&key).unwrap_or_default();
        target.map_insert(key.clone(), value.clone());
        if !had_key {
            self.trigger(TriggerOp::Add, Some(entry(&key)), Some(&value));
        } else if has_changed(&value, &old) {
            self.trigger(TriggerOp::Set, Some(entry(&key)), Some(&value));
        }
        true
    }

    /// Add a set member. Returns `false` when it was already present.
    pub fn add(&self, value: impl Into<Value>) -> bool {
        if self.refuse_readonly("add") || !self.require_kind(TargetKind::Set, "add") {
            return false;
        }
        let value = value.into().to_raw();
        let target = self.target();
        if target.collection_has(&value) {
            return false;
        }
        target.set_insert(value.clone());
        self.trigger(TriggerOp::Add, Some(entry(&value)), Some(&value));
        true
    }

    /// Remove a map entry or set member.
    pub fn remove(&self, key: impl Into<Value>) -> bool {
        if self.refuse_readonly("delete") {
            return false;
        }
        if !self.kind().is_collection() {
            return false;
        }
        let (key, had_key) = self.resolve_key(key.into());
        let removed = self.target().collection_remove(&key);
        if had_key {
            self.trigger(TriggerOp::Delete, Some(entry(&key)), None);
        }
        removed
    }

    /// Remove every entry. Sequences are truncated and records lose every
    /// own key.
    pub fn clear(&self) {
        if self.refuse_readonly("clear") {
            return;
        }
        match self.kind() {
            TargetKind::Map | TargetKind::Set => {
                let target = self.target();
                let had_items = !target.is_empty();
                target.clear();
                if had_items {
                    self.trigger(TriggerOp::Clear, None, None);
                }
            }
            TargetKind::Sequence => {
                self.set(Key::length(), 0);
            }
            TargetKind::Record => {
                for key in self.target().keys() {
                    self.delete(key);
                }
            }
        }
    }

    /// Call `f(value, key)` for every entry. Tracks iteration.
    pub fn for_each(&self, mut f: impl FnMut(Value, Value)) {
        for (key, value) in self.entries() {
            f(value, key);
        }
    }

    /// Keys of every entry. Map keys only track key iteration, so value
    /// changes do not re-run the reader.
    pub fn keys(&self) -> Vec<Value> {
        match self.kind() {
            TargetKind::Map => {
                self.track(TrackOp::Iterate, TrackKey::MapKeyIterate);
                self.target()
                    .entries()
                    .into_iter()
                    .map(|(key, _)| self.wrap_child(key))
                    .collect()
            }
            TargetKind::Set => {
                self.track(TrackOp::Iterate, TrackKey::Iterate);
                self.target()
                    .values()
                    .into_iter()
                    .map(|value| self.wrap_child(value))
                    .collect()
            }
            TargetKind::Record | TargetKind::Sequence => {
                self.own_keys().into_iter().map(Value::from).collect()
            }
        }
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    /// `(key, value)` pairs. Set members are paired with themselves.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        if self.kind().is_collection() {
            self.track(TrackOp::Iterate, TrackKey::Iterate);
            return self
                .target()
                .entries()
                .into_iter()
                .map(|(key, value)| (self.wrap_child(key), self.wrap_child(value)))
                .collect();
        }
        self.own_keys()
            .into_iter()
            .map(|key| {
                let value = self.get(key.clone());
                (Value::from(key), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Target;
    use crate::reactive::{EffectOptions, Runtime};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn view(rt: &Runtime, target: Target) -> Reactive {
        rt.reactive(target).as_reactive().cloned().unwrap()
    }

    fn runs_of(rt: &Runtime, f: impl Fn() + 'static) -> Rc<Cell<usize>> {
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        rt.effect(
            move || {
                r.set(r.get() + 1);
                f();
            },
            EffectOptions::default(),
        );
        runs
    }

    #[test]
    fn map_size_reruns_on_add() {
        let rt = Runtime::new();
        let map = view(&rt, Target::map());
        let m = map.clone();
        let runs = runs_of(&rt, move || {
            m.size();
        });

        map.map_set("a", 1);
        assert_eq!(runs.get(), 2);
        // A value change under an existing key keeps the size.
        map.map_set("a", 1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn map_value_change_invalidates_iteration_but_not_keys() {
        let rt = Runtime::new();
        let map = view(&rt, Target::map_from([("a", 1)]));
        let (m1, m2) = (map.clone(), map.clone());
        let values = runs_of(&rt, move || {
            m1.values();
        });
        let keys = runs_of(&rt, move || {
            m2.keys();
        });

        map.map_set("a", 2);
        assert_eq!((values.get(), keys.get()), (2, 1));
        map.map_set("b", 1);
        assert_eq!((values.get(), keys.get()), (3, 2));
    }

    #[test]
    fn map_get_tracks_the_entry() {
        let rt = Runtime::new();
        let map = view(&rt, Target::map());
        let m = map.clone();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        rt.effect(
            move || s.borrow_mut().push(m.map_get("k")),
            EffectOptions::default(),
        );

        map.map_set("other", 1);
        map.map_set("k", 1);
        assert_eq!(*seen.borrow(), vec![Value::Undefined, Value::from(1)]);
    }

    #[test]
    fn map_values_are_wrapped_on_read_and_stored_raw() {
        let rt = Runtime::new();
        let map = view(&rt, Target::map());
        let item = Target::record();
        let wrapped = rt.reactive(item.clone());

        map.map_set("item", wrapped.clone());
        assert_eq!(map.target().map_get(&Value::from("item")), Some(Value::Object(item)));
        assert_eq!(map.map_get("item"), wrapped);
    }

    #[test]
    fn view_keys_resolve_to_raw_keys() {
        let rt = Runtime::new();
        let key = Target::record();
        let map = view(&rt, Target::map_from([(key.clone(), "v")]));
        let wrapped_key = rt.reactive(key);

        assert!(map.contains(wrapped_key.clone()));
        assert_eq!(map.map_get(wrapped_key.clone()), Value::from("v"));
        assert!(map.remove(wrapped_key));
        assert_eq!(map.target().len(), 0);
    }

    #[test]
    fn raw_and_view_keys_together_warn() {
        let rt = Runtime::new();
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let w = warnings.clone();
        rt.set_warn_handler(move |err| w.borrow_mut().push(err.clone()));

        let key = Target::record();
        let wrapped_key = rt.reactive(key.clone());
        let raw_map = Target::map();
        raw_map.map_insert(key, 1);
        raw_map.map_insert(wrapped_key.clone(), 2);

        let map = view(&rt, raw_map);
        map.map_set(wrapped_key, 3);
        assert_eq!(
            *warnings.borrow(),
            vec![ReactiveError::DuplicateIdentityKey { kind: TargetKind::Map }]
        );
    }

    #[test]
    fn set_add_and_delete_trigger_iteration() {
        let rt = Runtime::new();
        let set = view(&rt, Target::set());
        let s = set.clone();
        let runs = runs_of(&rt, move || {
            s.for_each(|_, _| {});
        });

        assert!(set.add(1));
        assert!(!set.add(1));
        assert_eq!(runs.get(), 2);
        assert!(set.remove(1));
        assert!(!set.remove(1));
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn contains_tracks_missing_members() {
        let rt = Runtime::new();
        let set = view(&rt, Target::set());
        let s = set.clone();
        let runs = runs_of(&rt, move || {
            s.contains("x");
        });
        set.add("y");
        assert_eq!(runs.get(), 1);
        set.add("x");
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn clear_notifies_every_reader_once() {
        let rt = Runtime::new();
        let map = view(&rt, Target::map_from([("a", 1), ("b", 2)]));
        let m = map.clone();
        let runs = runs_of(&rt, move || {
            m.map_get("a");
            m.size();
        });

        map.clear();
        assert_eq!(runs.get(), 2);
        // Clearing an empty collection is not a change.
        map.clear();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn readonly_collections_refuse_mutation() {
        let rt = Runtime::new();
        let warnings = Rc::new(Cell::new(0));
        let w = warnings.clone();
        rt.set_warn_handler(move |_| w.set(w.get() + 1));

        let raw = Target::map_from([("a", 1)]);
        let ro = rt.readonly(raw.clone()).as_reactive().cloned().unwrap();
        assert!(!ro.map_set("a", 2));
        assert!(!ro.remove("a"));
        ro.clear();
        assert_eq!(warnings.get(), 3);
        assert_eq!(raw.len(), 1);
        assert_eq!(ro.map_get("a"), Value::from(1));
    }

    #[test]
    fn nested_collection_values_inherit_readonly() {
        let rt = Runtime::new();
        let inner = Target::record();
        let ro = rt
            .readonly(Target::map_from([("inner", inner)]))
            .as_reactive()
            .cloned()
            .unwrap();
        assert!(ro.map_get("inner").is_readonly());
        assert!(ro.values()[0].is_readonly());
    }

    #[test]
    fn record_iteration_helpers_enumerate_own_keys() {
        let rt = Runtime::new();
        let record = view(&rt, Target::record_from([("a", 1), ("b", 2)]));
        assert_eq!(record.keys(), vec![Value::from("a"), Value::from("b")]);
        assert_eq!(record.values(), vec![Value::from(1), Value::from(2)]);

        let r = record.clone();
        let runs = runs_of(&rt, move || {
            r.entries();
        });
        record.set("c", 3);
        assert_eq!(runs.get(), 2);
        record.clear();
        assert!(record.target().is_empty());
    }

    #[test]
    fn size_is_reachable_through_property_access() {
        let rt = Runtime::new();
        let set = view(&rt, Target::set_from([1, 2]));
        assert_eq!(set.get("size"), Value::from(2));
        assert_eq!(set.len(), 2);
    }
}
