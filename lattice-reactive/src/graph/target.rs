//! Raw Targets
//!
//! A [`Target`] is a plain, untracked container: a record, a sequence, an
//! associative map or a set. Reading or writing a target directly never
//! tracks or triggers anything. Wrap it with
//! [`Runtime::reactive`](crate::Runtime::reactive) to get a tracked view.
//!
//! Targets are shared by reference. Cloning a `Target` produces another
//! handle to the same container, and identity (not contents) is what the
//! proxy and dependency registries key on.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};

use super::value::{MapKey, Value};
use crate::error::{ReactiveError, Result};

/// Unique identifier for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The container kind of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// String-keyed properties in insertion order, with an optional prototype.
    Record,
    /// Index-addressed values with a `length`.
    Sequence,
    /// Key/value entries compared with `SameValueZero`.
    Map,
    /// Unique values compared with `SameValueZero`.
    Set,
}

impl TargetKind {
    pub fn is_collection(self) -> bool {
        matches!(self, Self::Map | Self::Set)
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Record => "record",
            Self::Sequence => "sequence",
            Self::Map => "map",
            Self::Set => "set",
        })
    }
}

/// A property key.
///
/// Sequences address elements by [`Key::Index`] and expose `length` as a
/// name. Records only have names; an index used on a record is converted to
/// its decimal name, and a canonical decimal name used on a sequence is
/// converted to an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Index(usize),
    Name(Rc<str>),
}

impl Key {
    pub fn length() -> Self {
        Self::Name(Rc::from("length"))
    }

    pub fn is_length(&self) -> bool {
        matches!(self, Self::Name(name) if &**name == "length")
    }

    /// The integer index this key denotes, if any.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Name(name) => canonical_index(name),
        }
    }

    pub fn is_index(&self) -> bool {
        self.as_index().is_some()
    }
}

/// Largest length a sequence may have. Indices run below it.
pub const MAX_SEQUENCE_LENGTH: usize = u32::MAX as usize;

fn canonical_index(name: &str) -> Option<usize> {
    let index: usize = name.parse().ok()?;
    (index < MAX_SEQUENCE_LENGTH && index.to_string() == name).then_some(index)
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Name(Rc::from(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Name(Rc::from(name))
    }
}

impl From<Rc<str>> for Key {
    fn from(name: Rc<str>) -> Self {
        Self::Name(name)
    }
}

/// Container storage, one variant per kind.
pub(crate) enum Store {
    Record {
        props: IndexMap<Rc<str>, Value>,
        proto: Option<Value>,
    },
    Sequence(Vec<Value>),
    Map(IndexMap<MapKey, Value>),
    Set(IndexSet<MapKey>),
}

/// Resize to `len`, filling with `Undefined`. Growth that cannot be
/// allocated is refused instead of aborting.
fn resize_sequence(items: &mut Vec<Value>, len: usize, kind: TargetKind) -> Result<()> {
    let additional = len.saturating_sub(items.len());
    items
        .try_reserve_exact(additional)
        .map_err(|_| ReactiveError::InvalidKey {
            key: format!("length = {len}"),
            kind,
        })?;
    items.resize(len, Value::Undefined);
    Ok(())
}

impl Store {
    pub(crate) fn kind(&self) -> TargetKind {
        match self {
            Self::Record { .. } => TargetKind::Record,
            Self::Sequence(_) => TargetKind::Sequence,
            Self::Map(_) => TargetKind::Map,
            Self::Set(_) => TargetKind::Set,
        }
    }

    fn name(key: &Key) -> Rc<str> {
        match key {
            Key::Name(name) => Rc::clone(name),
            Key::Index(i) => Rc::from(i.to_string()),
        }
    }

    /// Read an own property. `None` means the key is absent.
    pub(crate) fn read_own(&self, key: &Key) -> Option<Value> {
        match self {
            Self::Record { props, .. } => props.get(&*Self::name(key)).cloned(),
            Self::Sequence(items) => {
                if key.is_length() {
                    Some(Value::Number(items.len() as f64))
                } else {
                    key.as_index().and_then(|i| items.get(i).cloned())
                }
            }
            Self::Map(_) | Self::Set(_) => None,
        }
    }

    pub(crate) fn has_own(&self, key: &Key) -> bool {
        match self {
            Self::Record { props, .. } => props.contains_key(&*Self::name(key)),
            Self::Sequence(items) => {
                key.is_length() || key.as_index().is_some_and(|i| i < items.len())
            }
            Self::Map(_) | Self::Set(_) => false,
        }
    }

    pub(crate) fn write_own(&mut self, key: Key, value: Value) -> Result<()> {
        let kind = self.kind();
        match self {
            Self::Record { props, .. } => {
                props.insert(Self::name(&key), value);
                Ok(())
            }
            Self::Sequence(items) => {
                if key.is_length() {
                    let len = value
                        .as_f64()
                        .filter(|n| {
                            *n >= 0.0 && n.fract() == 0.0 && *n <= MAX_SEQUENCE_LENGTH as f64
                        })
                        .ok_or_else(|| ReactiveError::InvalidKey {
                            key: format!("length = {value:?}"),
                            kind,
                        })?;
                    resize_sequence(items, len as usize, kind)
                } else if let Some(i) = key.as_index().filter(|i| *i < MAX_SEQUENCE_LENGTH) {
                    if i >= items.len() {
                        resize_sequence(items, i + 1, kind)?;
                    }
                    items[i] = value;
                    Ok(())
                } else {
                    Err(ReactiveError::InvalidKey {
                        key: key.to_string(),
                        kind,
                    })
                }
            }
            Self::Map(_) | Self::Set(_) => Err(ReactiveError::InvalidKey {
                key: key.to_string(),
                kind,
            }),
        }
    }

    /// Delete an own property. Returns `false` when the property cannot be
    /// deleted (a sequence's `length`).
    ///
    /// Sequences are dense: a deleted element becomes `Undefined` in place
    /// and its index still counts as an own key. There are no holes.
    pub(crate) fn remove_own(&mut self, key: &Key) -> bool {
        match self {
            Self::Record { props, .. } => {
                props.shift_remove(&*Self::name(key));
                true
            }
            Self::Sequence(items) => {
                if key.is_length() {
                    return false;
                }
                if let Some(slot) = key.as_index().and_then(|i| items.get_mut(i)) {
                    *slot = Value::Undefined;
                }
                true
            }
            Self::Map(_) | Self::Set(_) => false,
        }
    }

    pub(crate) fn own_keys(&self) -> Vec<Key> {
        match self {
            Self::Record { props, .. } => props.keys().cloned().map(Key::Name).collect(),
            Self::Sequence(items) => (0..items.len()).map(Key::Index).collect(),
            Self::Map(_) | Self::Set(_) => Vec::new(),
        }
    }

    pub(crate) fn proto(&self) -> Option<Value> {
        match self {
            Self::Record { proto, .. } => proto.clone(),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Record { props, .. } => props.len(),
            Self::Sequence(items) => items.len(),
            Self::Map(entries) => entries.len(),
            Self::Set(values) => values.len(),
        }
    }
}

pub(crate) struct TargetInner {
    id: TargetId,
    store: RefCell<Store>,
    skip: Cell<bool>,
    extensible: Cell<bool>,
}

/// A raw container.
#[derive(Clone)]
pub struct Target(Rc<TargetInner>);

/// A weak handle that does not keep its target alive.
#[derive(Clone)]
pub struct WeakTarget(Weak<TargetInner>);

impl WeakTarget {
    pub fn upgrade(&self) -> Option<Target> {
        self.0.upgrade().map(Target)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl Target {
    fn with_store(store: Store) -> Self {
        Self(Rc::new(TargetInner {
            id: TargetId::next(),
            store: RefCell::new(store),
            skip: Cell::new(false),
            extensible: Cell::new(true),
        }))
    }

    /// Create an empty record.
    pub fn record() -> Self {
        Self::with_store(Store::Record {
            props: IndexMap::new(),
            proto: None,
        })
    }

    /// Create an empty record whose missing properties are looked up on
    /// `proto`. The prototype may itself be a raw target or a tracked view.
    pub fn record_with_proto(proto: impl Into<Value>) -> Self {
        Self::with_store(Store::Record {
            props: IndexMap::new(),
            proto: Some(proto.into()),
        })
    }

    /// Create a record from `(name, value)` pairs.
    pub fn record_from<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Rc<str>>,
        V: Into<Value>,
    {
        Self::with_store(Store::Record {
            props: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            proto: None,
        })
    }

    pub fn sequence() -> Self {
        Self::with_store(Store::Sequence(Vec::new()))
    }

    pub fn sequence_from<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::with_store(Store::Sequence(items.into_iter().map(Into::into).collect()))
    }

    pub fn map() -> Self {
        Self::with_store(Store::Map(IndexMap::new()))
    }

    pub fn map_from<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Self::with_store(Store::Map(
            entries
                .into_iter()
                .map(|(k, v)| (MapKey::new(k.into()), v.into()))
                .collect(),
        ))
    }

    pub fn set() -> Self {
        Self::with_store(Store::Set(IndexSet::new()))
    }

    pub fn set_from<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::with_store(Store::Set(
            values.into_iter().map(|v| MapKey::new(v.into())).collect(),
        ))
    }

    pub fn id(&self) -> TargetId {
        self.0.id
    }

    pub fn kind(&self) -> TargetKind {
        self.0.store.borrow().kind()
    }

    /// Number of properties, elements, entries or members.
    pub fn len(&self) -> usize {
        self.0.store.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exclude this target from observation. Wrapping it returns it
    /// unchanged.
    pub fn mark_raw(&self) -> &Self {
        self.0.skip.set(true);
        self
    }

    pub fn is_marked_raw(&self) -> bool {
        self.0.skip.get()
    }

    /// Forbid adding new keys. Non-extensible targets pass through wrapping
    /// unobserved.
    pub fn prevent_extensions(&self) -> &Self {
        self.0.extensible.set(false);
        self
    }

    pub fn is_extensible(&self) -> bool {
        self.0.extensible.get()
    }

    pub fn downgrade(&self) -> WeakTarget {
        WeakTarget(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Target) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn store(&self) -> Ref<'_, Store> {
        self.0.store.borrow()
    }

    pub(crate) fn store_mut(&self) -> RefMut<'_, Store> {
        self.0.store.borrow_mut()
    }

    /// Convert a key to the form this target's storage uses.
    pub(crate) fn normalize_key(&self, key: Key) -> Key {
        match (self.kind(), key) {
            (TargetKind::Sequence, Key::Name(name)) => match canonical_index(&name) {
                Some(i) => Key::Index(i),
                None => Key::Name(name),
            },
            (TargetKind::Record, Key::Index(i)) => Key::Name(Rc::from(i.to_string())),
            (_, key) => key,
        }
    }

    // ------------------------------------------------------------------
    // Untracked property access
    // ------------------------------------------------------------------

    /// Read a property, following the prototype chain. Never tracks, even
    /// when the prototype is a tracked view.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = self.normalize_key(key.into());
        let (own, proto) = {
            let store = self.store();
            (store.read_own(&key), store.proto())
        };
        match (own, proto) {
            (Some(value), _) => value,
            (None, Some(Value::Object(parent))) => parent.get(key),
            (None, Some(Value::Proxy(parent))) => parent.target().get(key),
            _ => Value::Undefined,
        }
    }

    /// Write a property without notifying anyone.
    pub fn insert(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let key = self.normalize_key(key.into());
        let mut store = self.store_mut();
        if !self.is_extensible() && !store.has_own(&key) {
            return Err(ReactiveError::NotExtensible {
                key: key.to_string(),
            });
        }
        store.write_own(key, value.into())
    }

    /// Delete a property without notifying anyone. A sequence element is
    /// overwritten with `Undefined` and stays present.
    pub fn remove(&self, key: impl Into<Key>) -> bool {
        let key = self.normalize_key(key.into());
        self.store_mut().remove_own(&key)
    }

    pub fn contains_key(&self, key: impl Into<Key>) -> bool {
        let key = self.normalize_key(key.into());
        self.store().has_own(&key)
    }

    pub fn keys(&self) -> Vec<Key> {
        self.store().own_keys()
    }

    /// Snapshot of the contained values: sequence elements, record property
    /// values, map values or set members.
    pub fn values(&self) -> Vec<Value> {
        match &*self.store() {
            Store::Record { props, .. } => props.values().cloned().collect(),
            Store::Sequence(items) => items.clone(),
            Store::Map(entries) => entries.values().cloned().collect(),
            Store::Set(values) => values.iter().map(|k| k.value().clone()).collect(),
        }
    }

    /// Snapshot of `(key, value)` entries. Record keys are returned as
    /// strings, sequence keys as numbers, set entries pair each member with
    /// itself.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        match &*self.store() {
            Store::Record { props, .. } => props
                .iter()
                .map(|(k, v)| (Value::String(Rc::clone(k)), v.clone()))
                .collect(),
            Store::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::Number(i as f64), v.clone()))
                .collect(),
            Store::Map(entries) => entries
                .iter()
                .map(|(k, v)| (k.value().clone(), v.clone()))
                .collect(),
            Store::Set(values) => values
                .iter()
                .map(|k| (k.value().clone(), k.value().clone()))
                .collect(),
        }
    }

    // ------------------------------------------------------------------
    // Untracked collection access
    // ------------------------------------------------------------------

    pub fn map_get(&self, key: &Value) -> Option<Value> {
        match &*self.store() {
            Store::Map(entries) => entries.get(&MapKey::new(key.clone())).cloned(),
            _ => None,
        }
    }

    pub fn map_insert(&self, key: impl Into<Value>, value: impl Into<Value>) -> Option<Value> {
        match &mut *self.store_mut() {
            Store::Map(entries) => entries.insert(MapKey::new(key.into()), value.into()),
            _ => None,
        }
    }

    pub fn set_insert(&self, value: impl Into<Value>) -> bool {
        match &mut *self.store_mut() {
            Store::Set(values) => values.insert(MapKey::new(value.into())),
            _ => false,
        }
    }

    /// Whether a map has the key or a set has the member.
    pub fn collection_has(&self, key: &Value) -> bool {
        let key = MapKey::new(key.clone());
        match &*self.store() {
            Store::Map(entries) => entries.contains_key(&key),
            Store::Set(values) => values.contains(&key),
            _ => false,
        }
    }

    pub fn collection_remove(&self, key: &Value) -> bool {
        let key = MapKey::new(key.clone());
        match &mut *self.store_mut() {
            Store::Map(entries) => entries.shift_remove(&key).is_some(),
            Store::Set(values) => values.shift_remove(&key),
            _ => false,
        }
    }

    pub fn clear(&self) {
        match &mut *self.store_mut() {
            Store::Record { props, .. } => props.clear(),
            Store::Sequence(items) => items.clear(),
            Store::Map(entries) => entries.clear(),
            Store::Set(values) => values.clear(),
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Target {}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({}{})", self.kind(), self.id())
    }
}
