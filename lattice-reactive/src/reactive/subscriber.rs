//! Subscriber bookkeeping.
//!
//! A [`Dep`] is the set of effects subscribed to one reactive key: one
//! `(target, key)` pair, or the single value of a ref or computed. Besides
//! the set itself it carries two generation bitmasks used while an effect
//! runs:
//!
//! - `w` ("was tracked"): set on every dep the effect held before the run.
//! - `n` ("newly tracked"): set on every dep the run reads.
//!
//! Each bit stands for one effect-nesting depth, so nested runs reconcile
//! independently. After the run, deps with `w` but not `n` are dropped from
//! the effect and the effect is dropped from them. Nothing else is rebuilt.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::effect::Effect;
use crate::graph::{Key, MapKey};

/// Unique identifier for an effect.
///
/// Effects are deduplicated by this ID when several deps notify the same
/// effect for one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    /// Generate a new unique effect ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of read being tracked. Only used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

/// The kind of mutation being triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
}

/// The key a dep is registered under within one target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackKey {
    /// A record property or sequence element/length.
    Prop(Key),
    /// A map key or set member.
    Entry(MapKey),
    /// Enumeration of keys and values. Invalidated by adds and deletes.
    Iterate,
    /// Enumeration of map keys only. Not invalidated by value changes.
    MapKeyIterate,
}

impl TrackKey {
    pub fn length() -> Self {
        Self::Prop(Key::length())
    }

    pub fn is_length(&self) -> bool {
        matches!(self, Self::Prop(key) if key.is_length())
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Self::Prop(Key::Index(_)))
    }
}

struct DepInner {
    effects: RefCell<IndexMap<EffectId, Effect>>,
    w: Cell<u32>,
    n: Cell<u32>,
}

/// A subscriber set with generation markers.
#[derive(Clone)]
pub struct Dep(Rc<DepInner>);

impl Dep {
    pub fn new() -> Self {
        Self(Rc::new(DepInner {
            effects: RefCell::new(IndexMap::new()),
            w: Cell::new(0),
            n: Cell::new(0),
        }))
    }

    pub(crate) fn was_tracked(&self, bit: u32) -> bool {
        self.0.w.get() & bit != 0
    }

    pub(crate) fn new_tracked(&self, bit: u32) -> bool {
        self.0.n.get() & bit != 0
    }

    pub(crate) fn mark_was_tracked(&self, bit: u32) {
        self.0.w.set(self.0.w.get() | bit);
    }

    pub(crate) fn mark_new_tracked(&self, bit: u32) {
        self.0.n.set(self.0.n.get() | bit);
    }

    pub(crate) fn clear_markers(&self, bit: u32) {
        self.0.w.set(self.0.w.get() & !bit);
        self.0.n.set(self.0.n.get() & !bit);
    }

    pub fn contains(&self, effect: &Effect) -> bool {
        self.0.effects.borrow().contains_key(&effect.id())
    }

    pub(crate) fn insert(&self, effect: Effect) {
        self.0.effects.borrow_mut().insert(effect.id(), effect);
    }

    pub(crate) fn remove(&self, effect: &Effect) {
        self.0.effects.borrow_mut().shift_remove(&effect.id());
    }

    /// Copy of the current subscribers, in subscription order.
    pub(crate) fn snapshot(&self) -> Vec<Effect> {
        self.0.effects.borrow().values().cloned().collect()
    }

    /// Number of subscribed effects.
    pub fn len(&self) -> usize {
        self.0.effects.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ptr_eq(&self, other: &Dep) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("subscribers", &self.len())
            .field("w", &format_args!("{:#b}", self.0.w.get()))
            .field("n", &format_args!("{:#b}", self.0.n.get()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_ids_are_unique() {
        let id1 = EffectId::new();
        let id2 = EffectId::new();
        let id3 = EffectId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn markers_are_independent_per_bit() {
        let dep = Dep::new();
        dep.mark_was_tracked(1 << 1);
        dep.mark_new_tracked(1 << 2);

        assert!(dep.was_tracked(1 << 1));
        assert!(!dep.was_tracked(1 << 2));
        assert!(dep.new_tracked(1 << 2));

        dep.clear_markers(1 << 1);
        assert!(!dep.was_tracked(1 << 1));
        assert!(dep.new_tracked(1 << 2));
    }

    #[test]
    fn length_key_helpers() {
        assert!(TrackKey::length().is_length());
        assert!(TrackKey::Prop(Key::Index(0)).is_index());
        assert!(!TrackKey::Iterate.is_length());
    }
}
