//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when it is
//! read after one of its dependencies changed.
//!
//! # How Computeds Work
//!
//! 1. The getter runs inside an [`Effect`] owned by the computed. Its reads
//!    are tracked like any other effect's.
//!
//! 2. When a dependency changes, the effect's scheduler runs instead of the
//!    getter. It only marks the computed dirty and notifies the computed's
//!    own subscribers.
//!
//! 3. Reading the value tracks the computed and, only if it is dirty,
//!    re-runs the getter and caches the result.
//!
//! # Why This Matters
//!
//! A computed that nobody reads after a change never recomputes, and one
//! read many times between changes computes once.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::effect::{Effect, SchedulerFn};
use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::Dep;
use crate::error::ReactiveError;
use crate::graph::Value;

struct ComputedInner {
    runtime: WeakRuntime,
    effect: Effect,
    dep: Dep,
    value: RefCell<Value>,
    dirty: Cell<bool>,
    setter: Option<Box<dyn Fn(Value)>>,
}

/// A lazily recomputed, memoized value.
///
/// Cloning a `Computed` produces another handle to the same cache.
#[derive(Clone)]
pub struct Computed(Rc<ComputedInner>);

impl Computed {
    fn new(runtime: &Runtime, getter: Box<dyn Fn() -> Value>, setter: Option<Box<dyn Fn(Value)>>) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner>| {
            let weak = weak.clone();
            let scheduler: SchedulerFn = Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Computed(inner).invalidate();
                }
            });
            let effect = Effect::new(runtime, getter, Some(scheduler), None);
            effect.mark_computed();
            ComputedInner {
                runtime: runtime.downgrade(),
                effect,
                dep: Dep::new(),
                value: RefCell::new(Value::Undefined),
                dirty: Cell::new(true),
                setter,
            }
        });
        Self(inner)
    }

    fn invalidate(&self) {
        if self.0.dirty.get() {
            return;
        }
        self.0.dirty.set(true);
        if let Some(runtime) = self.0.runtime.upgrade() {
            runtime.trigger_dep(&self.0.dep);
        }
    }

    /// Read the value, tracking the computed and recomputing if dirty.
    pub fn get(&self) -> Value {
        if let Some(runtime) = self.0.runtime.upgrade() {
            runtime.track_dep(&self.0.dep);
        }
        if self.0.dirty.get() {
            self.0.dirty.set(false);
            let value = self.0.effect.run();
            *self.0.value.borrow_mut() = value;
        }
        self.0.value.borrow().clone()
    }

    /// Read the value without tracking the computed itself.
    pub fn peek(&self) -> Value {
        match self.0.runtime.upgrade() {
            Some(runtime) => runtime.untracked(|| self.get()),
            None => self.get(),
        }
    }

    /// Call the setter. Without one, warns and returns `false`.
    pub fn set(&self, value: impl Into<Value>) -> bool {
        match &self.0.setter {
            Some(setter) => {
                setter(value.into());
                true
            }
            None => {
                match self.0.runtime.upgrade() {
                    Some(runtime) => runtime.warn(ReactiveError::ReadonlyComputed),
                    None => tracing::warn!(error = %ReactiveError::ReadonlyComputed, "reactivity warning"),
                }
                false
            }
        }
    }

    /// Whether the next read recomputes.
    pub fn is_dirty(&self) -> bool {
        self.0.dirty.get()
    }

    pub fn is_readonly(&self) -> bool {
        self.0.setter.is_none()
    }

    /// The effect running the getter. Stopping it freezes the computed.
    pub fn effect(&self) -> &Effect {
        &self.0.effect
    }

    /// Number of effects subscribed to this computed.
    pub fn subscriber_count(&self) -> usize {
        self.0.dep.len()
    }

    pub fn ptr_eq(&self, other: &Computed) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("value", &*self.0.value.borrow())
            .field("dirty", &self.is_dirty())
            .field("readonly", &self.is_readonly())
            .finish()
    }
}

impl Runtime {
    /// Create a readonly computed. The getter first runs on the first read.
    pub fn computed<F, V>(&self, getter: F) -> Computed
    where
        F: Fn() -> V + 'static,
        V: Into<Value>,
    {
        Computed::new(self, Box::new(move || getter().into()), None)
    }

    /// Create a computed whose writes are forwarded to `setter`.
    pub fn writable_computed<F, V, S>(&self, getter: F, setter: S) -> Computed
    where
        F: Fn() -> V + 'static,
        V: Into<Value>,
        S: Fn(Value) + 'static,
    {
        Computed::new(
            self,
            Box::new(move || getter().into()),
            Some(Box::new(setter)),
        )
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::EffectOptions;

    fn counted(rt: &Runtime, source: &crate::reactive::Ref) -> (Computed, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let (c, s) = (calls.clone(), source.clone());
        let doubled = rt.computed(move || {
            c.set(c.get() + 1);
            s.get().as_f64().unwrap_or(0.0) * 2.0
        });
        (doubled, calls)
    }

    #[test]
    fn computes_on_first_access() {
        let rt = Runtime::new();
        let source = rt.ref_value(1);
        let (doubled, calls) = counted(&rt, &source);

        // Not computed yet
        assert!(doubled.is_dirty());
        assert_eq!(calls.get(), 0);

        assert_eq!(doubled.get(), Value::from(2));
        assert_eq!(calls.get(), 1);
        assert!(!doubled.is_dirty());
    }

    #[test]
    fn caches_until_a_dependency_changes() {
        let rt = Runtime::new();
        let source = rt.ref_value(1);
        let (doubled, calls) = counted(&rt, &source);

        doubled.get();
        doubled.get();
        doubled.get();
        assert_eq!(calls.get(), 1);

        source.set(5);
        // Invalidated, but not recomputed until read.
        assert!(doubled.is_dirty());
        assert_eq!(calls.get(), 1);

        assert_eq!(doubled.get(), Value::from(10));
        assert_eq!(doubled.get(), Value::from(10));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn effects_reading_a_computed_rerun() {
        let rt = Runtime::new();
        let source = rt.ref_value(1);
        let (doubled, _) = counted(&rt, &source);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let (d, s) = (doubled.clone(), seen.clone());
        rt.effect(move || s.borrow_mut().push(d.get()), EffectOptions::default());

        source.set(2);
        assert_eq!(*seen.borrow(), vec![Value::from(2), Value::from(4)]);
    }

    #[test]
    fn computed_chains_stay_lazy() {
        let rt = Runtime::new();
        let source = rt.ref_value(1);
        let (doubled, calls) = counted(&rt, &source);
        let d = doubled.clone();
        let quadrupled = rt.computed(move || d.get().as_f64().unwrap_or(0.0) * 2.0);

        assert_eq!(quadrupled.get(), Value::from(4));
        source.set(3);
        source.set(4);
        assert!(quadrupled.is_dirty());
        assert_eq!(calls.get(), 1);
        assert_eq!(quadrupled.get(), Value::from(16));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn readonly_computed_rejects_writes() {
        let rt = Runtime::new();
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let w = warnings.clone();
        rt.set_warn_handler(move |err| w.borrow_mut().push(err.clone()));

        let c = rt.computed(|| 1);
        assert!(!c.set(2));
        assert_eq!(*warnings.borrow(), vec![ReactiveError::ReadonlyComputed]);
    }

    #[test]
    fn writable_computed_forwards_to_setter() {
        let rt = Runtime::new();
        let source = rt.ref_value(1);
        let (get_src, set_src) = (source.clone(), source.clone());
        let plus_one = rt.writable_computed(
            move || get_src.get().as_f64().unwrap_or(0.0) + 1.0,
            move |value| set_src.set(value.as_f64().unwrap_or(0.0) - 1.0),
        );

        assert!(plus_one.set(10));
        assert_eq!(source.peek(), Value::from(9));
        assert_eq!(plus_one.get(), Value::from(10));
    }

    #[test]
    fn stopped_computed_recomputes_untracked() {
        let rt = Runtime::new();
        let source = rt.ref_value(1);
        let (doubled, calls) = counted(&rt, &source);
        doubled.get();

        doubled.effect().stop();
        source.set(2);
        // No longer invalidated.
        assert!(!doubled.is_dirty());
        assert_eq!(doubled.get(), Value::from(2));
        assert_eq!(calls.get(), 1);
    }
}
