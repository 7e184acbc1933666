//! Effect Implementation
//!
//! An Effect is a re-runnable computation that re-executes whenever a value
//! it read during its last run changes.
//!
//! # How Effects Work
//!
//! 1. Running the effect pushes it onto the runtime's effect stack. Every
//!    tracked read made while it is on top subscribes it to that key.
//!
//! 2. When a subscribed key changes, the effect's scheduler is invoked if it
//!    has one, otherwise the effect runs again synchronously.
//!
//! 3. Each run reconciles the dependency list incrementally: deps read
//!    again are kept, deps no longer read are dropped, new ones are added.
//!
//! # Differences from Computed
//!
//! - Computeds return a cached value; effects just run.
//! - Computeds are lazy (recompute on access); effects re-run when notified.
//! - Computeds are notified before effects during a trigger, so an effect
//!   reading a computed always sees the invalidated state.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::context::EffectFrame;
use super::runtime::{Runtime, WeakRuntime};
use super::scope::{EffectScope, WeakScope};
use super::subscriber::{Dep, EffectId};
use crate::graph::Value;

/// Callback invoked instead of re-running the effect when it is notified.
pub type SchedulerFn = Rc<dyn Fn()>;

pub(crate) struct EffectInner {
    id: EffectId,
    runtime: WeakRuntime,
    func: Box<dyn Fn() -> Value>,
    scheduler: RefCell<Option<SchedulerFn>>,
    active: Cell<bool>,
    deps: RefCell<Vec<Dep>>,
    allow_recurse: Cell<bool>,
    computed: Cell<bool>,
    on_stop: RefCell<Option<Box<dyn FnOnce()>>>,
    scope: RefCell<Option<WeakScope>>,
    run_count: Cell<usize>,
}

/// A re-runnable computation with dependency bookkeeping.
///
/// Cloning an `Effect` produces another handle to the same computation.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let count = rt.ref_value(0);
///
/// let c = count.clone();
/// let effect = rt.effect(move || println!("count is {:?}", c.get()), Default::default());
///
/// count.set(5); // prints "count is 5"
/// effect.stop();
/// count.set(6); // prints nothing
/// ```
#[derive(Clone)]
pub struct Effect(Rc<EffectInner>);

/// A weak handle that does not keep its effect alive.
#[derive(Clone)]
pub struct WeakEffect(Weak<EffectInner>);

impl WeakEffect {
    pub fn upgrade(&self) -> Option<Effect> {
        self.0.upgrade().map(Effect)
    }
}

/// Options accepted by [`Runtime::effect`].
#[derive(Default)]
pub struct EffectOptions {
    /// Do not run on creation.
    pub lazy: bool,
    /// Called instead of re-running when a dependency changes.
    pub scheduler: Option<SchedulerFn>,
    /// Scope to register with. Defaults to the active scope, if any.
    pub scope: Option<EffectScope>,
    /// Allow the effect to be notified by its own writes while it runs.
    pub allow_recurse: bool,
    /// Called once when the effect is stopped.
    pub on_stop: Option<Box<dyn FnOnce()>>,
}

impl EffectOptions {
    pub fn with_scheduler(mut self, scheduler: impl Fn() + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    pub fn with_on_stop(mut self, on_stop: impl FnOnce() + 'static) -> Self {
        self.on_stop = Some(Box::new(on_stop));
        self
    }
}

impl Effect {
    /// Create an effect without running it, registered with `scope` or else
    /// the runtime's active scope.
    pub(crate) fn new(
        runtime: &Runtime,
        func: Box<dyn Fn() -> Value>,
        scheduler: Option<SchedulerFn>,
        scope: Option<EffectScope>,
    ) -> Self {
        let effect = Self(Rc::new(EffectInner {
            id: EffectId::new(),
            runtime: runtime.downgrade(),
            func,
            scheduler: RefCell::new(scheduler),
            active: Cell::new(true),
            deps: RefCell::new(Vec::new()),
            allow_recurse: Cell::new(false),
            computed: Cell::new(false),
            on_stop: RefCell::new(None),
            scope: RefCell::new(None),
            run_count: Cell::new(0),
        }));
        if let Some(scope) = scope.or_else(|| runtime.current_scope()) {
            scope.record_effect(&effect);
        }
        effect
    }

    pub fn id(&self) -> EffectId {
        self.0.id
    }

    /// Run the computation, re-collecting its dependencies.
    ///
    /// A stopped effect still runs its function, but tracks nothing. An
    /// effect that is already running (directly or further up the stack)
    /// is not re-entered and yields `Undefined`.
    pub fn run(&self) -> Value {
        let Some(runtime) = self.0.runtime.upgrade() else {
            return (self.0.func)();
        };
        if !self.is_active() {
            return (self.0.func)();
        }
        if runtime.inner.context.is_running(self) {
            return Value::Undefined;
        }
        let _frame = EffectFrame::enter(&runtime, self);
        self.0.run_count.set(self.0.run_count.get() + 1);
        (self.0.func)()
    }

    /// Unsubscribe from every dep and deactivate. Idempotent.
    pub fn stop(&self) {
        if !self.0.active.get() {
            return;
        }
        self.cleanup_deps();
        self.0.active.set(false);
        let on_stop = self.0.on_stop.borrow_mut().take();
        if let Some(on_stop) = on_stop {
            on_stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    /// Number of completed or in-progress tracked runs.
    pub fn run_count(&self) -> usize {
        self.0.run_count.get()
    }

    /// Number of deps the effect is currently subscribed to.
    pub fn dependency_count(&self) -> usize {
        self.0.deps.borrow().len()
    }

    pub fn allows_recurse(&self) -> bool {
        self.0.allow_recurse.get()
    }

    pub fn set_allow_recurse(&self, allow: bool) {
        self.0.allow_recurse.set(allow);
    }

    pub fn set_scheduler(&self, scheduler: impl Fn() + 'static) {
        *self.0.scheduler.borrow_mut() = Some(Rc::new(scheduler));
    }

    pub fn set_on_stop(&self, on_stop: impl FnOnce() + 'static) {
        *self.0.on_stop.borrow_mut() = Some(Box::new(on_stop));
    }

    pub(crate) fn scheduler(&self) -> Option<SchedulerFn> {
        self.0.scheduler.borrow().clone()
    }

    pub(crate) fn is_computed(&self) -> bool {
        self.0.computed.get()
    }

    pub(crate) fn mark_computed(&self) {
        self.0.computed.set(true);
    }

    pub(crate) fn set_scope(&self, scope: Option<WeakScope>) {
        *self.0.scope.borrow_mut() = scope;
    }

    /// Remove the effect from the scope it was registered with.
    pub(crate) fn detach_from_scope(&self) {
        let scope = self.0.scope.borrow_mut().take();
        if let Some(scope) = scope.and_then(|s| s.upgrade()) {
            scope.remove_effect(self);
        }
    }

    pub(crate) fn push_dep(&self, dep: Dep) {
        self.0.deps.borrow_mut().push(dep);
    }

    pub(crate) fn init_dep_markers(&self, bit: u32) {
        for dep in self.0.deps.borrow().iter() {
            dep.mark_was_tracked(bit);
        }
    }

    /// Drop deps that were tracked before the run but not during it, then
    /// clear this depth's bit on every remaining dep.
    pub(crate) fn finalize_dep_markers(&self, bit: u32) {
        let mut deps = self.0.deps.borrow_mut();
        deps.retain(|dep| {
            let stale = dep.was_tracked(bit) && !dep.new_tracked(bit);
            if stale {
                dep.remove(self);
            }
            dep.clear_markers(bit);
            !stale
        });
    }

    pub(crate) fn cleanup_deps(&self) {
        let deps = std::mem::take(&mut *self.0.deps.borrow_mut());
        for dep in deps {
            dep.remove(self);
        }
    }

    pub fn downgrade(&self) -> WeakEffect {
        WeakEffect(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Effect) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.0.id.raw())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Runtime {
    /// Create an effect. Unless `options.lazy` is set it runs once
    /// immediately to collect its dependencies.
    pub fn effect<F, V>(&self, f: F, options: EffectOptions) -> Effect
    where
        F: Fn() -> V + 'static,
        V: Into<Value>,
    {
        let effect = Effect::new(
            self,
            Box::new(move || f().into()),
            options.scheduler,
            options.scope,
        );
        effect.set_allow_recurse(options.allow_recurse);
        if let Some(on_stop) = options.on_stop {
            effect.set_on_stop(on_stop);
        }
        if !options.lazy {
            effect.run();
        }
        effect
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_runs_on_creation() {
        let rt = Runtime::new();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();

        let effect = rt.effect(move || r.set(r.get() + 1), EffectOptions::default());

        // Effect should have run once on creation
        assert_eq!(runs.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn lazy_effect_does_not_run_on_creation() {
        let rt = Runtime::new();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();

        let effect = rt.effect(
            move || r.set(r.get() + 1),
            EffectOptions {
                lazy: true,
                ..Default::default()
            },
        );
        assert_eq!(runs.get(), 0);

        effect.run();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn run_returns_the_function_value() {
        let rt = Runtime::new();
        let effect = rt.effect(
            || 42,
            EffectOptions {
                lazy: true,
                ..Default::default()
            },
        );
        assert_eq!(effect.run(), Value::from(42));
    }

    #[test]
    fn changed_ref_reruns_effect() {
        let rt = Runtime::new();
        let count = rt.ref_value(1);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (c, s) = (count.clone(), seen.clone());
        rt.effect(move || s.borrow_mut().push(c.get()), EffectOptions::default());

        count.set(2);
        count.set(2);
        assert_eq!(*seen.borrow(), vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn stopped_effect_leaves_every_dep() {
        let rt = Runtime::new();
        let a = rt.ref_value(1);
        let b = rt.ref_value(2);
        let runs = Rc::new(Cell::new(0));

        let (ac, bc, r) = (a.clone(), b.clone(), runs.clone());
        let effect = rt.effect(
            move || {
                r.set(r.get() + 1);
                ac.get();
                bc.get();
            },
            EffectOptions::default(),
        );
        assert_eq!(effect.dependency_count(), 2);
        assert_eq!(a.subscriber_count(), 1);

        effect.stop();
        assert!(!effect.is_active());
        assert_eq!(effect.dependency_count(), 0);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 0);

        a.set(10);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn stop_calls_on_stop_once() {
        let rt = Runtime::new();
        let stopped = Rc::new(Cell::new(0));
        let s = stopped.clone();
        let effect = rt.effect(
            || (),
            EffectOptions::default().with_on_stop(move || s.set(s.get() + 1)),
        );

        effect.stop();
        effect.stop();
        assert_eq!(stopped.get(), 1);
    }

    #[test]
    fn scheduler_replaces_synchronous_rerun() {
        let rt = Runtime::new();
        let count = rt.ref_value(0);
        let runs = Rc::new(Cell::new(0));
        let scheduled = Rc::new(Cell::new(0));

        let (c, r, s) = (count.clone(), runs.clone(), scheduled.clone());
        rt.effect(
            move || {
                r.set(r.get() + 1);
                c.get()
            },
            EffectOptions::default().with_scheduler(move || s.set(s.get() + 1)),
        );

        count.set(1);
        assert_eq!(runs.get(), 1);
        assert_eq!(scheduled.get(), 1);
    }

    #[test]
    fn self_write_does_not_recurse_by_default() {
        let rt = Runtime::new();
        let count = rt.ref_value(0);
        let runs = Rc::new(Cell::new(0));

        let (c, r) = (count.clone(), runs.clone());
        rt.effect(
            move || {
                r.set(r.get() + 1);
                let next = c.get().as_f64().unwrap_or(0.0) + 1.0;
                c.set(next);
            },
            EffectOptions::default(),
        );

        assert_eq!(runs.get(), 1);
        assert_eq!(count.peek(), Value::from(1));
    }

    #[test]
    fn clone_shares_state() {
        let rt = Runtime::new();
        let e1 = rt.effect(|| (), EffectOptions::default());
        let e2 = e1.clone();

        assert_eq!(e1.id(), e2.id());
        assert!(e1.ptr_eq(&e2));

        e1.run();
        assert_eq!(e2.run_count(), 2);

        e1.stop();
        assert!(!e2.is_active());
    }
}
