//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects targets, refs,
//! computeds, effects and the scheduler. It owns the dependency registry and
//! decides, for every mutation, which effects must be notified.
//!
//! # How It Works
//!
//! 1. A tracked read calls [`Runtime::track`], which looks up (or creates)
//!    the [`Dep`] for the `(target, key)` pair and subscribes the running
//!    effect to it.
//!
//! 2. A write calls [`Runtime::trigger`], which selects the deps the
//!    mutation can affect:
//!    a. `Clear` selects every dep of the target
//!    b. a sequence `length` write selects `length` and every index at or
//!       past the new length
//!    c. otherwise the key's own dep plus the iteration sentinels the
//!       mutation kind invalidates for the container kind
//!
//! 3. The selected subscribers are copied out, deduplicated, and notified:
//!    computeds first, then plain effects.
//!
//! # Ownership
//!
//! A `Runtime` is a cheap handle around shared state. Everything created
//! from it holds a weak handle back, so dropping the last `Runtime` makes
//! further tracking a no-op instead of keeping the state alive.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::context::{ExecutionContext, TrackingPause};
use super::effect::Effect;
use super::subscriber::{Dep, EffectId, TrackKey, TrackOp, TriggerOp};
use crate::config::RuntimeConfig;
use crate::error::{ErrorCode, ReactiveError, Result};
use crate::graph::{Key, ProxyRegistry, Target, TargetId, TargetKind, Value, WeakTarget};
use crate::scheduler::SchedulerState;

/// Callback receiving runtime diagnostics.
pub type DiagnosticHandler = Rc<dyn Fn(&ReactiveError)>;

struct TargetDeps {
    target: WeakTarget,
    keys: IndexMap<TrackKey, Dep>,
}

/// target -> key -> dep.
#[derive(Default)]
struct DepRegistry {
    targets: HashMap<TargetId, TargetDeps>,
    inserts_since_sweep: usize,
}

impl DepRegistry {
    fn sweep(&mut self) -> usize {
        let before = self.targets.len();
        self.targets.retain(|_, entry| entry.target.is_alive());
        self.inserts_since_sweep = 0;
        before - self.targets.len()
    }
}

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) context: ExecutionContext,
    pub(crate) proxies: RefCell<ProxyRegistry>,
    pub(crate) scheduler: SchedulerState,
    deps: RefCell<DepRegistry>,
    warn_handler: RefCell<Option<DiagnosticHandler>>,
    error_handler: RefCell<Option<DiagnosticHandler>>,
}

/// Handle to a reactive runtime.
///
/// Runtimes are fully isolated from each other: an effect of one runtime
/// never tracks reads made through views of another.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

/// A weak handle that does not keep its runtime alive.
#[derive(Clone)]
pub struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::from_valid_config(RuntimeConfig::default())
    }

    /// Create a runtime with a custom configuration.
    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                context: ExecutionContext::new(),
                proxies: RefCell::new(ProxyRegistry::default()),
                scheduler: SchedulerState::new(),
                deps: RefCell::new(DepRegistry::default()),
                warn_handler: RefCell::new(None),
                error_handler: RefCell::new(None),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Rc::downgrade(&self.inner))
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Tracking control
    // ------------------------------------------------------------------

    /// Whether a read right now would subscribe an effect.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.is_tracking()
    }

    /// The innermost running effect.
    pub fn active_effect(&self) -> Option<Effect> {
        self.inner.context.active_effect()
    }

    /// Stop tracking reads until the matching [`reset_tracking`](Self::reset_tracking).
    pub fn pause_tracking(&self) {
        self.inner.context.pause_tracking();
    }

    /// Track reads until the matching [`reset_tracking`](Self::reset_tracking).
    pub fn enable_tracking(&self) {
        self.inner.context.enable_tracking();
    }

    /// Restore the tracking state saved by the last pause or enable.
    pub fn reset_tracking(&self) {
        self.inner.context.reset_tracking();
    }

    /// Run `f` without tracking any of its reads.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _pause = TrackingPause::enter(self);
        f()
    }

    // ------------------------------------------------------------------
    // Track / trigger
    // ------------------------------------------------------------------

    /// Subscribe the running effect to `key` of `target`.
    pub fn track(&self, target: &Target, op: TrackOp, key: TrackKey) {
        if !self.is_tracking() {
            return;
        }
        tracing::trace!(target_id = %target.id(), ?op, ?key, "track");
        let dep = self.dep_for(target, key);
        self.track_dep(&dep);
    }

    fn dep_for(&self, target: &Target, key: TrackKey) -> Dep {
        let mut registry = self.inner.deps.borrow_mut();
        if !registry.targets.contains_key(&target.id()) {
            let interval = self.inner.config.registry_sweep_interval;
            registry.inserts_since_sweep += 1;
            if interval > 0 && registry.inserts_since_sweep >= interval {
                let removed = registry.sweep();
                tracing::debug!(removed, "swept dependency registry");
            }
        }
        let entry = registry
            .targets
            .entry(target.id())
            .or_insert_with(|| TargetDeps {
                target: target.downgrade(),
                keys: IndexMap::new(),
            });
        entry.keys.entry(key).or_default().clone()
    }

    /// Subscribe the running effect to `dep` using the generation markers
    /// of the current depth, or a set-membership check beyond the marker
    /// depth.
    pub(crate) fn track_dep(&self, dep: &Dep) {
        let context = &self.inner.context;
        if !context.is_tracking() {
            return;
        }
        let Some(effect) = context.active_effect() else {
            return;
        };
        let should_track = if self.uses_markers(context.depth()) {
            let bit = context.op_bit();
            if dep.new_tracked(bit) {
                false
            } else {
                dep.mark_new_tracked(bit);
                !dep.was_tracked(bit)
            }
        } else {
            !dep.contains(&effect)
        };
        if should_track {
            dep.insert(effect.clone());
            effect.push_dep(dep.clone());
        }
    }

    /// Whether effects running at `depth` reconcile their deps with
    /// generation markers. Deeper effects clear their deps on entry instead.
    pub(crate) fn uses_markers(&self, depth: u32) -> bool {
        depth <= self.inner.config.max_marker_depth
    }

    /// Notify the effects a mutation of `target` can affect.
    ///
    /// `key` is `None` only for `Clear`. `new_value` is the written value,
    /// needed to find the indices a sequence `length` write cuts off.
    pub fn trigger(
        &self,
        target: &Target,
        op: TriggerOp,
        key: Option<TrackKey>,
        new_value: Option<&Value>,
    ) {
        let deps = {
            let registry = self.inner.deps.borrow();
            let Some(entry) = registry.targets.get(&target.id()) else {
                return;
            };
            select_deps(&entry.keys, target.kind(), op, key.as_ref(), new_value)
        };
        if deps.is_empty() {
            return;
        }

        let mut effects: IndexMap<EffectId, Effect> = IndexMap::new();
        for dep in &deps {
            for effect in dep.snapshot() {
                effects.entry(effect.id()).or_insert(effect);
            }
        }
        tracing::trace!(
            target_id = %target.id(),
            ?op,
            ?key,
            effects = effects.len(),
            "trigger"
        );
        self.trigger_effects(effects.into_values().collect());
    }

    /// Notify every subscriber of a single-value dep.
    pub(crate) fn trigger_dep(&self, dep: &Dep) {
        self.trigger_effects(dep.snapshot());
    }

    fn trigger_effects(&self, effects: Vec<Effect>) {
        let active = self.active_effect();
        let (computed, plain): (Vec<_>, Vec<_>) =
            effects.into_iter().partition(|e| e.is_computed());
        for effect in computed.iter().chain(plain.iter()) {
            if !effect.is_active() {
                continue;
            }
            let running = active.as_ref().is_some_and(|a| a.ptr_eq(effect));
            if running && !effect.allows_recurse() {
                continue;
            }
            match effect.scheduler() {
                Some(scheduler) => scheduler(),
                None => {
                    effect.run();
                }
            }
        }
    }

    /// Number of effects subscribed to `key` of `target`.
    pub fn subscriber_count(&self, target: &Target, key: &TrackKey) -> usize {
        self.inner
            .deps
            .borrow()
            .targets
            .get(&target.id())
            .and_then(|entry| entry.keys.get(key))
            .map_or(0, Dep::len)
    }

    /// Number of targets with at least one registered dep.
    pub fn tracked_target_count(&self) -> usize {
        self.inner.deps.borrow().targets.len()
    }

    /// Drop registry entries whose target no longer exists. Returns how many
    /// were removed.
    ///
    /// A live subscriber keeps its target alive: the dep holds the effect,
    /// and the effect's closure usually holds the view and so the target.
    /// Such targets are never reclaimed here. Entries go away once every
    /// effect capturing their target has been stopped and dropped, or when
    /// the effects hold the target only weakly.
    pub fn collect_garbage(&self) -> usize {
        // Deps dropped here may own the last handles to effects and their
        // closures, so release the borrow before they drop.
        let dropped: Vec<TargetDeps> = {
            let mut registry = self.inner.deps.borrow_mut();
            let dead: Vec<TargetId> = registry
                .targets
                .iter()
                .filter(|(_, entry)| !entry.target.is_alive())
                .map(|(id, _)| *id)
                .collect();
            registry.inserts_since_sweep = 0;
            dead.iter()
                .filter_map(|id| registry.targets.remove(id))
                .collect()
        };
        let removed = dropped.len();
        drop(dropped);
        tracing::debug!(removed, "collected dependency registry");
        removed
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Install a handler for usage and type warnings.
    pub fn set_warn_handler(&self, handler: impl Fn(&ReactiveError) + 'static) {
        *self.inner.warn_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Install a handler for panics caught in user callbacks.
    pub fn set_error_handler(&self, handler: impl Fn(&ReactiveError) + 'static) {
        *self.inner.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Report a non-fatal diagnostic.
    pub fn warn(&self, error: ReactiveError) {
        tracing::warn!(%error, "reactivity warning");
        let handler = self.inner.warn_handler.borrow().clone();
        if let Some(handler) = handler {
            handler(&error);
        }
    }

    pub(crate) fn handle_error(&self, error: ReactiveError) {
        tracing::error!(%error, code = ?error.code(), "unhandled error in callback");
        let handler = self.inner.error_handler.borrow().clone();
        if let Some(handler) = handler {
            handler(&error);
        }
    }

    /// Call `f`, turning a panic into a [`ReactiveError::Callback`] report.
    /// Returns `None` when `f` panicked.
    pub(crate) fn call_with_error_handling<R>(
        &self,
        code: ErrorCode,
        f: impl FnOnce() -> R,
    ) -> Option<R> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Some(value),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                self.handle_error(ReactiveError::Callback { code, message });
                None
            }
        }
    }
}

fn select_deps(
    keys: &IndexMap<TrackKey, Dep>,
    kind: TargetKind,
    op: TriggerOp,
    key: Option<&TrackKey>,
    new_value: Option<&Value>,
) -> SmallVec<[Dep; 4]> {
    let mut deps = SmallVec::new();
    let mut push = |k: &TrackKey| {
        if let Some(dep) = keys.get(k) {
            deps.push(dep.clone());
        }
    };

    if op == TriggerOp::Clear {
        return keys.values().cloned().collect();
    }

    if kind == TargetKind::Sequence && key.is_some_and(TrackKey::is_length) {
        let new_len = new_value.and_then(Value::as_f64).unwrap_or(0.0);
        return keys
            .iter()
            .filter(|(k, _)| match k {
                TrackKey::Prop(Key::Index(i)) => *i as f64 >= new_len,
                k => k.is_length(),
            })
            .map(|(_, dep)| dep.clone())
            .collect();
    }

    if let Some(key) = key {
        push(key);
    }
    match (op, kind) {
        (TriggerOp::Add, TargetKind::Sequence) => {
            if key.is_some_and(TrackKey::is_index) {
                push(&TrackKey::length());
            }
        }
        (TriggerOp::Add | TriggerOp::Delete, TargetKind::Map) => {
            push(&TrackKey::Iterate);
            push(&TrackKey::MapKeyIterate);
        }
        (TriggerOp::Add | TriggerOp::Delete, TargetKind::Record | TargetKind::Set) => {
            push(&TrackKey::Iterate);
        }
        (TriggerOp::Set, TargetKind::Map) => push(&TrackKey::Iterate),
        _ => {}
    }
    deps
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("tracked_targets", &self.tracked_target_count())
            .field("effect_depth", &self.inner.context.depth())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::EffectOptions;
    use std::cell::Cell;

    fn counting_effect(rt: &Runtime, target: &Target, key: TrackKey) -> Rc<Cell<usize>> {
        let runs = Rc::new(Cell::new(0));
        let (r, t, rt2) = (runs.clone(), target.clone(), rt.clone());
        rt.effect(
            move || {
                r.set(r.get() + 1);
                rt2.track(&t, TrackOp::Get, key.clone());
            },
            EffectOptions::default(),
        );
        runs
    }

    #[test]
    fn trigger_without_track_is_a_no_op() {
        let rt = Runtime::new();
        let target = Target::record();
        rt.trigger(&target, TriggerOp::Set, Some(TrackKey::Prop("a".into())), None);
        assert_eq!(rt.tracked_target_count(), 0);
    }

    #[test]
    fn track_outside_an_effect_registers_nothing() {
        let rt = Runtime::new();
        let target = Target::record();
        rt.track(&target, TrackOp::Get, TrackKey::Prop("a".into()));
        assert_eq!(rt.tracked_target_count(), 0);
    }

    #[test]
    fn add_to_record_notifies_iteration() {
        let rt = Runtime::new();
        let target = Target::record();
        let runs = counting_effect(&rt, &target, TrackKey::Iterate);

        rt.trigger(&target, TriggerOp::Add, Some(TrackKey::Prop("a".into())), None);
        assert_eq!(runs.get(), 2);

        // Plain sets do not change the key set.
        rt.trigger(&target, TriggerOp::Set, Some(TrackKey::Prop("a".into())), None);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn map_set_notifies_iteration_but_not_key_iteration() {
        let rt = Runtime::new();
        let target = Target::map();
        let values = counting_effect(&rt, &target, TrackKey::Iterate);
        let keys = counting_effect(&rt, &target, TrackKey::MapKeyIterate);
        let key = TrackKey::Entry(crate::graph::MapKey::new(Value::from("k")));

        rt.trigger(&target, TriggerOp::Set, Some(key.clone()), None);
        assert_eq!((values.get(), keys.get()), (2, 1));

        rt.trigger(&target, TriggerOp::Add, Some(key), None);
        assert_eq!((values.get(), keys.get()), (3, 2));
    }

    #[test]
    fn length_write_notifies_cut_off_indices_only() {
        let rt = Runtime::new();
        let target = Target::sequence_from([1, 2, 3]);
        let first = counting_effect(&rt, &target, TrackKey::Prop(Key::Index(0)));
        let last = counting_effect(&rt, &target, TrackKey::Prop(Key::Index(2)));
        let length = counting_effect(&rt, &target, TrackKey::length());

        rt.trigger(
            &target,
            TriggerOp::Set,
            Some(TrackKey::length()),
            Some(&Value::from(1)),
        );
        assert_eq!((first.get(), last.get(), length.get()), (1, 2, 2));
    }

    #[test]
    fn index_add_notifies_length() {
        let rt = Runtime::new();
        let target = Target::sequence();
        let length = counting_effect(&rt, &target, TrackKey::length());

        rt.trigger(&target, TriggerOp::Add, Some(TrackKey::Prop(Key::Index(0))), None);
        assert_eq!(length.get(), 2);
    }

    #[test]
    fn clear_notifies_every_dep() {
        let rt = Runtime::new();
        let target = Target::map();
        let a = counting_effect(&rt, &target, TrackKey::Entry(crate::graph::MapKey::new("a".into())));
        let it = counting_effect(&rt, &target, TrackKey::Iterate);

        rt.trigger(&target, TriggerOp::Clear, None, None);
        assert_eq!((a.get(), it.get()), (2, 2));
    }

    #[test]
    fn effect_on_two_keys_runs_once_per_trigger() {
        let rt = Runtime::new();
        let target = Target::sequence_from([1]);
        let runs = Rc::new(Cell::new(0));
        let (r, t, rt2) = (runs.clone(), target.clone(), rt.clone());
        rt.effect(
            move || {
                r.set(r.get() + 1);
                rt2.track(&t, TrackOp::Get, TrackKey::Prop(Key::Index(0)));
                rt2.track(&t, TrackOp::Get, TrackKey::length());
            },
            EffectOptions::default(),
        );

        rt.trigger(
            &target,
            TriggerOp::Set,
            Some(TrackKey::length()),
            Some(&Value::from(0)),
        );
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn garbage_collection_drops_dead_targets() {
        let rt = Runtime::new();
        let target = Target::record();
        let _runs = counting_effect(&rt, &target, TrackKey::Iterate);
        assert_eq!(rt.tracked_target_count(), 1);

        assert_eq!(rt.collect_garbage(), 0);
        drop(target);
        drop(_runs);
        // The effect closure still owns a handle, so the target lives on.
        assert_eq!(rt.collect_garbage(), 0);
    }

    #[test]
    fn collect_garbage_removes_entries_of_dropped_targets() {
        let rt = Runtime::new();
        let (runs, t2, rt2) = (Rc::new(Cell::new(0)), Target::record(), rt.clone());
        let weak = t2.downgrade();
        let r = runs.clone();
        let effect = rt.effect(
            move || {
                r.set(r.get() + 1);
                if let Some(t) = weak.upgrade() {
                    rt2.track(&t, TrackOp::Get, TrackKey::Iterate);
                }
            },
            EffectOptions::default(),
        );
        assert_eq!(rt.tracked_target_count(), 1);

        drop(t2);
        assert_eq!(rt.collect_garbage(), 1);
        assert_eq!(rt.tracked_target_count(), 0);
        effect.stop();
    }

    #[test]
    fn caught_panics_reach_the_error_handler() {
        let rt = Runtime::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        rt.set_error_handler(move |err| s.borrow_mut().push(err.code()));

        let result = rt.call_with_error_handling(ErrorCode::WatchCallback, || -> i32 {
            panic!("boom")
        });
        assert_eq!(result, None);
        assert_eq!(*seen.borrow(), vec![Some(ErrorCode::WatchCallback)]);
        assert_eq!(rt.call_with_error_handling(ErrorCode::Scheduler, || 7), Some(7));
    }

    #[test]
    fn with_config_validates() {
        let config = RuntimeConfig {
            max_marker_depth: 99,
            ..Default::default()
        };
        assert!(Runtime::with_config(config).is_err());
    }

    #[test]
    fn effects_past_marker_depth_clear_deps_on_rerun() {
        let config = RuntimeConfig {
            max_marker_depth: 0,
            ..Default::default()
        };
        let rt = Runtime::with_config(config).unwrap();
        assert!(!rt.uses_markers(1));

        let flag = rt.ref_value(true);
        let a = rt.ref_value("a");
        let b = rt.ref_value("b");
        let runs = Rc::new(Cell::new(0));
        let inner = Rc::new(RefCell::new(None));

        let (rt2, f, ac, bc, r, slot) = (
            rt.clone(),
            flag.clone(),
            a.clone(),
            b.clone(),
            runs.clone(),
            inner.clone(),
        );
        let outer = rt.effect(
            move || {
                let (f, ac, bc, r) = (f.clone(), ac.clone(), bc.clone(), r.clone());
                let effect = rt2.effect(
                    move || {
                        r.set(r.get() + 1);
                        if f.get().is_truthy() {
                            ac.get();
                        } else {
                            bc.get();
                        }
                    },
                    EffectOptions::default(),
                );
                *slot.borrow_mut() = Some(effect);
            },
            EffectOptions::default(),
        );
        assert_eq!((a.subscriber_count(), b.subscriber_count()), (1, 0));

        flag.set(false);
        assert_eq!(runs.get(), 2);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
        assert_eq!(flag.subscriber_count(), 1);

        a.set("changed");
        assert_eq!(runs.get(), 2);
        outer.stop();
    }
}
