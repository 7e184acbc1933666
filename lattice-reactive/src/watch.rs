//! Watchers
//!
//! A watcher is an effect whose re-runs are turned into callbacks. The
//! source is normalized into a getter, the getter runs inside an [`Effect`],
//! and when a dependency changes the effect's scheduler queues a job that
//! re-evaluates the getter and calls the user callback with the new and
//! old values.
//!
//! # Sources
//!
//! - a ref or computed: its value
//! - a reactive view: the view itself, read deeply so any nested change
//!   counts
//! - a getter: whatever it returns
//! - a list of the above: a sequence of their values, compared element-wise
//!
//! # Flush Timing
//!
//! - [`Flush::Sync`]: the job runs inside the mutating call.
//! - [`Flush::Pre`]: the job is queued as a pre-flush callback. A watcher
//!   whose owner has not mounted yet runs synchronously instead.
//! - [`Flush::Post`]: the job is queued as a post-flush callback.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::error::{ErrorCode, ReactiveError};
use crate::graph::{has_changed, Reactive, Target, TargetId, Value};
use crate::reactive::{AnyRef, Computed, Effect, EffectScope, Ref, Runtime, WeakEffect, WeakRuntime};
use crate::scheduler::Job;

type Getter = Rc<dyn Fn() -> Value>;
type Callback = Rc<dyn Fn(&Value, &Value, &OnCleanup)>;

/// Something a watcher can observe.
#[derive(Clone)]
pub enum WatchSource {
    Ref(AnyRef),
    Reactive(Reactive),
    Getter(Getter),
    Multi(Vec<WatchSource>),
    /// Not observable. Watching it warns and never fires.
    Invalid(Value),
}

impl WatchSource {
    pub fn getter<F, V>(f: F) -> Self
    where
        F: Fn() -> V + 'static,
        V: Into<Value>,
    {
        Self::Getter(Rc::new(move || f().into()))
    }
}

impl fmt::Debug for WatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ref(r) => f.debug_tuple("Ref").field(r).finish(),
            Self::Reactive(r) => f.debug_tuple("Reactive").field(r).finish(),
            Self::Getter(_) => f.write_str("Getter"),
            Self::Multi(sources) => f.debug_tuple("Multi").field(sources).finish(),
            Self::Invalid(v) => f.debug_tuple("Invalid").field(v).finish(),
        }
    }
}

impl From<AnyRef> for WatchSource {
    fn from(r: AnyRef) -> Self {
        Self::Ref(r)
    }
}

impl From<Ref> for WatchSource {
    fn from(r: Ref) -> Self {
        Self::Ref(r.into())
    }
}

impl From<Computed> for WatchSource {
    fn from(c: Computed) -> Self {
        Self::Ref(c.into())
    }
}

impl From<Reactive> for WatchSource {
    fn from(r: Reactive) -> Self {
        Self::Reactive(r)
    }
}

impl From<Vec<WatchSource>> for WatchSource {
    fn from(sources: Vec<WatchSource>) -> Self {
        Self::Multi(sources)
    }
}

impl From<Value> for WatchSource {
    fn from(value: Value) -> Self {
        match value {
            Value::Ref(r) => Self::Ref(r),
            Value::Proxy(p) => Self::Reactive(p),
            other => Self::Invalid(other),
        }
    }
}

/// When a triggered watcher runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Flush {
    #[default]
    Pre,
    Post,
    Sync,
}

/// Options accepted by [`Runtime::watch`] and [`Runtime::watch_effect`].
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Call the callback once right away, with an undefined old value.
    pub immediate: bool,
    /// Read the source deeply and fire on every change, even when the
    /// returned value is the same object.
    pub deep: bool,
    pub flush: Flush,
    /// The context the watcher belongs to. Its scope collects the watcher.
    pub owner: Option<OwnerContext>,
}

// ----------------------------------------------------------------------------
// Owner context
// ----------------------------------------------------------------------------

struct OwnerInner {
    mounted: Cell<bool>,
    unmounted: Cell<bool>,
    scope: EffectScope,
}

/// A host-side owner of watchers, such as a UI component.
///
/// `pre` watchers created before the owner mounts run synchronously, since
/// there is no pending render to run ahead of. Unmounting stops every
/// watcher created in the owner's scope.
#[derive(Clone)]
pub struct OwnerContext(Rc<OwnerInner>);

impl OwnerContext {
    pub fn new(runtime: &Runtime) -> Self {
        Self(Rc::new(OwnerInner {
            mounted: Cell::new(false),
            unmounted: Cell::new(false),
            scope: runtime.detached_scope(),
        }))
    }

    pub fn mount(&self) {
        self.0.mounted.set(true);
    }

    pub fn unmount(&self) {
        self.0.unmounted.set(true);
        self.0.scope.stop();
    }

    pub fn is_mounted(&self) -> bool {
        self.0.mounted.get()
    }

    pub fn is_unmounted(&self) -> bool {
        self.0.unmounted.get()
    }

    pub fn scope(&self) -> &EffectScope {
        &self.0.scope
    }

    /// Run `f` inside the owner's scope.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        self.0.scope.run(f)
    }
}

impl fmt::Debug for OwnerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerContext")
            .field("mounted", &self.is_mounted())
            .field("unmounted", &self.is_unmounted())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Cleanup registration
// ----------------------------------------------------------------------------

struct CleanupInner {
    runtime: WeakRuntime,
    pending: RefCell<Option<Box<dyn FnOnce()>>>,
    effect: RefCell<Option<WeakEffect>>,
}

/// Handed to watcher callbacks to register a cleanup.
///
/// The cleanup runs once, before the next callback invocation or when the
/// watcher stops, whichever comes first.
#[derive(Clone)]
pub struct OnCleanup(Rc<CleanupInner>);

impl OnCleanup {
    fn new(runtime: &Runtime) -> Self {
        Self(Rc::new(CleanupInner {
            runtime: runtime.downgrade(),
            pending: RefCell::new(None),
            effect: RefCell::new(None),
        }))
    }

    fn attach(&self, effect: &Effect) {
        *self.0.effect.borrow_mut() = Some(effect.downgrade());
    }

    /// Register `f`, replacing any cleanup that has not run yet.
    pub fn register(&self, f: impl FnOnce() + 'static) {
        *self.0.pending.borrow_mut() = Some(Box::new(f));
        let effect = self.0.effect.borrow().as_ref().and_then(WeakEffect::upgrade);
        if let Some(effect) = effect {
            let this = self.clone();
            effect.set_on_stop(move || this.run());
        }
    }

    fn run(&self) {
        let pending = self.0.pending.borrow_mut().take();
        let Some(cleanup) = pending else {
            return;
        };
        match self.0.runtime.upgrade() {
            Some(runtime) => {
                runtime.call_with_error_handling(ErrorCode::WatchCleanup, cleanup);
            }
            None => cleanup(),
        }
    }
}

// ----------------------------------------------------------------------------
// Watch handle
// ----------------------------------------------------------------------------

/// Returned by every watch constructor. Dropping it does not stop the
/// watcher; call [`stop`](Self::stop).
#[derive(Clone)]
pub struct WatchHandle {
    effect: Effect,
}

impl WatchHandle {
    /// Stop the watcher and remove it from its scope.
    pub fn stop(&self) {
        self.effect.stop();
        self.effect.detach_from_scope();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }

    pub fn effect(&self) -> &Effect {
        &self.effect
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("effect", &self.effect)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Traversal
// ----------------------------------------------------------------------------

/// Read every nested value of `value` through its views so the running
/// effect depends on the whole graph. Cycles are visited once.
pub fn traverse(value: &Value) -> Value {
    let mut seen = HashSet::new();
    traverse_inner(value, &mut seen);
    value.clone()
}

fn traverse_inner(value: &Value, seen: &mut HashSet<TargetId>) {
    match value {
        Value::Proxy(view) => {
            if seen.insert(view.target().id()) {
                for child in view.values() {
                    traverse_inner(&child, seen);
                }
            }
        }
        Value::Object(target) => {
            if seen.insert(target.id()) {
                for child in target.values() {
                    traverse_inner(&child, seen);
                }
            }
        }
        Value::Ref(r) => traverse_inner(&r.get(), seen),
        _ => {}
    }
}

// ----------------------------------------------------------------------------
// Construction
// ----------------------------------------------------------------------------

struct Normalized {
    getter: Getter,
    force_trigger: bool,
    deep: bool,
    multi: bool,
}

impl Runtime {
    /// Watch `source` and call `callback(new, old, on_cleanup)` when it
    /// changes. The old value is `Undefined` on the first call.
    pub fn watch<S, C>(&self, source: S, callback: C, options: WatchOptions) -> WatchHandle
    where
        S: Into<WatchSource>,
        C: Fn(&Value, &Value, &OnCleanup) + 'static,
    {
        let normalized = self.normalize_source(source.into(), options.deep);
        let cleanup = OnCleanup::new(self);
        self.do_watch(normalized, Some(Rc::new(callback)), cleanup, options)
    }

    /// Run `f` now and again whenever anything it read changes.
    pub fn watch_effect<F>(&self, f: F, options: WatchOptions) -> WatchHandle
    where
        F: Fn(&OnCleanup) + 'static,
    {
        let cleanup = OnCleanup::new(self);
        let (runtime, owner, c) = (self.downgrade(), options.owner.clone(), cleanup.clone());
        let getter: Getter = Rc::new(move || {
            if owner.as_ref().is_some_and(OwnerContext::is_unmounted) {
                return Value::Undefined;
            }
            c.run();
            match runtime.upgrade() {
                Some(runtime) => {
                    runtime.call_with_error_handling(ErrorCode::WatchCallback, || f(&c));
                }
                None => f(&c),
            }
            Value::Undefined
        });
        let normalized = Normalized {
            getter,
            force_trigger: false,
            deep: false,
            multi: false,
        };
        self.do_watch(normalized, None, cleanup, options)
    }

    /// [`watch_effect`](Self::watch_effect) flushed after the main queue.
    pub fn watch_post_effect<F>(&self, f: F) -> WatchHandle
    where
        F: Fn(&OnCleanup) + 'static,
    {
        let options = WatchOptions {
            flush: Flush::Post,
            ..Default::default()
        };
        self.watch_effect(f, options)
    }

    /// [`watch_effect`](Self::watch_effect) run inside the mutating call.
    pub fn watch_sync_effect<F>(&self, f: F) -> WatchHandle
    where
        F: Fn(&OnCleanup) + 'static,
    {
        let options = WatchOptions {
            flush: Flush::Sync,
            ..Default::default()
        };
        self.watch_effect(f, options)
    }

    fn normalize_source(&self, source: WatchSource, deep: bool) -> Normalized {
        match source {
            WatchSource::Ref(r) => Normalized {
                force_trigger: r.is_shallow(),
                getter: Rc::new(move || r.get()),
                deep,
                multi: false,
            },
            WatchSource::Reactive(view) => {
                let value = Value::Proxy(view);
                Normalized {
                    getter: Rc::new(move || value.clone()),
                    force_trigger: false,
                    deep: true,
                    multi: false,
                }
            }
            WatchSource::Getter(f) => Normalized {
                getter: self.guarded_getter(f),
                force_trigger: false,
                deep,
                multi: false,
            },
            WatchSource::Multi(sources) => {
                let force_trigger = sources
                    .iter()
                    .any(|s| matches!(s, WatchSource::Reactive(view) if view.is_reactive()));
                let getters: Vec<Getter> = sources
                    .into_iter()
                    .map(|source| self.element_getter(source))
                    .collect();
                Normalized {
                    getter: Rc::new(move || {
                        Value::Object(Target::sequence_from(getters.iter().map(|g| g())))
                    }),
                    force_trigger,
                    deep,
                    multi: true,
                }
            }
            WatchSource::Invalid(value) => {
                self.warn(ReactiveError::InvalidWatchSource(value.type_name().to_string()));
                Normalized {
                    getter: Rc::new(|| Value::Undefined),
                    force_trigger: false,
                    deep,
                    multi: false,
                }
            }
        }
    }

    fn element_getter(&self, source: WatchSource) -> Getter {
        match source {
            WatchSource::Ref(r) => Rc::new(move || r.get()),
            WatchSource::Reactive(view) => {
                let value = Value::Proxy(view);
                Rc::new(move || traverse(&value))
            }
            WatchSource::Getter(f) => self.guarded_getter(f),
            WatchSource::Multi(_) => {
                self.warn(ReactiveError::InvalidWatchSource("nested source list".into()));
                Rc::new(|| Value::Undefined)
            }
            WatchSource::Invalid(value) => {
                self.warn(ReactiveError::InvalidWatchSource(value.type_name().to_string()));
                Rc::new(|| Value::Undefined)
            }
        }
    }

    fn guarded_getter(&self, f: Getter) -> Getter {
        let runtime = self.downgrade();
        Rc::new(move || match runtime.upgrade() {
            Some(runtime) => runtime
                .call_with_error_handling(ErrorCode::WatchGetter, || f())
                .unwrap_or(Value::Undefined),
            None => f(),
        })
    }

    fn do_watch(
        &self,
        normalized: Normalized,
        callback: Option<Callback>,
        cleanup: OnCleanup,
        options: WatchOptions,
    ) -> WatchHandle {
        let Normalized {
            getter,
            force_trigger,
            deep,
            multi,
        } = normalized;

        let getter: Box<dyn Fn() -> Value> = if callback.is_some() && deep {
            Box::new(move || traverse(&getter()))
        } else {
            Box::new(move || getter())
        };
        let scope = options.owner.as_ref().map(|owner| owner.scope().clone());
        let effect = Effect::new(self, getter, None, scope);
        cleanup.attach(&effect);

        let old: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
        let job = {
            let (weak, runtime, old, cleanup) =
                (effect.downgrade(), self.downgrade(), old.clone(), cleanup.clone());
            let callback = callback.clone();
            Job::linked(&effect, move || {
                let Some(effect) = weak.upgrade() else {
                    return;
                };
                if !effect.is_active() {
                    return;
                }
                let Some(callback) = &callback else {
                    effect.run();
                    return;
                };
                let new = effect.run();
                let changed = deep
                    || force_trigger
                    || match &*old.borrow() {
                        None => true,
                        Some(previous) if multi => items_changed(&new, previous),
                        Some(previous) => has_changed(&new, previous),
                    };
                if !changed {
                    return;
                }
                cleanup.run();
                let previous = old.borrow_mut().take().unwrap_or(Value::Undefined);
                match runtime.upgrade() {
                    Some(runtime) => {
                        runtime.call_with_error_handling(ErrorCode::WatchCallback, || {
                            callback(&new, &previous, &cleanup)
                        });
                    }
                    None => callback(&new, &previous, &cleanup),
                }
                *old.borrow_mut() = Some(new);
            })
        };
        job.set_allow_recurse(callback.is_some());

        let runtime = self.downgrade();
        match options.flush {
            Flush::Sync => {
                let job = job.clone();
                effect.set_scheduler(move || job.call());
            }
            Flush::Post => {
                let job = job.clone();
                effect.set_scheduler(move || {
                    if let Some(runtime) = runtime.upgrade() {
                        runtime.queue_post_flush_cb(&job);
                    }
                });
            }
            Flush::Pre => {
                let (job, owner) = (job.clone(), options.owner.clone());
                effect.set_scheduler(move || {
                    let Some(runtime) = runtime.upgrade() else {
                        return;
                    };
                    if owner.as_ref().map_or(true, OwnerContext::is_mounted) {
                        runtime.queue_pre_flush_cb(&job);
                    } else {
                        job.call();
                    }
                });
            }
        }

        if callback.is_some() {
            if options.immediate {
                job.call();
            } else {
                *old.borrow_mut() = Some(effect.run());
            }
        } else if options.flush == Flush::Post {
            self.queue_post_flush_cb(&Job::for_effect(None, &effect));
        } else {
            effect.run();
        }

        tracing::debug!(
            effect = effect.id().raw(),
            flush = ?options.flush,
            deep,
            "created watcher"
        );
        WatchHandle { effect }
    }
}

/// Element-wise change check for multi-source watchers.
fn items_changed(new: &Value, old: &Value) -> bool {
    let new_items = new.as_target().map(Target::values).unwrap_or_default();
    let old_items = old.as_target().map(Target::values).unwrap_or_default();
    new_items.len() != old_items.len()
        || new_items
            .iter()
            .zip(&old_items)
            .any(|(n, o)| has_changed(n, o))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    type Calls = Rc<RefCell<Vec<(Value, Value)>>>;

    fn recorder() -> (Calls, impl Fn(&Value, &Value, &OnCleanup) + 'static) {
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));
        let c = calls.clone();
        (calls, move |new: &Value, old: &Value, _: &OnCleanup| {
            c.borrow_mut().push((new.clone(), old.clone()))
        })
    }

    #[test]
    fn ref_changes_are_batched_until_flush() {
        let rt = Runtime::new();
        let count = rt.ref_value(0);
        let (calls, cb) = recorder();
        rt.watch(count.clone(), cb, WatchOptions::default());

        count.set(1);
        count.set(2);
        assert!(calls.borrow().is_empty());

        rt.flush_jobs();
        assert_eq!(*calls.borrow(), vec![(Value::from(2), Value::from(0))]);
    }

    #[test]
    fn sync_watchers_fire_inside_the_write() {
        let rt = Runtime::new();
        let count = rt.ref_value(0);
        let (calls, cb) = recorder();
        let options = WatchOptions {
            flush: Flush::Sync,
            ..Default::default()
        };
        rt.watch(count.clone(), cb, options);

        count.set(1);
        count.set(2);
        assert_eq!(
            *calls.borrow(),
            vec![
                (Value::from(1), Value::from(0)),
                (Value::from(2), Value::from(1)),
            ]
        );
    }

    #[test]
    fn immediate_fires_with_undefined_old_value() {
        let rt = Runtime::new();
        let count = rt.ref_value(5);
        let (calls, cb) = recorder();
        let options = WatchOptions {
            immediate: true,
            ..Default::default()
        };
        rt.watch(count, cb, options);
        assert_eq!(*calls.borrow(), vec![(Value::from(5), Value::Undefined)]);
    }

    #[test]
    fn unchanged_getter_result_does_not_fire() {
        let rt = Runtime::new();
        let count = rt.ref_value(1);
        let (calls, cb) = recorder();
        let c = count.clone();
        rt.watch(
            WatchSource::getter(move || c.get().as_i64().unwrap_or(0) % 2),
            cb,
            WatchOptions::default(),
        );

        count.set(3);
        rt.flush_jobs();
        assert!(calls.borrow().is_empty());

        count.set(4);
        rt.flush_jobs();
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn reactive_sources_are_watched_deeply() {
        let rt = Runtime::new();
        let state = rt.reactive(Target::record_from([(
            "nested",
            Value::Object(Target::record_from([("count", 0)])),
        )]));
        let view = state.as_reactive().cloned().unwrap();
        let (calls, cb) = recorder();
        rt.watch(view.clone(), cb, WatchOptions::default());

        let nested = view.get("nested").as_reactive().cloned().unwrap();
        nested.set("count", 1);
        rt.flush_jobs();
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(calls.borrow()[0].0, state);
    }

    #[test]
    fn deep_traversal_survives_cycles() {
        let rt = Runtime::new();
        let a = Target::record();
        let b = Target::record_from([("a", Value::Object(a.clone()))]);
        a.insert("b", Value::Object(b)).unwrap();
        let view = rt.reactive(a).as_reactive().cloned().unwrap();
        let (calls, cb) = recorder();
        rt.watch(view.clone(), cb, WatchOptions::default());

        view.set("x", 1);
        rt.flush_jobs();
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn multi_source_values_are_compared_element_wise() {
        let rt = Runtime::new();
        let a = rt.ref_value(1);
        let b = rt.ref_value(2);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        rt.watch(
            vec![WatchSource::from(a.clone()), WatchSource::from(b.clone())],
            move |new: &Value, _: &Value, _: &OnCleanup| {
                let values = new.as_target().map(Target::values).unwrap_or_default();
                s.borrow_mut().push(values);
            },
            WatchOptions::default(),
        );

        b.set(3);
        rt.flush_jobs();
        a.set(1);
        rt.flush_jobs();
        assert_eq!(*seen.borrow(), vec![vec![Value::from(1), Value::from(3)]]);
    }

    #[test]
    fn watch_effect_cleanup_runs_before_rerun_and_on_stop() {
        let rt = Runtime::new();
        let count = rt.ref_value(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let (c, l) = (count.clone(), log.clone());
        let handle = rt.watch_effect(
            move |on_cleanup| {
                let value = c.get().as_i64().unwrap_or(0);
                l.borrow_mut().push(format!("run {value}"));
                let l2 = l.clone();
                on_cleanup.register(move || l2.borrow_mut().push(format!("cleanup {value}")));
            },
            WatchOptions::default(),
        );

        count.set(1);
        rt.flush_jobs();
        handle.stop();
        assert_eq!(
            *log.borrow(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1"]
        );
        assert!(!handle.is_active());
    }

    #[test]
    fn stopped_watcher_never_fires() {
        let rt = Runtime::new();
        let count = rt.ref_value(0);
        let (calls, cb) = recorder();
        let handle = rt.watch(count.clone(), cb, WatchOptions::default());

        count.set(1);
        handle.stop();
        rt.flush_jobs();
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn stop_detaches_from_the_scope() {
        let rt = Runtime::new();
        let count = rt.ref_value(0);
        let scope = rt.effect_scope();
        let handle = scope
            .run(|| rt.watch(count.clone(), |_: &Value, _: &Value, _: &OnCleanup| {}, WatchOptions::default()))
            .unwrap();
        assert_eq!(scope.effect_count(), 1);

        handle.stop();
        assert_eq!(scope.effect_count(), 0);
    }

    #[test]
    fn invalid_sources_warn() {
        let rt = Runtime::new();
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let w = warnings.clone();
        rt.set_warn_handler(move |err| w.borrow_mut().push(err.clone()));

        let (calls, cb) = recorder();
        rt.watch(Value::from(1), cb, WatchOptions::default());
        assert!(calls.borrow().is_empty());
        assert!(matches!(
            warnings.borrow().as_slice(),
            [ReactiveError::InvalidWatchSource(_)]
        ));
    }

    #[test]
    fn panicking_getter_is_reported() {
        let rt = Runtime::new();
        let codes = Rc::new(RefCell::new(Vec::new()));
        let c = codes.clone();
        rt.set_error_handler(move |err| c.borrow_mut().push(err.code()));

        let (_, cb) = recorder();
        rt.watch(
            WatchSource::getter(|| -> Value { panic!("getter failed") }),
            cb,
            WatchOptions::default(),
        );
        assert_eq!(*codes.borrow(), vec![Some(ErrorCode::WatchGetter)]);
    }

    #[test]
    fn pre_watchers_run_synchronously_before_mount() {
        let rt = Runtime::new();
        let owner = OwnerContext::new(&rt);
        let count = rt.ref_value(0);
        let (calls, cb) = recorder();
        let options = WatchOptions {
            owner: Some(owner.clone()),
            ..Default::default()
        };
        rt.watch(count.clone(), cb, options);
        assert_eq!(owner.scope().effect_count(), 1);

        count.set(1);
        assert_eq!(calls.borrow().len(), 1);

        owner.mount();
        count.set(2);
        assert_eq!(calls.borrow().len(), 1);
        rt.flush_jobs();
        assert_eq!(calls.borrow().len(), 2);

        owner.unmount();
        count.set(3);
        rt.flush_jobs();
        assert_eq!(calls.borrow().len(), 2);
    }

    #[test]
    fn post_watchers_run_after_pre_watchers() {
        let rt = Runtime::new();
        let count = rt.ref_value(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        rt.watch(
            count.clone(),
            move |_: &Value, _: &Value, _: &OnCleanup| l.borrow_mut().push("post"),
            WatchOptions {
                flush: Flush::Post,
                ..Default::default()
            },
        );
        let l = log.clone();
        rt.watch(
            count.clone(),
            move |_: &Value, _: &Value, _: &OnCleanup| l.borrow_mut().push("pre"),
            WatchOptions::default(),
        );

        count.set(1);
        rt.flush_jobs();
        assert_eq!(*log.borrow(), vec!["pre", "post"]);
    }

    #[test]
    fn post_watch_effect_waits_for_the_flush() {
        let rt = Runtime::new();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        rt.watch_post_effect(move |_| r.set(r.get() + 1));
        assert_eq!(runs.get(), 0);

        rt.flush_jobs();
        assert_eq!(runs.get(), 1);
    }
}
