//! Job Scheduler
//!
//! The scheduler batches deferred work so that many mutations made in one
//! synchronous stretch of code produce a single flush.
//!
//! # Queues
//!
//! There are three queues, each deduplicated by job identity:
//!
//! 1. Pre-flush callbacks, drained first to a fixed point.
//! 2. The main job queue, kept sorted by the optional job id. Jobs without
//!    an id run after every job with one.
//! 3. Post-flush callbacks, sorted by id and drained last.
//!
//! If any step queues more work, the whole cycle repeats.
//!
//! # Flushing
//!
//! Queuing work marks a flush as pending and calls the host's flush hook,
//! if one is installed. The flush itself runs when the host calls
//! [`Runtime::flush_jobs`] or awaits [`Runtime::next_tick`].
//!
//! # Recursion Guard
//!
//! Every job invocation inside one flush is counted. A job that has already
//! run more than [`RuntimeConfig::recursion_limit`](crate::config::RuntimeConfig)
//! times is skipped for the rest of the flush with a warning instead of
//! looping forever.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

use crate::error::{ErrorCode, ReactiveError};
use crate::reactive::{Effect, Runtime, WeakEffect, WeakRuntime};

struct JobInner {
    key: u64,
    id: Option<u64>,
    func: Box<dyn Fn()>,
    allow_recurse: Cell<bool>,
    active: Cell<bool>,
    effect: Option<WeakEffect>,
}

/// A unit of deferred work.
///
/// Jobs are compared by identity: queuing the same `Job` twice before it
/// runs only runs it once. Cloning produces another handle to the same job.
#[derive(Clone)]
pub struct Job(Rc<JobInner>);

impl Job {
    /// A job without an ordering id. It runs after every job that has one.
    pub fn new(func: impl Fn() + 'static) -> Self {
        Self::build(None, Box::new(func), None)
    }

    /// A job ordered by `id` in the main queue. Lower ids run first.
    pub fn with_id(id: u64, func: impl Fn() + 'static) -> Self {
        Self::build(Some(id), Box::new(func), None)
    }

    /// A job that runs `effect` and becomes inactive once it is stopped.
    pub fn for_effect(id: Option<u64>, effect: &Effect) -> Self {
        let weak = effect.downgrade();
        let func = Box::new(move || {
            if let Some(effect) = weak.upgrade() {
                effect.run();
            }
        });
        Self::build(id, func, Some(effect.downgrade()))
    }

    /// A job that becomes inactive once `effect` is stopped.
    pub(crate) fn linked(effect: &Effect, func: impl Fn() + 'static) -> Self {
        Self::build(None, Box::new(func), Some(effect.downgrade()))
    }

    fn build(id: Option<u64>, func: Box<dyn Fn()>, effect: Option<WeakEffect>) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(Rc::new(JobInner {
            key: COUNTER.fetch_add(1, Ordering::Relaxed),
            id,
            func,
            allow_recurse: Cell::new(false),
            active: Cell::new(true),
            effect,
        }))
    }

    pub fn id(&self) -> Option<u64> {
        self.0.id
    }

    /// Allow the job to queue itself again while it is running.
    pub fn set_allow_recurse(&self, allow: bool) {
        self.0.allow_recurse.set(allow);
    }

    pub fn allows_recurse(&self) -> bool {
        self.0.allow_recurse.get()
    }

    /// Whether the job still runs when its turn comes.
    pub fn is_active(&self) -> bool {
        self.0.active.get()
            && self
                .0
                .effect
                .as_ref()
                .map_or(true, |e| e.upgrade().is_some_and(|e| e.is_active()))
    }

    /// Turn the job into a no-op. Already queued copies are skipped.
    pub fn deactivate(&self) {
        self.0.active.set(false);
    }

    /// Run the job immediately, outside of any queue.
    pub fn call(&self) {
        (self.0.func)();
    }

    pub fn ptr_eq(&self, other: &Job) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn sort_key(&self) -> u64 {
        self.0.id.unwrap_or(u64::MAX)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("key", &self.0.key)
            .field("id", &self.0.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// A host callback invoked when a flush becomes pending.
pub type FlushHook = Rc<dyn Fn()>;

/// Queue state owned by a [`Runtime`].
pub(crate) struct SchedulerState {
    queue: RefCell<Vec<Job>>,
    flush_index: Cell<usize>,
    is_flushing: Cell<bool>,
    is_flush_pending: Cell<bool>,

    pending_pre: RefCell<Vec<Job>>,
    active_pre: RefCell<Option<Vec<Job>>>,
    pre_index: Cell<usize>,
    current_pre_flush_parent: RefCell<Option<Job>>,

    pending_post: RefCell<Vec<Job>>,
    active_post: RefCell<Option<Vec<Job>>>,
    post_index: Cell<usize>,

    /// Invocations per job key in the current flush.
    seen: RefCell<HashMap<u64, u32>>,
    flush_hook: RefCell<Option<FlushHook>>,
    wakers: RefCell<Vec<Waker>>,
}

impl SchedulerState {
    pub(crate) fn new() -> Self {
        Self {
            queue: RefCell::new(Vec::new()),
            flush_index: Cell::new(0),
            is_flushing: Cell::new(false),
            is_flush_pending: Cell::new(false),
            pending_pre: RefCell::new(Vec::new()),
            active_pre: RefCell::new(None),
            pre_index: Cell::new(0),
            current_pre_flush_parent: RefCell::new(None),
            pending_post: RefCell::new(Vec::new()),
            active_post: RefCell::new(None),
            post_index: Cell::new(0),
            seen: RefCell::new(HashMap::new()),
            flush_hook: RefCell::new(None),
            wakers: RefCell::new(Vec::new()),
        }
    }

    fn has_pending_work(&self) -> bool {
        !self.queue.borrow().is_empty()
            || !self.pending_pre.borrow().is_empty()
            || !self.pending_post.borrow().is_empty()
    }
}

/// Whether `job` appears in `jobs` at or after `from`.
fn contains_from(jobs: &[Job], job: &Job, from: usize) -> bool {
    jobs.get(from..)
        .is_some_and(|rest| rest.iter().any(|j| j.ptr_eq(job)))
}

fn dedup(jobs: Vec<Job>) -> Vec<Job> {
    let mut keys = HashSet::with_capacity(jobs.len());
    jobs.into_iter().filter(|j| keys.insert(j.0.key)).collect()
}

impl Runtime {
    /// Add `job` to the main queue unless it is already waiting there.
    pub fn queue_job(&self, job: &Job) {
        let state = &self.inner.scheduler;
        let is_parent = state
            .current_pre_flush_parent
            .borrow()
            .as_ref()
            .is_some_and(|parent| parent.ptr_eq(job));
        if is_parent {
            return;
        }
        {
            let mut queue = state.queue.borrow_mut();
            let flushing = state.is_flushing.get();
            let from = if flushing && job.allows_recurse() {
                state.flush_index.get() + 1
            } else {
                state.flush_index.get()
            };
            if contains_from(&queue, job, from) {
                return;
            }
            match job.id() {
                None => queue.push(job.clone()),
                Some(id) => {
                    // Only the unflushed tail needs to stay ordered.
                    let start = if flushing {
                        (state.flush_index.get() + 1).min(queue.len())
                    } else {
                        0
                    };
                    let offset = queue[start..].partition_point(|j| j.sort_key() < id);
                    queue.insert(start + offset, job.clone());
                }
            }
        }
        tracing::trace!(key = job.0.key, id = ?job.id(), "queued job");
        self.queue_flush();
    }

    /// Remove a queued job that has not started yet.
    pub fn invalidate_job(&self, job: &Job) {
        let state = &self.inner.scheduler;
        let mut queue = state.queue.borrow_mut();
        if let Some(index) = queue.iter().position(|j| j.ptr_eq(job)) {
            if index > state.flush_index.get() || !state.is_flushing.get() {
                queue.remove(index);
            }
        }
    }

    /// Queue a callback that runs before the main queue.
    pub fn queue_pre_flush_cb(&self, job: &Job) {
        let state = &self.inner.scheduler;
        Self::queue_cb(
            job,
            &state.active_pre,
            &state.pending_pre,
            state.pre_index.get(),
        );
        self.queue_flush();
    }

    /// Queue a callback that runs after the main queue.
    pub fn queue_post_flush_cb(&self, job: &Job) {
        let state = &self.inner.scheduler;
        Self::queue_cb(
            job,
            &state.active_post,
            &state.pending_post,
            state.post_index.get(),
        );
        self.queue_flush();
    }

    /// Queue several post-flush callbacks at once. They are not checked
    /// against the callbacks already running.
    pub fn queue_post_flush_cbs(&self, jobs: impl IntoIterator<Item = Job>) {
        self.inner.scheduler.pending_post.borrow_mut().extend(jobs);
        self.queue_flush();
    }

    fn queue_cb(
        job: &Job,
        active: &RefCell<Option<Vec<Job>>>,
        pending: &RefCell<Vec<Job>>,
        index: usize,
    ) {
        let from = if job.allows_recurse() { index + 1 } else { index };
        let already_running = active
            .borrow()
            .as_ref()
            .is_some_and(|jobs| contains_from(jobs, job, from));
        if !already_running {
            pending.borrow_mut().push(job.clone());
        }
    }

    fn queue_flush(&self) {
        let state = &self.inner.scheduler;
        if state.is_flushing.get() || state.is_flush_pending.get() {
            return;
        }
        state.is_flush_pending.set(true);
        let hook = state.flush_hook.borrow().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Install a callback invoked each time a flush becomes pending. Hosts
    /// use it to schedule [`flush_jobs`](Self::flush_jobs) on their own
    /// event loop.
    pub fn set_flush_hook(&self, hook: impl Fn() + 'static) {
        *self.inner.scheduler.flush_hook.borrow_mut() = Some(Rc::new(hook));
    }

    /// Whether queued work is waiting for a flush.
    pub fn has_pending_flush(&self) -> bool {
        self.inner.scheduler.is_flush_pending.get()
    }

    /// Whether a flush is currently running.
    pub fn is_flushing(&self) -> bool {
        self.inner.scheduler.is_flushing.get()
    }

    /// Number of jobs in the main queue.
    pub fn queued_job_count(&self) -> usize {
        self.inner.scheduler.queue.borrow().len()
    }

    /// Drain the pre-flush callbacks until none are left. While they run,
    /// `parent` is not re-queued into the main queue.
    pub fn flush_pre_flush_cbs(&self, parent: Option<&Job>) {
        let state = &self.inner.scheduler;
        loop {
            let pending = std::mem::take(&mut *state.pending_pre.borrow_mut());
            if pending.is_empty() {
                return;
            }
            *state.current_pre_flush_parent.borrow_mut() = parent.cloned();
            *state.active_pre.borrow_mut() = Some(dedup(pending));
            state.pre_index.set(0);
            loop {
                let index = state.pre_index.get();
                let job = state
                    .active_pre
                    .borrow()
                    .as_ref()
                    .and_then(|jobs| jobs.get(index).cloned());
                let Some(job) = job else {
                    break;
                };
                self.run_job(&job);
                state.pre_index.set(index + 1);
            }
            *state.active_pre.borrow_mut() = None;
            state.pre_index.set(0);
            *state.current_pre_flush_parent.borrow_mut() = None;
        }
    }

    /// Run the pending post-flush callbacks in id order. Called while
    /// they are already running, the new ones join the running batch.
    pub fn flush_post_flush_cbs(&self) {
        let state = &self.inner.scheduler;
        let pending = std::mem::take(&mut *state.pending_post.borrow_mut());
        if pending.is_empty() {
            return;
        }
        let mut deduped = dedup(pending);
        {
            let mut active = state.active_post.borrow_mut();
            if let Some(active) = active.as_mut() {
                active.extend(deduped);
                return;
            }
            deduped.sort_by_key(Job::sort_key);
            *active = Some(deduped);
        }
        state.post_index.set(0);
        loop {
            let index = state.post_index.get();
            let job = state
                .active_post
                .borrow()
                .as_ref()
                .and_then(|jobs| jobs.get(index).cloned());
            let Some(job) = job else {
                break;
            };
            self.run_job(&job);
            state.post_index.set(index + 1);
        }
        *state.active_post.borrow_mut() = None;
        state.post_index.set(0);
    }

    /// Run every queued job: pre-flush callbacks, then the main queue in
    /// id order, then post-flush callbacks, repeating until all three
    /// queues are empty. A no-op while a flush is already running.
    pub fn flush_jobs(&self) {
        let state = &self.inner.scheduler;
        if state.is_flushing.get() {
            return;
        }
        state.is_flush_pending.set(false);
        state.is_flushing.set(true);
        state.seen.borrow_mut().clear();

        let mut cycles = 0usize;
        loop {
            cycles += 1;
            self.flush_pre_flush_cbs(None);

            state.queue.borrow_mut().sort_by_key(Job::sort_key);
            tracing::debug!(
                cycle = cycles,
                jobs = state.queue.borrow().len(),
                "flushing job queue"
            );
            state.flush_index.set(0);
            loop {
                let index = state.flush_index.get();
                let job = state.queue.borrow().get(index).cloned();
                let Some(job) = job else {
                    break;
                };
                self.run_job(&job);
                state.flush_index.set(index + 1);
            }
            state.flush_index.set(0);
            state.queue.borrow_mut().clear();

            self.flush_post_flush_cbs();

            if !state.has_pending_work() {
                break;
            }
        }

        state.is_flushing.set(false);
        state.seen.borrow_mut().clear();
        // Work queued by the last post-flush callbacks was handled above.
        state.is_flush_pending.set(false);
        let wakers = std::mem::take(&mut *state.wakers.borrow_mut());
        for waker in wakers {
            waker.wake();
        }
    }

    fn run_job(&self, job: &Job) {
        if !job.is_active() || self.exceeds_recursion_limit(job) {
            return;
        }
        self.call_with_error_handling(ErrorCode::Scheduler, || job.call());
    }

    fn exceeds_recursion_limit(&self, job: &Job) -> bool {
        let limit = self.inner.config.recursion_limit;
        let mut seen = self.inner.scheduler.seen.borrow_mut();
        let count = seen.entry(job.0.key).or_insert(0);
        if *count > limit {
            drop(seen);
            self.warn(ReactiveError::RecursionLimit {
                job: job.id().unwrap_or(job.0.key),
                limit,
            });
            return true;
        }
        *count += 1;
        false
    }

    /// A future that resolves once the pending flush has run. If nothing
    /// is pending it resolves immediately.
    pub fn next_tick(&self) -> NextTick {
        NextTick {
            runtime: self.downgrade(),
        }
    }
}

/// Future returned by [`Runtime::next_tick`].
#[must_use = "futures do nothing unless awaited"]
pub struct NextTick {
    runtime: WeakRuntime,
}

impl Future for NextTick {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(runtime) = self.runtime.upgrade() else {
            return Poll::Ready(());
        };
        let state = &runtime.inner.scheduler;
        if state.is_flushing.get() {
            state.wakers.borrow_mut().push(cx.waker().clone());
            return Poll::Pending;
        }
        if state.is_flush_pending.get() {
            runtime.flush_jobs();
        }
        Poll::Ready(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
