//! Effect Scopes
//!
//! An [`EffectScope`] collects the effects created while it is running,
//! the cleanups registered with [`Runtime::on_scope_dispose`], and the
//! scopes created inside it, so all of them can be torn down with a single
//! [`stop`](EffectScope::stop).
//!
//! Child scopes remember their index in the parent's list. Detaching a
//! child swaps the last child into its slot, so removal is O(1).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::context::ScopeFrame;
use super::effect::Effect;
use super::runtime::{Runtime, WeakRuntime};
use crate::error::{ErrorCode, ReactiveError};

struct ScopeInner {
    runtime: WeakRuntime,
    active: Cell<bool>,
    effects: RefCell<Vec<Effect>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    parent: RefCell<Option<WeakScope>>,
    scopes: RefCell<Vec<EffectScope>>,
    index: Cell<usize>,
}

/// A disposable group of effects, cleanups, and nested scopes.
#[derive(Clone)]
pub struct EffectScope(Rc<ScopeInner>);

/// A weak handle that does not keep its scope alive.
#[derive(Clone)]
pub struct WeakScope(Weak<ScopeInner>);

impl WeakScope {
    pub fn upgrade(&self) -> Option<EffectScope> {
        self.0.upgrade().map(EffectScope)
    }
}

impl EffectScope {
    fn new(runtime: &Runtime, detached: bool) -> Self {
        let scope = Self(Rc::new(ScopeInner {
            runtime: runtime.downgrade(),
            active: Cell::new(true),
            effects: RefCell::new(Vec::new()),
            cleanups: RefCell::new(Vec::new()),
            parent: RefCell::new(None),
            scopes: RefCell::new(Vec::new()),
            index: Cell::new(0),
        }));
        if !detached {
            if let Some(parent) = runtime.current_scope() {
                let mut children = parent.0.scopes.borrow_mut();
                scope.0.index.set(children.len());
                children.push(scope.clone());
                *scope.0.parent.borrow_mut() = Some(parent.downgrade());
            }
        }
        scope
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    /// Run `f` with this scope as the registration target for new effects,
    /// cleanups, and scopes. An inactive scope does not run `f`.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let runtime = self.0.runtime.upgrade()?;
        if !self.is_active() {
            runtime.warn(ReactiveError::InactiveScope);
            return None;
        }
        let _frame = ScopeFrame::enter(&runtime, self.clone());
        Some(f())
    }

    /// Stop every effect and nested scope, run cleanups, and detach from
    /// the parent. Idempotent.
    pub fn stop(&self) {
        self.stop_inner(false);
    }

    fn stop_inner(&self, from_parent: bool) {
        if !self.is_active() {
            return;
        }
        let effects = self.0.effects.borrow().clone();
        tracing::debug!(effects = effects.len(), "stopping effect scope");
        for effect in &effects {
            effect.stop();
        }

        let cleanups = std::mem::take(&mut *self.0.cleanups.borrow_mut());
        let runtime = self.0.runtime.upgrade();
        for cleanup in cleanups {
            match &runtime {
                Some(runtime) => {
                    runtime.call_with_error_handling(ErrorCode::ScopeCleanup, cleanup);
                }
                None => cleanup(),
            }
        }

        let children = std::mem::take(&mut *self.0.scopes.borrow_mut());
        for child in &children {
            child.stop_inner(true);
        }

        if !from_parent {
            self.detach_from_parent();
        }
        self.0.active.set(false);
    }

    fn detach_from_parent(&self) {
        let parent = self.0.parent.borrow_mut().take();
        let Some(parent) = parent.and_then(|p| p.upgrade()) else {
            return;
        };
        let mut siblings = parent.0.scopes.borrow_mut();
        let index = self.0.index.get();
        let Some(last) = siblings.pop() else {
            return;
        };
        if !last.ptr_eq(self) && index < siblings.len() {
            last.0.index.set(index);
            siblings[index] = last;
        }
    }

    /// Register an effect with this scope. Stopped scopes ignore it.
    pub(crate) fn record_effect(&self, effect: &Effect) {
        if self.is_active() {
            self.0.effects.borrow_mut().push(effect.clone());
            effect.set_scope(Some(self.downgrade()));
        }
    }

    pub(crate) fn remove_effect(&self, effect: &Effect) {
        self.0.effects.borrow_mut().retain(|e| !e.ptr_eq(effect));
    }

    /// Register a function to run when the scope stops.
    pub fn on_dispose(&self, f: impl FnOnce() + 'static) {
        if self.is_active() {
            self.0.cleanups.borrow_mut().push(Box::new(f));
        }
    }

    pub fn effect_count(&self) -> usize {
        self.0.effects.borrow().len()
    }

    pub fn child_count(&self) -> usize {
        self.0.scopes.borrow().len()
    }

    pub fn parent(&self) -> Option<EffectScope> {
        self.0.parent.borrow().as_ref().and_then(WeakScope::upgrade)
    }

    pub fn downgrade(&self) -> WeakScope {
        WeakScope(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &EffectScope) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.is_active())
            .field("effects", &self.effect_count())
            .field("children", &self.child_count())
            .finish()
    }
}

impl Runtime {
    /// Create a scope nested in the active scope, if any.
    pub fn effect_scope(&self) -> EffectScope {
        EffectScope::new(self, false)
    }

    /// Create a scope that is not collected by the active scope.
    pub fn detached_scope(&self) -> EffectScope {
        EffectScope::new(self, true)
    }

    /// The scope new effects are currently registered with.
    pub fn current_scope(&self) -> Option<EffectScope> {
        self.inner.context.current_scope()
    }

    /// Register a cleanup with the active scope. Warns when there is none.
    pub fn on_scope_dispose(&self, f: impl FnOnce() + 'static) {
        match self.current_scope() {
            Some(scope) => scope.on_dispose(f),
            None => self.warn(ReactiveError::NoActiveScope),
        }
    }
}
