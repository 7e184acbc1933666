//! Execution Context
//!
//! The execution context tracks which effect is currently running, whether
//! reads are being tracked, and which effect scope new effects register
//! with. It is owned by a [`Runtime`] rather than living in a global, so
//! separate runtimes never see each other's effects.
//!
//! # Implementation
//!
//! Entering an effect pushes it onto a stack and pushing is undone by a
//! drop guard. This keeps the stack balanced when user code panics, and it
//! supports nested effects: when an inner effect finishes, the outer one is
//! active again.

use std::cell::{Cell, RefCell};

use super::effect::Effect;
use super::runtime::Runtime;
use super::scope::EffectScope;

pub(crate) struct ExecutionContext {
    effect_stack: RefCell<Vec<Effect>>,
    should_track: Cell<bool>,
    track_stack: RefCell<Vec<bool>>,
    depth: Cell<u32>,
    op_bit: Cell<u32>,
    scope_stack: RefCell<Vec<EffectScope>>,
}

fn bit_for(depth: u32) -> u32 {
    1u32.checked_shl(depth).unwrap_or(0)
}

impl ExecutionContext {
    pub(crate) fn new() -> Self {
        Self {
            effect_stack: RefCell::new(Vec::new()),
            should_track: Cell::new(true),
            track_stack: RefCell::new(Vec::new()),
            depth: Cell::new(0),
            op_bit: Cell::new(1),
            scope_stack: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn active_effect(&self) -> Option<Effect> {
        self.effect_stack.borrow().last().cloned()
    }

    pub(crate) fn is_running(&self, effect: &Effect) -> bool {
        self.effect_stack.borrow().iter().any(|e| e.ptr_eq(effect))
    }

    pub(crate) fn is_tracking(&self) -> bool {
        self.should_track() && !self.effect_stack.borrow().is_empty()
    }

    pub(crate) fn should_track(&self) -> bool {
        self.should_track.get()
    }

    pub(crate) fn pause_tracking(&self) {
        self.track_stack.borrow_mut().push(self.should_track.get());
        self.should_track.set(false);
    }

    pub(crate) fn enable_tracking(&self) {
        self.track_stack.borrow_mut().push(self.should_track.get());
        self.should_track.set(true);
    }

    pub(crate) fn reset_tracking(&self) {
        let last = self.track_stack.borrow_mut().pop();
        self.should_track.set(last.unwrap_or(true));
    }

    /// The bit the innermost running effect marks deps with.
    pub(crate) fn op_bit(&self) -> u32 {
        self.op_bit.get()
    }

    pub(crate) fn depth(&self) -> u32 {
        self.depth.get()
    }

    fn push_effect(&self, effect: &Effect) -> u32 {
        self.effect_stack.borrow_mut().push(effect.clone());
        self.enable_tracking();
        let depth = self.depth.get() + 1;
        self.depth.set(depth);
        self.op_bit.set(bit_for(depth));
        depth
    }

    fn pop_effect(&self) {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        self.op_bit.set(bit_for(depth));
        self.reset_tracking();
        self.effect_stack.borrow_mut().pop();
    }

    pub(crate) fn current_scope(&self) -> Option<EffectScope> {
        self.scope_stack.borrow().last().cloned()
    }

    fn push_scope(&self, scope: EffectScope) {
        self.scope_stack.borrow_mut().push(scope);
    }

    fn pop_scope(&self) {
        self.scope_stack.borrow_mut().pop();
    }
}

/// Guard that runs an effect frame: marks the effect's current deps on
/// entry and reconciles them when dropped.
pub(crate) struct EffectFrame<'a> {
    runtime: &'a Runtime,
    effect: &'a Effect,
    marked: bool,
}

impl<'a> EffectFrame<'a> {
    pub(crate) fn enter(runtime: &'a Runtime, effect: &'a Effect) -> Self {
        let context = &runtime.inner.context;
        let depth = context.push_effect(effect);
        let marked = runtime.uses_markers(depth);
        if marked {
            effect.init_dep_markers(context.op_bit());
        } else {
            effect.cleanup_deps();
        }
        Self {
            runtime,
            effect,
            marked,
        }
    }
}

impl Drop for EffectFrame<'_> {
    fn drop(&mut self) {
        let context = &self.runtime.inner.context;
        if self.marked {
            self.effect.finalize_dep_markers(context.op_bit());
        }
        context.pop_effect();
    }
}

/// Guard that makes a scope the registration target until dropped.
pub(crate) struct ScopeFrame<'a> {
    runtime: &'a Runtime,
}

impl<'a> ScopeFrame<'a> {
    pub(crate) fn enter(runtime: &'a Runtime, scope: EffectScope) -> Self {
        runtime.inner.context.push_scope(scope);
        Self { runtime }
    }
}

impl Drop for ScopeFrame<'_> {
    fn drop(&mut self) {
        self.runtime.inner.context.pop_scope();
    }
}

/// Guard that pauses tracking until dropped.
pub(crate) struct TrackingPause<'a> {
    runtime: &'a Runtime,
}

impl<'a> TrackingPause<'a> {
    pub(crate) fn enter(runtime: &'a Runtime) -> Self {
        runtime.inner.context.pause_tracking();
        Self { runtime }
    }
}

impl Drop for TrackingPause<'_> {
    fn drop(&mut self) {
        self.runtime.inner.context.reset_tracking();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::EffectOptions;

    fn lazy_effect(rt: &Runtime) -> Effect {
        rt.effect(|| (), EffectOptions {
            lazy: true,
            ..Default::default()
        })
    }

    #[test]
    fn frame_tracks_active_effect() {
        let rt = Runtime::new();
        let effect = lazy_effect(&rt);
        let context = &rt.inner.context;

        assert!(!context.is_tracking());
        assert!(context.active_effect().is_none());

        {
            let _frame = EffectFrame::enter(&rt, &effect);
            assert!(context.is_tracking());
            assert!(context.active_effect().unwrap().ptr_eq(&effect));
            assert_eq!(context.depth(), 1);
        }

        // Frame should be cleaned up after drop
        assert!(!context.is_tracking());
        assert!(context.active_effect().is_none());
        assert_eq!(context.depth(), 0);
    }

    #[test]
    fn nested_frames_restore_outer_effect() {
        let rt = Runtime::new();
        let outer = lazy_effect(&rt);
        let inner = lazy_effect(&rt);
        let context = &rt.inner.context;

        {
            let _outer = EffectFrame::enter(&rt, &outer);
            assert_eq!(context.op_bit(), 1 << 1);

            {
                let _inner = EffectFrame::enter(&rt, &inner);
                assert!(context.active_effect().unwrap().ptr_eq(&inner));
                assert_eq!(context.op_bit(), 1 << 2);
            }

            // After inner frame drops, outer should be current
            assert!(context.active_effect().unwrap().ptr_eq(&outer));
            assert_eq!(context.op_bit(), 1 << 1);
        }

        assert!(context.active_effect().is_none());
    }

    #[test]
    fn pause_and_reset_nest() {
        let rt = Runtime::new();
        let context = &rt.inner.context;

        assert!(context.should_track());
        context.pause_tracking();
        assert!(!context.should_track());
        context.enable_tracking();
        assert!(context.should_track());
        context.reset_tracking();
        assert!(!context.should_track());
        context.reset_tracking();
        assert!(context.should_track());

        // An unbalanced reset falls back to tracking.
        context.reset_tracking();
        assert!(context.should_track());
    }

    #[test]
    fn frame_enables_tracking_inside_a_pause() {
        let rt = Runtime::new();
        let effect = lazy_effect(&rt);
        let context = &rt.inner.context;

        let _pause = TrackingPause::enter(&rt);
        assert!(!context.should_track());
        {
            let _frame = EffectFrame::enter(&rt, &effect);
            assert!(context.is_tracking());
        }
        assert!(!context.should_track());
    }
}
