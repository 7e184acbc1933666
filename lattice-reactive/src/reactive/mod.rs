//! Reactive Primitives
//!
//! This module implements the core reactive system: refs, computeds,
//! effects and effect scopes, plus the runtime that connects them to the
//! object graph.
//!
//! # Concepts
//!
//! ## Refs
//!
//! A Ref is a container for a single mutable value. Reading it inside an
//! effect subscribes the effect; writing a different value notifies every
//! subscriber.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates
//! only when it is read after one of its dependencies changed.
//!
//! ## Effects
//!
//! An Effect is a computation that re-runs whenever a value it read
//! changes, either synchronously or through a scheduler callback.
//!
//! ## Effect Scopes
//!
//! An EffectScope collects the effects created inside it so they can be
//! stopped together.
//!
//! # Implementation Notes
//!
//! Dependency tracking state lives in a [`Runtime`] value rather than in
//! thread-locals. Every ref, view and effect keeps a weak handle to the
//! runtime that created it.

mod computed;
mod context;
mod effect;
mod refs;
mod runtime;
mod scope;
mod subscriber;

pub use computed::Computed;
pub use effect::{Effect, EffectOptions, SchedulerFn, WeakEffect};
pub use refs::{is_ref, unref, AnyRef, CustomRef, CustomRefHandle, PropertyRef, Ref};
pub use runtime::{DiagnosticHandler, Runtime, WeakRuntime};
pub use scope::{EffectScope, WeakScope};
pub use subscriber::{Dep, EffectId, TrackKey, TrackOp, TriggerOp};
