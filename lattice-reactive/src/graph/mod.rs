//! Object Graph
//!
//! This module implements the host object graph that reactivity observes:
//! dynamic values, raw containers, and the tracked views wrapped around
//! them.
//!
//! # Overview
//!
//! - [`Value`] is the dynamic host value. Containers are shared by
//!   reference and compared by identity.
//! - [`Target`] is a raw container: a record, a sequence, a map or a set.
//!   Reads and writes on a target are never observed.
//! - [`Reactive`] is a tracked view over a target. Reads through a view
//!   subscribe the running effect, writes notify subscribers.
//!
//! # Design Decisions
//!
//! 1. Views are created lazily. Reading a nested container through a view
//!    wraps it on the way out, so cyclic graphs are never walked eagerly.
//!
//! 2. Each runtime keeps one identity map per view variant, keyed by
//!    [`TargetId`]. Wrapping the same target twice yields the same view
//!    while that view is alive.
//!
//! 3. The store exposes one explicit surface per container kind instead of
//!    intercepting arbitrary property access: property access for records
//!    and sequences, instrumented methods for maps and sets.

mod collections;
mod proxy;
mod target;
mod value;

pub use proxy::{ProxyVariant, Reactive, WeakReactive};
pub(crate) use proxy::ProxyRegistry;
pub use target::{Key, Target, TargetId, TargetKind, WeakTarget, MAX_SEQUENCE_LENGTH};
pub use value::{MapKey, Value};
pub(crate) use value::has_changed;
