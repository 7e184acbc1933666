//! Lattice Reactive
//!
//! This crate provides the dependency-tracking reactivity runtime behind
//! Lattice. It implements:
//!
//! - Tracked views over records, sequences, maps and sets
//! - Dependency tracking and change notification
//! - Effects, effect scopes, refs and cached computeds
//! - Watchers with pre, post and sync flush timing
//! - A batched, deduplicated job scheduler
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Host values, raw containers and the views wrapped around them
//! - `reactive`: The runtime, effects, scopes, refs and computeds
//! - `scheduler`: Job queues and the flush loop
//! - `watch`: Watchers built from effects and the scheduler
//! - `config` / `error`: Runtime configuration and diagnostics
//!
//! # Example
//!
//! ```rust,ignore
//! use lattice_reactive::{Runtime, WatchOptions};
//!
//! let rt = Runtime::new();
//! let count = rt.ref_value(1);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = rt.computed(move || c.get().as_f64().unwrap_or(0.0) * 2.0);
//!
//! // Watch it
//! let d = doubled.clone();
//! rt.watch_effect(move |_| println!("doubled: {:?}", d.get()), WatchOptions::default());
//!
//! // Update the ref and flush
//! count.set(5);
//! rt.flush_jobs();
//! // Prints: "doubled: Number(10.0)"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod scheduler;
pub mod watch;

pub use config::RuntimeConfig;
pub use error::{ErrorCode, ReactiveError, Result};
pub use graph::{Key, MapKey, ProxyVariant, Reactive, Target, TargetKind, Value};
pub use reactive::{
    is_ref, unref, AnyRef, Computed, CustomRefHandle, Effect, EffectOptions, EffectScope, Ref,
    Runtime,
};
pub use scheduler::{Job, NextTick};
pub use watch::{traverse, Flush, OnCleanup, OwnerContext, WatchHandle, WatchOptions, WatchSource};
