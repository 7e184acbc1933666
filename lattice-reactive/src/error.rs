//! Diagnostics and error types.
//!
//! Nothing in the runtime is fatal to the host. Usage errors (writing to a
//! readonly view, calling scope APIs with no active scope) and type errors
//! (wrapping a non-container, watching an unsupported source) are reported
//! as warnings and the operation becomes a no-op. Panics raised by user code
//! at a known call site are caught and reported as [`ReactiveError::Callback`]
//! tagged with the [`ErrorCode`] of that site.

use std::fmt;

use thiserror::Error;

use crate::graph::TargetKind;

/// Result alias used by the fallible parts of the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;

/// The call site a user callback was invoked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A job or callback run by the scheduler flush.
    Scheduler,
    /// The getter of a watcher.
    WatchGetter,
    /// The callback of a watcher, or the body of a watch effect.
    WatchCallback,
    /// A cleanup registered through [`OnCleanup`](crate::OnCleanup).
    WatchCleanup,
    /// A cleanup registered with `on_scope_dispose`.
    ScopeCleanup,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scheduler => "scheduler flush",
            Self::WatchGetter => "watcher getter",
            Self::WatchCallback => "watcher callback",
            Self::WatchCleanup => "watcher cleanup function",
            Self::ScopeCleanup => "effect scope cleanup",
        };
        f.write_str(name)
    }
}

/// Every diagnostic the runtime can emit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    #[error("set operation on key \"{key}\" failed: target is readonly")]
    ReadonlyWrite { key: String },

    #[error("delete operation on key \"{key}\" failed: target is readonly")]
    ReadonlyDelete { key: String },

    #[error("{operation} operation failed: collection is readonly")]
    ReadonlyCollection { operation: &'static str },

    #[error("write operation failed: computed value is readonly")]
    ReadonlyComputed,

    #[error("value cannot be made reactive: {0}")]
    NotObservable(String),

    #[error("expected a reactive object but received {0}")]
    NotReactive(String),

    #[error("invalid key \"{key}\" for {kind} target")]
    InvalidKey { key: String, kind: TargetKind },

    #[error("cannot add key \"{key}\": target is not extensible")]
    NotExtensible { key: String },

    #[error(
        "invalid watch source: {0}. A watch source can only be a getter, \
         a ref, a reactive object, or a list of these"
    )]
    InvalidWatchSource(String),

    #[error("cannot run an inactive effect scope")]
    InactiveScope,

    #[error("on_scope_dispose() was called with no active effect scope to be associated with")]
    NoActiveScope,

    #[error(
        "maximum recursive updates exceeded for job {job}: it triggered itself \
         more than {limit} times in one flush"
    )]
    RecursionLimit { job: u64, limit: u32 },

    #[error(
        "reactive {kind} contains both the raw and reactive versions of the same \
         object as keys, which can lead to inconsistencies"
    )]
    DuplicateIdentityKey { kind: TargetKind },

    #[error("unhandled panic during execution of {code}: {message}")]
    Callback { code: ErrorCode, message: String },

    #[error("invalid runtime configuration: {0}")]
    Config(String),
}

impl ReactiveError {
    /// The call site tag, for errors raised from user callbacks.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Callback { code, .. } => Some(*code),
            _ => None,
        }
    }
}
