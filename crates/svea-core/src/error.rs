// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors produced inside the orchestration core.
///
/// These are values, not panics: they bubble up to the processor that owns
/// the task, which decides whether to surface them on the connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Sentinel used to fail limiter/budget waiters during a pool reset.
    #[error("the context pool is resetting")]
    PoolResetting,

    /// The global agent limit (or a bounded wait for it) was exhausted.
    #[error("agent limit reached")]
    LimitReached,

    /// A bounded queue rejected the task.
    #[error("task queue is full")]
    QueueFull,

    /// `handle` was called while a turn is already in flight.  A contract
    /// violation of the single-owner rule, logged rather than surfaced.
    #[error("agent {0} is already handling a task")]
    SessionBusy(String),

    #[error("agent {0} is disposed")]
    SessionDisposed(String),

    #[error("window {0} does not exist")]
    WindowNotFound(String),

    /// A lock/unlock action named an agent that does not hold the lock.
    #[error("window {window} is locked by {holder}")]
    LockHeld { window: String, holder: String },

    /// The in-flight operation was cancelled (interrupt or teardown).
    #[error("cancelled")]
    Cancelled,

    #[error("provider error: {0}")]
    Provider(String),
}
