// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Global agent limiter: a counting semaphore with a FIFO queue of
//! cancellable waiters.
//!
//! Waiters park on a oneshot.  A released slot is handed directly to the
//! head waiter; if that waiter has gone away (its receiver was dropped by a
//! timeout or an aborted task), the hand-off falls through to the next one,
//! so `in_flight + free == capacity` holds at every instant.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use crate::CoreError;

pub struct AgentLimiter {
    capacity: usize,
    state: Mutex<LimiterState>,
}

struct LimiterState {
    free: usize,
    waiters: VecDeque<oneshot::Sender<Result<(), CoreError>>>,
}

/// RAII slot.  Dropping it releases the slot back (or hands it to the next
/// waiter).
pub struct LimiterPermit {
    limiter: Arc<AgentLimiter>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

impl AgentLimiter {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            state: Mutex::new(LimiterState {
                free: capacity,
                waiters: VecDeque::new(),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.state.lock().unwrap().free
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn waiting(&self) -> usize {
        self.state.lock().unwrap().waiters.len()
    }

    /// Non-blocking acquire.
    pub fn try_acquire(self: &Arc<Self>) -> Option<LimiterPermit> {
        let mut state = self.state.lock().unwrap();
        if state.free > 0 {
            state.free -= 1;
            Some(LimiterPermit { limiter: Arc::clone(self) })
        } else {
            None
        }
    }

    /// Acquire a slot, waiting in FIFO order behind earlier callers.
    ///
    /// Cancellation: wrap the future in `tokio::time::timeout` (or drop it
    /// from a `select!`).  An abandoned waiter never consumes a slot — the
    /// hand-off skips it.
    pub async fn acquire(self: &Arc<Self>) -> Result<LimiterPermit, CoreError> {
        let rx = {
            let mut state = self.state.lock().unwrap();
            if state.free > 0 {
                state.free -= 1;
                return Ok(LimiterPermit { limiter: Arc::clone(self) });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        match rx.await {
            // The releaser transferred its slot to us directly.
            Ok(Ok(())) => Ok(LimiterPermit { limiter: Arc::clone(self) }),
            Ok(Err(e)) => Err(e),
            // Sender dropped without sending: the limiter was torn down.
            Err(_) => Err(CoreError::PoolResetting),
        }
    }

    /// Fail every parked waiter (used on pool reset).  Slots already held
    /// are unaffected.
    pub fn clear_waiting(&self) {
        let waiters: Vec<_> = {
            let mut state = self.state.lock().unwrap();
            state.waiters.drain(..).collect()
        };
        let n = waiters.len();
        for tx in waiters {
            let _ = tx.send(Err(CoreError::PoolResetting));
        }
        if n > 0 {
            debug!(rejected = n, "limiter waiters cleared");
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        // Hand the slot to the first waiter that is still listening.
        while let Some(tx) = state.waiters.pop_front() {
            if tx.send(Ok(())).is_ok() {
                return;
            }
        }
        state.free += 1;
        debug_assert!(state.free <= self.capacity);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn try_acquire_exhausts_capacity() {
        let l = AgentLimiter::new(2);
        let a = l.try_acquire();
        let b = l.try_acquire();
        assert!(a.is_some() && b.is_some());
        assert!(l.try_acquire().is_none());
        drop(a);
        assert!(l.try_acquire().is_some());
    }

    #[tokio::test]
    async fn release_wakes_fifo_order() {
        let l = AgentLimiter::new(1);
        let held = l.try_acquire().unwrap();

        let l1 = Arc::clone(&l);
        let first = tokio::spawn(async move { l1.acquire().await.map(|_| 1u8) });
        // Make sure the first waiter parks before the second.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let l2 = Arc::clone(&l);
        let second = tokio::spawn(async move { l2.acquire().await.map(|_| 2u8) });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(l.waiting(), 2);

        drop(held);
        let who = first.await.unwrap().unwrap();
        assert_eq!(who, 1, "head of the wait queue must win the slot");
        // Dropping first's permit (already happened, map consumed it) frees
        // the slot for the second waiter.
        let who = second.await.unwrap().unwrap();
        assert_eq!(who, 2);
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_consume_slot() {
        let l = AgentLimiter::new(1);
        let held = l.try_acquire().unwrap();

        // This waiter gives up after 20 ms.
        let l1 = Arc::clone(&l);
        let gave_up =
            tokio::time::timeout(Duration::from_millis(20), async move { l1.acquire().await })
                .await;
        assert!(gave_up.is_err(), "acquire must still be pending at timeout");

        // A second waiter parks behind the abandoned one.
        let l2 = Arc::clone(&l);
        let second = tokio::spawn(async move { l2.acquire().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(held);
        // The hand-off must skip the abandoned waiter and reach the live one.
        let permit = tokio::time::timeout(Duration::from_millis(200), second)
            .await
            .expect("second waiter must be woken")
            .unwrap();
        assert!(permit.is_ok());
    }

    #[tokio::test]
    async fn clear_waiting_fails_parked_waiters() {
        let l = AgentLimiter::new(1);
        let _held = l.try_acquire().unwrap();
        let l1 = Arc::clone(&l);
        let waiter = tokio::spawn(async move { l1.acquire().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        l.clear_waiting();
        let res = waiter.await.unwrap();
        assert_eq!(res.err(), Some(CoreError::PoolResetting));
    }

    #[tokio::test]
    async fn slot_accounting_is_conserved() {
        let l = AgentLimiter::new(4);
        let permits: Vec<_> = (0..3).map(|_| l.try_acquire().unwrap()).collect();
        assert_eq!(l.in_flight() + l.available(), 4);
        drop(permits);
        assert_eq!(l.available(), 4);
    }
}
