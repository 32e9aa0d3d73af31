// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-monitor concurrent-action budget.  Stops a runaway monitor from
//! starving the others: each monitor may have at most `cap` in-flight
//! action-producing operations, with FIFO hand-off like the global limiter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use crate::CoreError;

pub struct MonitorBudget {
    cap: usize,
    monitors: Mutex<HashMap<String, MonitorState>>,
}

#[derive(Default)]
struct MonitorState {
    in_flight: usize,
    waiters: VecDeque<oneshot::Sender<Result<(), CoreError>>>,
    /// Total actions observed for this monitor, for stats and fair-dequeue
    /// sequencing.
    actions_observed: u64,
}

/// RAII budget slot for one monitor.
pub struct BudgetPermit {
    budget: Arc<MonitorBudget>,
    monitor: String,
}

impl Drop for BudgetPermit {
    fn drop(&mut self) {
        self.budget.release(&self.monitor);
    }
}

impl MonitorBudget {
    pub fn new(cap: usize) -> Arc<Self> {
        Arc::new(Self {
            cap,
            monitors: Mutex::new(HashMap::new()),
        })
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn in_flight(&self, monitor: &str) -> usize {
        self.monitors
            .lock()
            .unwrap()
            .get(monitor)
            .map(|m| m.in_flight)
            .unwrap_or(0)
    }

    pub fn actions_observed(&self, monitor: &str) -> u64 {
        self.monitors
            .lock()
            .unwrap()
            .get(monitor)
            .map(|m| m.actions_observed)
            .unwrap_or(0)
    }

    /// Wait for a slot on `monitor`.  FIFO per monitor; cancellable by
    /// dropping the future (the hand-off skips dead waiters).
    pub async fn acquire(self: &Arc<Self>, monitor: &str) -> Result<BudgetPermit, CoreError> {
        let rx = {
            let mut monitors = self.monitors.lock().unwrap();
            let state = monitors.entry(monitor.to_string()).or_default();
            if state.in_flight < self.cap {
                state.in_flight += 1;
                return Ok(BudgetPermit {
                    budget: Arc::clone(self),
                    monitor: monitor.to_string(),
                });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        match rx.await {
            Ok(Ok(())) => Ok(BudgetPermit {
                budget: Arc::clone(self),
                monitor: monitor.to_string(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CoreError::PoolResetting),
        }
    }

    /// Count one action against `monitor`.
    pub fn record_action(&self, monitor: &str) {
        let mut monitors = self.monitors.lock().unwrap();
        monitors
            .entry(monitor.to_string())
            .or_default()
            .actions_observed += 1;
    }

    /// Fail every parked waiter on every monitor (pool reset).
    pub fn clear_waiting(&self) {
        let waiters: Vec<_> = {
            let mut monitors = self.monitors.lock().unwrap();
            monitors
                .values_mut()
                .flat_map(|m| m.waiters.drain(..))
                .collect()
        };
        let n = waiters.len();
        for tx in waiters {
            let _ = tx.send(Err(CoreError::PoolResetting));
        }
        if n > 0 {
            debug!(rejected = n, "budget waiters cleared");
        }
    }

    /// Drop all per-monitor bookkeeping.  Only valid after `clear_waiting`
    /// and after in-flight permits have been dropped.
    pub fn clear(&self) {
        self.monitors.lock().unwrap().clear();
    }

    fn release(&self, monitor: &str) {
        let mut monitors = self.monitors.lock().unwrap();
        let Some(state) = monitors.get_mut(monitor) else {
            // Cleared underneath an outstanding permit during reset.
            return;
        };
        while let Some(tx) = state.waiters.pop_front() {
            if tx.send(Ok(())).is_ok() {
                return;
            }
        }
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
