// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-window task queues.
//!
//! Each window gets an independent FIFO plus an in-flight flag; the window
//! processor's drain loop is the only consumer, which is what makes
//! at-most-one-task-per-window a structural guarantee rather than a
//! convention.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::Task;

/// Result of a window enqueue: where the task landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEnqueue {
    /// 1 means the task runs next; higher means queued behind others.
    pub position: usize,
    /// Whether a task was already being handled for this window.
    pub in_flight: bool,
}

pub struct WindowQueues {
    queues: Mutex<HashMap<String, WindowQueueState>>,
}

struct WindowQueueState {
    tasks: VecDeque<Task>,
    in_flight: bool,
    closed: bool,
    notify: Arc<Notify>,
}

impl WindowQueueState {
    fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
            in_flight: false,
            closed: false,
            notify: Arc::new(Notify::new()),
        }
    }
}

impl Default for WindowQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowQueues {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Create the window's (empty) queue if it does not exist.  The window
    /// processor calls this before spawning the drain loop, so the loop
    /// never observes a missing entry as "queue closed".
    pub fn ensure(&self, window_id: &str) {
        self.queues
            .lock()
            .unwrap()
            .entry(window_id.to_string())
            .or_insert_with(WindowQueueState::new);
    }

    /// Queue a task for its window, creating the queue on first use.
    pub fn enqueue(&self, window_id: &str, task: Task) -> WindowEnqueue {
        let (result, notify) = {
            let mut queues = self.queues.lock().unwrap();
            let state = queues
                .entry(window_id.to_string())
                .or_insert_with(WindowQueueState::new);
            state.tasks.push_back(task);
            (
                WindowEnqueue {
                    position: state.tasks.len(),
                    in_flight: state.in_flight,
                },
                Arc::clone(&state.notify),
            )
        };
        notify.notify_one();
        result
    }

    /// Wait for the next task on `window_id`.  Returns `None` once the
    /// window's queue has been closed (window close or pool reset).
    pub async fn dequeue(&self, window_id: &str) -> Option<Task> {
        loop {
            let notify = {
                let mut queues = self.queues.lock().unwrap();
                let state = queues.get_mut(window_id)?;
                if let Some(task) = state.tasks.pop_front() {
                    return Some(task);
                }
                if state.closed {
                    return None;
                }
                Arc::clone(&state.notify)
            };
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // Re-check under the lock: a task may have been enqueued between
            // releasing the lock and arming the notification.
            {
                let mut queues = self.queues.lock().unwrap();
                let state = queues.get_mut(window_id)?;
                if let Some(task) = state.tasks.pop_front() {
                    return Some(task);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn mark_in_flight(&self, window_id: &str) {
        if let Some(state) = self.queues.lock().unwrap().get_mut(window_id) {
            state.in_flight = true;
        }
    }

    pub fn mark_done(&self, window_id: &str) {
        if let Some(state) = self.queues.lock().unwrap().get_mut(window_id) {
            state.in_flight = false;
        }
    }

    pub fn is_in_flight(&self, window_id: &str) -> bool {
        self.queues
            .lock()
            .unwrap()
            .get(window_id)
            .map(|s| s.in_flight)
            .unwrap_or(false)
    }

    /// Close one window's queue and drop its pending tasks, returning them
    /// so the caller can publish cancellation notices.
    pub fn clear(&self, window_id: &str) -> Vec<Task> {
        let (dropped, notify) = {
            let mut queues = self.queues.lock().unwrap();
            match queues.get_mut(window_id) {
                Some(state) => {
                    state.closed = true;
                    let dropped: Vec<Task> = state.tasks.drain(..).collect();
                    (dropped, Some(Arc::clone(&state.notify)))
                }
                None => (Vec::new(), None),
            }
        };
        if let Some(n) = notify {
            n.notify_waiters();
        }
        dropped
    }

    /// Remove a closed window's bookkeeping entirely.
    pub fn remove(&self, window_id: &str) {
        self.queues.lock().unwrap().remove(window_id);
    }

    /// Close and drop everything (pool reset).  Returns dropped tasks from
    /// all windows.
    pub fn clear_all(&self) -> Vec<Task> {
        let window_ids: Vec<String> = self.queues.lock().unwrap().keys().cloned().collect();
        let mut dropped = Vec::new();
        for id in window_ids {
            dropped.extend(self.clear(&id));
        }
        dropped
    }

    pub fn queued_len(&self, window_id: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(window_id)
            .map(|s| s.tasks.len())
            .unwrap_or(0)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
