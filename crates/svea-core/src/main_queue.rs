// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::Task;

/// Outcome of a main-queue enqueue.  Overflow rejects instead of blocking
/// so the client hears about it immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    RejectedFull,
}

/// Bounded FIFO of main tasks for one monitor.  Strictly arrival-ordered;
/// no priorities.
pub struct MainQueue {
    cap: usize,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

struct QueueInner {
    tasks: VecDeque<Task>,
    closed: bool,
}

impl MainQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            inner: Mutex::new(QueueInner {
                tasks: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn enqueue(&self, task: Task) -> EnqueueOutcome {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed || inner.tasks.len() >= self.cap {
                return EnqueueOutcome::RejectedFull;
            }
            inner.tasks.push_back(task);
        }
        self.notify.notify_one();
        EnqueueOutcome::Queued
    }

    /// Wait for the next task.  Returns `None` once the queue is closed and
    /// drained.
    pub async fn dequeue(&self) -> Option<Task> {
        loop {
            // Arm the notification before checking so a concurrent enqueue
            // between check and await cannot be missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(task) = inner.tasks.pop_front() {
                    return Some(task);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting tasks and wake the drain loop so it can exit once the
    /// backlog is handled.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.notify.notify_waiters();
    }

    /// Discard all pending tasks (pool reset).  Returns how many were
    /// dropped.
    pub fn clear(&self) -> usize {
        let n = {
            let mut inner = self.inner.lock().unwrap();
            let n = inner.tasks.len();
            inner.tasks.clear();
            n
        };
        self.notify.notify_waiters();
        n
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
