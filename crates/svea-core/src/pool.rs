// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use svea_model::{Provider, WarmPool};
use svea_session::SessionLogger;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::{
    ActionEmitter, AgentRole, AgentSession, BroadcastCenter, ContextTape, LimiterPermit,
};

/// Swappable source of provider handles for new sessions.  SET_PROVIDER
/// replaces the warm pool; handles already bound to running agents are
/// unaffected.
pub struct ProviderSource {
    inner: Mutex<(Arc<WarmPool>, String)>,
}

impl ProviderSource {
    pub fn new(pool: Arc<WarmPool>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new((pool, name.into())),
        })
    }

    pub async fn take(&self) -> anyhow::Result<Arc<dyn Provider>> {
        let pool = self.inner.lock().unwrap().0.clone();
        pool.take().await
    }

    pub fn replace(&self, pool: Arc<WarmPool>, name: impl Into<String>) {
        let name = name.into();
        info!(provider = %name, "provider source swapped");
        *self.inner.lock().unwrap() = (pool, name);
    }

    pub fn provider_name(&self) -> String {
        self.inner.lock().unwrap().1.clone()
    }
}

/// Counts in-flight `handle` calls so reset can wait for them to drain.
pub(crate) struct InFlightTracker {
    count: AtomicUsize,
    notify: Notify,
}

pub(crate) struct InFlightGuard {
    tracker: Arc<InFlightTracker>,
}

impl InFlightTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            count: AtomicUsize::new(0),
            notify: Notify::new(),
        })
    }

    pub fn guard(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { tracker: Arc::clone(self) }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until no turn is in flight; `false` when the deadline passed
    /// first.
    pub async fn wait_idle(&self, deadline: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.count.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(deadline, wait).await.is_ok()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.count.fetch_sub(1, Ordering::SeqCst);
        self.tracker.notify.notify_waiters();
    }
}

/// Per-family session counts for stats.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolCounters {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub main: usize,
    pub window: usize,
    pub ephemeral: usize,
    pub task: usize,
}

/// Owns every agent session of one connection, indexed by role.
///
/// Creation is limiter-first: callers hand over an acquired permit (or use
/// `try_create`), so a session existing implies a slot is held — invariant
/// 2 of the teardown story.
pub struct AgentPool {
    sessions: Mutex<HashMap<String, Arc<AgentSession>>>,
    broadcast: Arc<BroadcastCenter>,
    logger: Arc<SessionLogger>,
    tape: Arc<ContextTape>,
    emitter: Arc<ActionEmitter>,
    connection_id: String,
    ephemeral_seq: AtomicU64,
    task_seq: AtomicU64,
}

impl AgentPool {
    pub fn new(
        broadcast: Arc<BroadcastCenter>,
        logger: Arc<SessionLogger>,
        tape: Arc<ContextTape>,
        emitter: Arc<ActionEmitter>,
        connection_id: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            broadcast,
            logger,
            tape,
            emitter,
            connection_id: connection_id.into(),
            ephemeral_seq: AtomicU64::new(0),
            task_seq: AtomicU64::new(0),
        })
    }

    pub fn next_ephemeral_role(&self) -> AgentRole {
        AgentRole::Ephemeral {
            seq: self.ephemeral_seq.fetch_add(1, Ordering::SeqCst),
        }
    }

    pub fn next_task_role(&self) -> AgentRole {
        AgentRole::Task {
            seq: self.task_seq.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Create a session under an already-acquired limiter permit.
    ///
    /// `parent` is recorded in the session log's agent tree.
    pub fn create_with_permit(
        &self,
        role: AgentRole,
        provider: Arc<dyn Provider>,
        permit: LimiterPermit,
        parent: Option<&str>,
    ) -> Arc<AgentSession> {
        let role_str = role.to_string();
        let window_id = role.window_id().map(str::to_string);

        let session = AgentSession::new(
            role,
            provider,
            permit,
            Arc::clone(&self.tape),
            Arc::clone(&self.emitter),
            Arc::clone(&self.broadcast),
            Arc::clone(&self.logger),
        );

        self.broadcast
            .register_agent(&role_str, &self.connection_id);
        self.logger
            .register_agent(&role_str, parent, window_id.as_deref());

        let old = self
            .sessions
            .lock()
            .unwrap()
            .insert(role_str.clone(), Arc::clone(&session));
        if old.is_some() {
            // Latest wins; the displaced session still holds its permit
            // until someone disposes it, so make that loud.
            warn!(role = %role_str, "replaced an existing session for role");
        }
        debug!(role = %role_str, "session created");
        session
    }

    pub fn get(&self, role: &AgentRole) -> Option<Arc<AgentSession>> {
        self.get_str(&role.to_string())
    }

    pub fn get_str(&self, role: &str) -> Option<Arc<AgentSession>> {
        self.sessions.lock().unwrap().get(role).cloned()
    }

    pub fn has_role_prefix(&self, prefix: &str) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .keys()
            .any(|r| r.starts_with(prefix))
    }

    pub fn roles(&self) -> Vec<String> {
        self.sessions.lock().unwrap().keys().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub async fn interrupt_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().unwrap().values().cloned().collect();
        for s in sessions {
            s.interrupt().await;
        }
    }

    pub async fn interrupt_role(&self, role: &str) -> bool {
        match self.get_str(role) {
            Some(s) => {
                s.interrupt().await;
                true
            }
            None => false,
        }
    }

    /// Dispose one session and drop it from the index.  Returns whether the
    /// role existed.
    pub async fn dispose(&self, role: &str) -> bool {
        let session = self.sessions.lock().unwrap().remove(role);
        match session {
            Some(s) => {
                s.dispose().await;
                true
            }
            None => false,
        }
    }

    /// Dispose everything (teardown / reset).
    pub async fn cleanup(&self) {
        let sessions: Vec<_> = {
            let mut map = self.sessions.lock().unwrap();
            map.drain().map(|(_, s)| s).collect()
        };
        for s in sessions {
            s.dispose().await;
        }
    }

    pub fn counters(&self) -> PoolCounters {
        let sessions = self.sessions.lock().unwrap();
        let mut c = PoolCounters {
            total: sessions.len(),
            ..PoolCounters::default()
        };
        for s in sessions.values() {
            if s.is_idle() {
                c.idle += 1;
            } else {
                c.busy += 1;
            }
            match s.role().family() {
                "main" => c.main += 1,
                "window" => c.window += 1,
                "ephemeral" => c.ephemeral += 1,
                _ => c.task += 1,
            }
        }
        c
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use svea_model::ScriptedProvider;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{AgentLimiter, InteractionTimeline, WindowStateRegistry};

    fn pool_harness() -> (Arc<AgentPool>, Arc<AgentLimiter>) {
        let limiter = AgentLimiter::new(4);
        let broadcast = BroadcastCenter::new();
        let (sink, _rx) = mpsc::channel(64);
        broadcast.subscribe("conn1", Arc::new(sink));
        let tape = Arc::new(ContextTape::new(100));
        let registry = Arc::new(WindowStateRegistry::new());
        let timeline = Arc::new(InteractionTimeline::new(16));
        let logger = Arc::new(SessionLogger::disabled());
        let (signal_tx, _signal_rx) = mpsc::unbounded_channel();
        let emitter = ActionEmitter::new(
            registry,
            Arc::clone(&broadcast),
            timeline,
            Arc::clone(&logger),
            "conn1",
            signal_tx,
        );
        let pool = AgentPool::new(broadcast, logger, tape, emitter, "conn1");
        (pool, limiter)
    }

    fn provider() -> Arc<dyn Provider> {
        Arc::new(ScriptedProvider::always_text("ok"))
    }

    #[tokio::test]
    async fn create_indexes_by_role() {
        let (pool, limiter) = pool_harness();
        let permit = limiter.try_acquire().unwrap();
        pool.create_with_permit(AgentRole::main("m0"), provider(), permit, None);

        assert!(pool.get_str("main-m0").is_some());
        assert!(pool.has_role_prefix("main-"));
        assert_eq!(pool.session_count(), 1);
    }

    #[tokio::test]
    async fn dispose_returns_slot_and_removes_index() {
        let (pool, limiter) = pool_harness();
        let permit = limiter.try_acquire().unwrap();
        pool.create_with_permit(AgentRole::window("w1"), provider(), permit, Some("main-m0"));
        assert_eq!(limiter.available(), 3);

        assert!(pool.dispose("window-w1").await);
        assert_eq!(limiter.available(), 4);
        assert!(pool.get_str("window-w1").is_none());
        assert!(!pool.dispose("window-w1").await);
    }

    #[tokio::test]
    async fn cleanup_disposes_everything() {
        let (pool, limiter) = pool_harness();
        for role in [AgentRole::main("m0"), AgentRole::window("w1")] {
            let permit = limiter.try_acquire().unwrap();
            pool.create_with_permit(role, provider(), permit, None);
        }
        assert_eq!(limiter.available(), 2);

        pool.cleanup().await;
        assert_eq!(pool.session_count(), 0);
        assert_eq!(limiter.available(), 4, "all slots must return on cleanup");
    }

    #[tokio::test]
    async fn counters_split_by_family() {
        let (pool, limiter) = pool_harness();
        let permit = limiter.try_acquire().unwrap();
        pool.create_with_permit(AgentRole::main("m0"), provider(), permit, None);
        let permit = limiter.try_acquire().unwrap();
        let e = pool.next_ephemeral_role();
        pool.create_with_permit(e, provider(), permit, Some("main-m0"));

        let c = pool.counters();
        assert_eq!(c.total, 2);
        assert_eq!(c.main, 1);
        assert_eq!(c.ephemeral, 1);
        assert_eq!(c.idle, 2);
    }

    #[tokio::test]
    async fn sequence_roles_are_distinct() {
        let (pool, _limiter) = pool_harness();
        assert_ne!(
            pool.next_ephemeral_role().to_string(),
            pool.next_ephemeral_role().to_string()
        );
        assert_ne!(pool.next_task_role().to_string(), pool.next_task_role().to_string());
    }

    #[tokio::test]
    async fn in_flight_tracker_waits_for_guards() {
        let tracker = InFlightTracker::new();
        let guard = tracker.guard();
        assert_eq!(tracker.count(), 1);

        let t2 = Arc::clone(&tracker);
        let waiter = tokio::spawn(async move { t2.wait_idle(Duration::from_millis(500)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        assert!(waiter.await.unwrap(), "wait_idle must observe the drain");
        assert!(!tracker.guard().tracker.wait_idle(Duration::from_millis(20)).await);
    }
}
