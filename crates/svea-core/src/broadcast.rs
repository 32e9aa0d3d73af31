// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Fan-out of server events to connections.
//!
//! A sink is the sending half of a connection's writer mailbox: delivery is
//! a non-blocking `try_send`, so publication never blocks the orchestrator.
//! Per-sink ordering is FIFO because delivery happens under the center's
//! lock in publication order; ordering across sinks is unspecified.  A sink
//! that reports itself full or closed is removed synchronously together
//! with the agents registered to its connection — no retries.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use svea_proto::ServerEvent;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Ok,
    /// The mailbox is full — the connection is too slow to keep.
    Dropped,
    Closed,
}

/// Anything with a thread-safe, non-blocking send.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: ServerEvent) -> SinkStatus;
}

impl EventSink for mpsc::Sender<ServerEvent> {
    fn deliver(&self, event: ServerEvent) -> SinkStatus {
        match self.try_send(event) {
            Ok(()) => SinkStatus::Ok,
            Err(mpsc::error::TrySendError::Full(_)) => SinkStatus::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => SinkStatus::Closed,
        }
    }
}

struct ConnectionEntry {
    sink: Arc<dyn EventSink>,
    agents: HashSet<String>,
}

#[derive(Default)]
struct CenterInner {
    connections: HashMap<String, ConnectionEntry>,
    /// agent role → connection id
    agent_index: HashMap<String, String>,
}

/// Process-wide event router: connection-id → sink, agent-id → connection.
#[derive(Default)]
pub struct BroadcastCenter {
    inner: Mutex<CenterInner>,
}

impl BroadcastCenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, connection_id: impl Into<String>, sink: Arc<dyn EventSink>) {
        let connection_id = connection_id.into();
        let mut inner = self.inner.lock().unwrap();
        debug!(connection = %connection_id, "sink subscribed");
        inner.connections.insert(
            connection_id,
            ConnectionEntry {
                sink,
                agents: HashSet::new(),
            },
        );
    }

    pub fn unsubscribe(&self, connection_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.connections.remove(connection_id) {
            for role in &entry.agents {
                inner.agent_index.remove(role);
            }
            debug!(connection = %connection_id, agents = entry.agents.len(), "sink unsubscribed");
        }
    }

    pub fn register_agent(&self, role: impl Into<String>, connection_id: impl Into<String>) {
        let role = role.into();
        let connection_id = connection_id.into();
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.connections.get_mut(&connection_id) {
            entry.agents.insert(role.clone());
            inner.agent_index.insert(role, connection_id);
        } else {
            warn!(%role, connection = %connection_id, "agent registered to unknown connection");
        }
    }

    pub fn unregister_agent(&self, role: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(conn) = inner.agent_index.remove(role) {
            if let Some(entry) = inner.connections.get_mut(&conn) {
                entry.agents.remove(role);
            }
        }
    }

    pub fn connection_for_agent(&self, role: &str) -> Option<String> {
        self.inner.lock().unwrap().agent_index.get(role).cloned()
    }

    /// Deliver to the connection an agent is registered on.  `false` when
    /// the agent is unknown or its sink is gone.
    pub fn publish_to_agent(&self, event: ServerEvent, role: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(conn) = inner.agent_index.get(role).cloned() else {
            return false;
        };
        Self::deliver_locked(&mut inner, &conn, event)
    }

    /// Deliver to one connection.  `false` when the sink is gone or was
    /// evicted by this very delivery.
    pub fn publish_to_connection(&self, event: ServerEvent, connection_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        Self::deliver_locked(&mut inner, connection_id, event)
    }

    /// Deliver to every connection; returns how many sinks took the event.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let conns: Vec<String> = inner.connections.keys().cloned().collect();
        let mut delivered = 0;
        for conn in conns {
            if Self::deliver_locked(&mut inner, &conn, event.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().unwrap().connections.len()
    }

    pub fn agent_count(&self) -> usize {
        self.inner.lock().unwrap().agent_index.len()
    }

    /// Delivery under the lock keeps per-sink FIFO across concurrent
    /// publishers.  Failed sinks are evicted in the same critical section.
    fn deliver_locked(inner: &mut CenterInner, connection_id: &str, event: ServerEvent) -> bool {
        let Some(entry) = inner.connections.get(connection_id) else {
            return false;
        };
        match entry.sink.deliver(event) {
            SinkStatus::Ok => true,
            status => {
                warn!(connection = %connection_id, ?status, "sink failed, evicting");
                if let Some(entry) = inner.connections.remove(connection_id) {
                    for role in &entry.agents {
                        inner.agent_index.remove(role);
                    }
                }
                false
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
