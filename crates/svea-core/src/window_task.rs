// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Window-task processing.
//!
//! Each window gets a persistent agent created on first use, a lock on the
//! window for as long as the agent lives, and one drain loop consuming its
//! queue — the structural form of the at-most-one-writer guarantee.  Window
//! close cascades through here: queued tasks are dropped with notices, the
//! in-flight turn is interrupted, the lock is released, and the agent is
//! disposed, returning its limiter slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use svea_proto::{DesktopAction, ServerEvent, WindowAgentState};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pool::{InFlightTracker, ProviderSource};
use crate::{
    ActionEmitter, AgentLimiter, AgentPool, AgentRole, BroadcastCenter, ContextTape, CoreError,
    MessageSource, PromptScope, Task, WindowQueues, WindowStateRegistry,
};

pub struct WindowTaskProcessor {
    queues: Arc<WindowQueues>,
    /// window id → its agent's role.
    agents: Mutex<HashMap<String, AgentRole>>,
    drains: Mutex<HashMap<String, JoinHandle<()>>>,
    pool: Arc<AgentPool>,
    limiter: Arc<AgentLimiter>,
    tape: Arc<ContextTape>,
    registry: Arc<WindowStateRegistry>,
    emitter: Arc<ActionEmitter>,
    broadcast: Arc<BroadcastCenter>,
    providers: Arc<ProviderSource>,
    resetting: Arc<AtomicBool>,
    in_flight: Arc<InFlightTracker>,
    acquire_timeout: Duration,
    prune_on_close: bool,
    connection_id: String,
    /// Parent recorded for window agents in the session log.
    parent_role: Mutex<Option<String>>,
}

impl WindowTaskProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Arc<AgentPool>,
        limiter: Arc<AgentLimiter>,
        tape: Arc<ContextTape>,
        registry: Arc<WindowStateRegistry>,
        emitter: Arc<ActionEmitter>,
        broadcast: Arc<BroadcastCenter>,
        providers: Arc<ProviderSource>,
        resetting: Arc<AtomicBool>,
        in_flight: Arc<InFlightTracker>,
        acquire_timeout: Duration,
        prune_on_close: bool,
        connection_id: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queues: Arc::new(WindowQueues::new()),
            agents: Mutex::new(HashMap::new()),
            drains: Mutex::new(HashMap::new()),
            pool,
            limiter,
            tape,
            registry,
            emitter,
            broadcast,
            providers,
            resetting,
            in_flight,
            acquire_timeout,
            prune_on_close,
            connection_id: connection_id.into(),
            parent_role: Mutex::new(None),
        })
    }

    /// Record which main agent window agents descend from in the log tree.
    pub fn set_parent_role(&self, role: &str) {
        let mut parent = self.parent_role.lock().unwrap();
        if parent.is_none() {
            *parent = Some(role.to_string());
        }
    }

    pub fn agent_for(&self, window_id: &str) -> Option<AgentRole> {
        self.agents.lock().unwrap().get(window_id).cloned()
    }

    pub fn window_count(&self) -> usize {
        self.agents.lock().unwrap().len()
    }

    /// Route one window task: create the window's agent on first use, then
    /// queue the task behind whatever the agent is doing.
    pub async fn submit(self: &Arc<Self>, task: Task) -> Result<(), CoreError> {
        if self.resetting.load(Ordering::SeqCst) {
            debug!(task = %task.task_id, "window task dropped, pool is resetting");
            return Ok(());
        }
        let Some(window_id) = task.window_id.clone() else {
            warn!(task = %task.task_id, "window task without window id dropped");
            return Ok(());
        };

        let role = self.ensure_agent(&window_id).await?;

        let message_id = task.message_id.clone();
        let enq = self.queues.enqueue(&window_id, task);
        if enq.in_flight || enq.position > 1 {
            // Position counts tasks ahead of this one, the in-flight task
            // excluded (it already left the queue).
            let position = if enq.in_flight { enq.position } else { enq.position - 1 };
            self.broadcast.publish_to_connection(
                ServerEvent::MessageQueued {
                    message_id,
                    agent_id: Some(role.to_string()),
                    position,
                },
                &self.connection_id,
            );
        } else {
            self.broadcast.publish_to_connection(
                ServerEvent::MessageAccepted {
                    message_id,
                    agent_id: Some(role.to_string()),
                },
                &self.connection_id,
            );
        }
        Ok(())
    }

    async fn ensure_agent(self: &Arc<Self>, window_id: &str) -> Result<AgentRole, CoreError> {
        if let Some(role) = self.agent_for(window_id) {
            return Ok(role);
        }
        if !self.registry.has_window(window_id) {
            return Err(CoreError::WindowNotFound(window_id.to_string()));
        }

        // Bounded wait for a global slot; a saturated process fails the
        // task instead of hanging the connection.
        let permit = match tokio::time::timeout(self.acquire_timeout, self.limiter.acquire()).await
        {
            Ok(Ok(p)) => p,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(CoreError::LimitReached),
        };
        let provider = self
            .providers
            .take()
            .await
            .map_err(|e| CoreError::Provider(e.to_string()))?;

        let role = AgentRole::window(window_id);
        let parent = self.parent_role.lock().unwrap().clone();
        self.pool
            .create_with_permit(role.clone(), provider, permit, parent.as_deref());

        // Lock the window so no concurrent writer touches it while the
        // agent lives.
        self.emitter.emit(
            &role,
            vec![DesktopAction::WindowLock {
                window_id: window_id.to_string(),
                agent_id: role.to_string(),
            }],
        );

        self.agents
            .lock()
            .unwrap()
            .insert(window_id.to_string(), role.clone());
        self.broadcast.publish_to_connection(
            ServerEvent::WindowAgentStatus {
                window_id: window_id.to_string(),
                agent_id: role.to_string(),
                status: WindowAgentState::Created,
            },
            &self.connection_id,
        );
        info!(window = %window_id, agent = %role, "window agent created");

        self.queues.ensure(window_id);
        let this = Arc::clone(self);
        let w = window_id.to_string();
        let handle = tokio::spawn(async move { this.drain_loop(w).await });
        self.drains
            .lock()
            .unwrap()
            .insert(window_id.to_string(), handle);

        Ok(role)
    }

    /// Sequential-per-window is the hard guarantee: this loop is the only
    /// consumer of the window's queue and awaits each turn to completion.
    async fn drain_loop(self: Arc<Self>, window_id: String) {
        let role = AgentRole::window(&window_id);
        while let Some(task) = self.queues.dequeue(&window_id).await {
            let Some(session) = self.pool.get(&role) else { break };
            self.queues.mark_in_flight(&window_id);
            self.publish_status(&window_id, &role, WindowAgentState::Active);

            let prompt = format!(
                "{}{}{}",
                self.tape
                    .format_for_prompt(&PromptScope::MainAndWindow(window_id.clone())),
                self.registry.format_open_windows(),
                task.content
            );
            let source = MessageSource::window(&window_id);
            let outcome = {
                let _guard = self.in_flight.guard();
                session.handle(prompt, &task.content, source, true).await
            };
            if let Err(e) = outcome {
                warn!(window = %window_id, "window turn rejected: {e}");
            }

            self.queues.mark_done(&window_id);
            self.publish_status(&window_id, &role, WindowAgentState::Idle);
        }
        debug!(window = %window_id, "window drain loop ended");
    }

    /// The close cascade.  Idempotent: a second close of the same window is
    /// a no-op.
    pub async fn handle_close(&self, window_id: &str) {
        // 1. Drop queued tasks, telling the client about each.
        let dropped = self.queues.clear(window_id);
        for task in &dropped {
            self.broadcast.publish_to_connection(
                ServerEvent::Error {
                    error: format!(
                        "message {} cancelled: window {window_id} closed",
                        task.message_id
                    ),
                },
                &self.connection_id,
            );
        }

        let Some(role) = self.agents.lock().unwrap().remove(window_id) else {
            self.queues.remove(window_id);
            return;
        };
        info!(window = %window_id, agent = %role, "window agent teardown");

        // 2. Interrupt the in-flight turn, if any.
        if let Some(session) = self.pool.get(&role) {
            session.interrupt().await;
        }

        // 3. Release the lock — only when the window still exists (a close
        //    that came in as a window.close action already removed it).
        if self.registry.has_window(window_id) {
            self.emitter.emit(
                &role,
                vec![DesktopAction::WindowUnlock {
                    window_id: window_id.to_string(),
                    agent_id: role.to_string(),
                }],
            );
        }

        // 4. Dispose the agent; its limiter slot returns here.
        self.pool.dispose(&role.to_string()).await;
        self.publish_status(window_id, &role, WindowAgentState::Destroyed);

        if let Some(handle) = self.drains.lock().unwrap().remove(window_id) {
            handle.abort();
        }
        self.queues.remove(window_id);

        if self.prune_on_close {
            self.tape.prune_window(window_id);
        }
    }

    /// Drop all queues and agents (reset / connection teardown).  Returns
    /// the dropped tasks so the caller can publish notices if it wants to.
    pub async fn shutdown(&self) -> Vec<Task> {
        let dropped = self.queues.clear_all();
        let agents: Vec<(String, AgentRole)> =
            self.agents.lock().unwrap().drain().collect();
        for (_, role) in &agents {
            if let Some(session) = self.pool.get(role) {
                session.interrupt().await;
            }
            self.pool.dispose(&role.to_string()).await;
        }
        for (_, handle) in self.drains.lock().unwrap().drain() {
            handle.abort();
        }
        dropped
    }

    pub fn queued_total(&self) -> usize {
        self.agents
            .lock()
            .unwrap()
            .keys()
            .map(|w| self.queues.queued_len(w))
            .sum()
    }

    fn publish_status(&self, window_id: &str, role: &AgentRole, status: WindowAgentState) {
        self.broadcast.publish_to_connection(
            ServerEvent::WindowAgentStatus {
                window_id: window_id.to_string(),
                agent_id: role.to_string(),
                status,
            },
            &self.connection_id,
        );
    }
}
