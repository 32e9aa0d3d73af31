// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Main-task processing.
//!
//! One bounded FIFO queue and one drain loop per monitor.  The loop pulls
//! one task at a time, acquires a monitor-budget slot (which is what bounds
//! per-monitor concurrency), picks the persistent main agent when it is
//! idle or spawns an ephemeral overflow agent under the global limiter, and
//! spawns the turn.  Agent selection happens inside the loop, so start
//! order per monitor is strictly FIFO even when turns overlap.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use svea_cache::{Fingerprint, ReloadCache, ScoredCandidate};
use svea_proto::{DesktopAction, ServerEvent};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::pool::{InFlightTracker, ProviderSource};
use crate::{
    ActionEmitter, AgentLimiter, AgentPool, AgentRole, AgentSession, BroadcastCenter,
    ContextRole, ContextTape, CoreError, EnqueueOutcome, InteractionTimeline, MainQueue,
    MessageSource, MonitorBudget, PromptScope, Task, TurnOutcome, WindowStateRegistry,
};

pub struct MainTaskProcessor {
    queue_cap: usize,
    queues: Mutex<HashMap<String, Arc<MainQueue>>>,
    drains: Mutex<HashMap<String, JoinHandle<()>>>,
    pool: Arc<AgentPool>,
    limiter: Arc<AgentLimiter>,
    budget: Arc<MonitorBudget>,
    tape: Arc<ContextTape>,
    timeline: Arc<InteractionTimeline>,
    registry: Arc<WindowStateRegistry>,
    cache: Option<Arc<ReloadCache>>,
    emitter: Arc<ActionEmitter>,
    broadcast: Arc<BroadcastCenter>,
    providers: Arc<ProviderSource>,
    resetting: Arc<AtomicBool>,
    in_flight: Arc<InFlightTracker>,
    connection_id: String,
}

impl MainTaskProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue_cap: usize,
        pool: Arc<AgentPool>,
        limiter: Arc<AgentLimiter>,
        budget: Arc<MonitorBudget>,
        tape: Arc<ContextTape>,
        timeline: Arc<InteractionTimeline>,
        registry: Arc<WindowStateRegistry>,
        cache: Option<Arc<ReloadCache>>,
        emitter: Arc<ActionEmitter>,
        broadcast: Arc<BroadcastCenter>,
        providers: Arc<ProviderSource>,
        resetting: Arc<AtomicBool>,
        in_flight: Arc<InFlightTracker>,
        connection_id: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue_cap,
            queues: Mutex::new(HashMap::new()),
            drains: Mutex::new(HashMap::new()),
            pool,
            limiter,
            budget,
            tape,
            timeline,
            registry,
            cache,
            emitter,
            broadcast,
            providers,
            resetting,
            in_flight,
            connection_id: connection_id.into(),
        })
    }

    /// Create the monitor's queue and drain loop if they do not exist yet.
    pub fn ensure_monitor(self: &Arc<Self>, monitor: &str) {
        let mut queues = self.queues.lock().unwrap();
        if queues.contains_key(monitor) {
            return;
        }
        let queue = Arc::new(MainQueue::new(self.queue_cap));
        queues.insert(monitor.to_string(), Arc::clone(&queue));
        drop(queues);

        let this = Arc::clone(self);
        let monitor_owned = monitor.to_string();
        let handle = tokio::spawn(async move { this.drain_loop(monitor_owned, queue).await });
        self.drains.lock().unwrap().insert(monitor.to_string(), handle);
        debug!(%monitor, "main drain loop started");
    }

    /// Queue a main task.  `Err(QueueFull)` on overflow; a silent drop when
    /// the pool is resetting.
    pub fn submit(self: &Arc<Self>, mut task: Task) -> Result<(), CoreError> {
        if self.resetting.load(Ordering::SeqCst) {
            debug!(task = %task.task_id, "task dropped, pool is resetting");
            return Ok(());
        }
        let Some(monitor) = task.monitor_id.clone() else {
            warn!(task = %task.task_id, "main task without monitor id dropped");
            return Ok(());
        };

        // Interactions ride the task envelope; they enter the timeline at
        // arrival so the next turn on this connection drains them even if
        // this particular task waits in the queue.
        for interaction in std::mem::take(&mut task.interactions) {
            self.timeline.push_user(interaction);
        }

        self.ensure_monitor(&monitor);
        let queue = self.queues.lock().unwrap().get(&monitor).cloned();
        let Some(queue) = queue else {
            return Err(CoreError::QueueFull);
        };
        let message_id = task.message_id.clone();
        match queue.enqueue(task) {
            EnqueueOutcome::Queued => {
                self.broadcast.publish_to_connection(
                    ServerEvent::MessageQueued {
                        message_id,
                        agent_id: None,
                        position: queue.len(),
                    },
                    &self.connection_id,
                );
                Ok(())
            }
            EnqueueOutcome::RejectedFull => Err(CoreError::QueueFull),
        }
    }

    pub fn queue_len(&self, monitor: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(monitor)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    pub fn queue_lens(&self) -> HashMap<String, usize> {
        self.queues
            .lock()
            .unwrap()
            .iter()
            .map(|(m, q)| (m.clone(), q.len()))
            .collect()
    }

    /// Discard every pending task on every monitor (reset).  Drain loops
    /// stay alive for after the reset.
    pub fn clear_queues(&self) -> usize {
        self.queues
            .lock()
            .unwrap()
            .values()
            .map(|q| q.clear())
            .sum()
    }

    /// Tear down one monitor's queue and loop (REMOVE_MONITOR).
    pub fn remove_monitor(&self, monitor: &str) {
        if let Some(queue) = self.queues.lock().unwrap().remove(monitor) {
            queue.clear();
            queue.close();
        }
        if let Some(handle) = self.drains.lock().unwrap().remove(monitor) {
            handle.abort();
        }
    }

    /// Tear down everything (connection cleanup).
    pub fn shutdown(&self) {
        for (_, queue) in self.queues.lock().unwrap().drain() {
            queue.clear();
            queue.close();
        }
        for (_, handle) in self.drains.lock().unwrap().drain() {
            handle.abort();
        }
    }

    async fn drain_loop(self: Arc<Self>, monitor: String, queue: Arc<MainQueue>) {
        while let Some(task) = queue.dequeue().await {
            if self.resetting.load(Ordering::SeqCst) {
                continue;
            }
            // Blocks while this monitor is at its concurrency budget; other
            // monitors' loops are unaffected.
            let budget_permit = match self.budget.acquire(&monitor).await {
                Ok(p) => p,
                Err(_) => continue,
            };

            let main_role = AgentRole::main(&monitor);
            let (session, ephemeral) = match self.pool.get(&main_role) {
                Some(s) if s.try_claim() => (s, false),
                _ => {
                    // Main agent busy (or not yet created): spawn an
                    // ephemeral overflow agent.  The limiter wait happens
                    // with the budget slot held, as the budget is what
                    // keeps this monitor's slice of the world fair.
                    let permit = match self.limiter.acquire().await {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    let provider = match self.providers.take().await {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(%monitor, "provider unavailable: {e}");
                            self.broadcast.publish_to_connection(
                                ServerEvent::Error { error: format!("provider unavailable: {e}") },
                                &self.connection_id,
                            );
                            continue;
                        }
                    };
                    let role = self.pool.next_ephemeral_role();
                    let s = self.pool.create_with_permit(
                        role,
                        provider,
                        permit,
                        Some(&main_role.to_string()),
                    );
                    let claimed = s.try_claim();
                    debug_assert!(claimed, "fresh ephemeral session must be idle");
                    (s, true)
                }
            };

            self.broadcast.publish_to_connection(
                ServerEvent::MessageAccepted {
                    message_id: task.message_id.clone(),
                    agent_id: Some(session.role().to_string()),
                },
                &self.connection_id,
            );
            self.budget.record_action(&monitor);

            // Cache gate: exact hit replays without an LLM call; fuzzy
            // candidates become a prompt hint.
            let fingerprint = self.cache.as_ref().map(|_| {
                Fingerprint::compute(
                    task.kind.as_str(),
                    task.window_id.as_deref(),
                    &task.content,
                    &self.registry.renderer_pairs(),
                )
            });
            let mut reload_hint = String::new();
            if let (Some(cache), Some(fp)) = (&self.cache, &fingerprint) {
                let lookup = cache.lookup(fp);
                if let Some(exact) = lookup.exact {
                    if exact
                        .required_window_ids
                        .iter()
                        .all(|w| self.registry.has_window(w))
                    {
                        debug!(entry = %exact.id, "cache replay");
                        self.emitter.emit(session.role(), exact.actions.clone());
                        cache.mark_used(&exact.id);
                        self.tape
                            .append(ContextRole::User, &task.content, MessageSource::Main);
                        self.broadcast.publish_to_connection(
                            ServerEvent::AgentResponse {
                                agent_id: session.role().to_string(),
                                content: Some(format!("(replayed \"{}\")", exact.label)),
                                is_complete: Some(true),
                            },
                            &self.connection_id,
                        );
                        session.release_claim();
                        if ephemeral {
                            let role = session.role().to_string();
                            self.pool.dispose(&role).await;
                        }
                        drop(budget_permit);
                        continue;
                    }
                    // A prerequisite window is gone: never replay blind.
                    cache.mark_failed(&exact.id);
                    self.emitter.emit_as(
                        "system",
                        vec![DesktopAction::ToastShow {
                            message: format!(
                                "Cached sequence \"{}\" is no longer valid; running normally.",
                                exact.label
                            ),
                            variant: Some("warning".into()),
                        }],
                    );
                } else if !lookup.candidates.is_empty() {
                    reload_hint = format_reload_options(&lookup.candidates);
                }
            }

            let prompt = format!(
                "{}{}{}{}{}",
                self.tape.format_for_prompt(&PromptScope::MainOnly),
                self.registry.format_open_windows(),
                self.timeline.drain_for_main_prompt(),
                reload_hint,
                task.content
            );

            // The turn runs concurrently (bounded by the budget slot it
            // carries); the loop moves on to the next task.
            let this = Arc::clone(&self);
            let monitor_owned = monitor.clone();
            tokio::spawn(async move {
                let _budget = budget_permit;
                let _guard = this.in_flight.guard();
                this.run_turn(monitor_owned, task, prompt, session, ephemeral, fingerprint)
                    .await;
            });
        }
        debug!(%monitor, "main drain loop ended");
    }

    async fn run_turn(
        &self,
        monitor: String,
        task: Task,
        prompt: String,
        session: Arc<AgentSession>,
        ephemeral: bool,
        fingerprint: Option<Fingerprint>,
    ) {
        let outcome = session
            .run_claimed(prompt, &task.content, MessageSource::Main, true)
            .await;

        match &outcome {
            Ok(TurnOutcome::Completed { actions, .. }) => {
                if let (Some(cache), Some(fp)) = (&self.cache, fingerprint) {
                    if !actions.is_empty() {
                        let label = label_for(&task.content);
                        let required = required_windows(actions);
                        cache.record(fp, actions.clone(), label, required);
                    }
                }
            }
            Ok(TurnOutcome::Interrupted) => {
                debug!(%monitor, task = %task.task_id, "turn interrupted");
            }
            Ok(TurnOutcome::Failed { error }) => {
                warn!(%monitor, task = %task.task_id, "turn failed: {error}");
            }
            Err(e) => {
                warn!(%monitor, task = %task.task_id, "turn rejected: {e}");
            }
        }

        if ephemeral {
            let role = session.role().to_string();
            self.pool.dispose(&role).await;
        }
    }
}

/// Windows a recorded sequence depends on: every window it references,
/// creations included.  Replay is a refresh of an existing desktop — a
/// `window.create` replayed onto a live window replaces it in place, which
/// keeps replays idempotent; replaying onto a missing window would conjure
/// state the user already dismissed, so such entries are refused.
pub(crate) fn required_windows(actions: &[DesktopAction]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut required = Vec::new();
    for action in actions {
        if let Some(w) = action.window_id() {
            if seen.insert(w) {
                required.push(w.to_string());
            }
        }
    }
    required
}

pub(crate) fn label_for(content: &str) -> String {
    let normalized = svea_cache::normalize(content);
    normalized.chars().take(60).collect()
}

fn format_reload_options(candidates: &[ScoredCandidate]) -> String {
    let mut out = String::from("<reload_options>\n");
    for c in candidates {
        out.push_str(&format!(
            "- id={} label=\"{}\" similarity={:.2}\n",
            c.entry.id, c.entry.label, c.score
        ));
    }
    out.push_str(
        "If one of these matches the request, call the reload tool with its id \
         to replay the cached actions instead of redoing the work.\n</reload_options>\n",
    );
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
