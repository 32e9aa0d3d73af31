// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `ContextPool` — the facade the WebSocket layer calls into.
//!
//! One pool per connection.  It owns the agent pool, both task processors,
//! the dispatcher, the context tape, the interaction timeline, the window
//! registry mirror, the per-monitor queues and budget, and the pending
//! dialog/render tables.  The global agent limiter, the broadcast center,
//! the reload cache, and the session logger are process-wide and shared.
//!
//! ```text
//!   WS handler ──ClientEvent──▶ ContextPool ──▶ MainTaskProcessor ──▶ AgentSession
//!                                   │──────────▶ WindowTaskProcessor ──▶  │
//!                                   │──────────▶ TaskDispatcher           │ actions
//!                                   ▼                                     ▼
//!                             CoreSignal loop ◀───────────────── ActionEmitter
//!                          (window close cascade)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use svea_cache::ReloadCache;
use svea_config::Config;
use svea_model::WarmPool;
use svea_proto::{DesktopAction, ServerEvent, UserInteraction};
use svea_session::{RestoredSession, SessionLogger};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pool::{InFlightTracker, ProviderSource};
use crate::{
    ActionEmitter, AgentLimiter, AgentPool, AgentRole, BroadcastCenter, ContextMessage,
    ContextRole, ContextTape, CoreError, CoreSignal, DispatchOutcome, DispatchRequest,
    InteractionTimeline, MainTaskProcessor, MessageSource, MonitorBudget, PoolCounters, Task,
    TaskDispatcher, TaskKind, WindowStateRegistry, WindowTaskProcessor,
};

/// Everything a pool shares with the rest of the process.
pub struct ContextPoolOptions {
    pub connection_id: String,
    pub config: Config,
    pub broadcast: Arc<BroadcastCenter>,
    pub limiter: Arc<AgentLimiter>,
    pub warm_pool: Arc<WarmPool>,
    pub provider_name: String,
    pub cache: Option<Arc<ReloadCache>>,
    pub logger: Arc<SessionLogger>,
}

/// Outcome of an iframe render, routed back to whoever asked for it.
#[derive(Debug, Clone)]
pub struct RenderFeedback {
    pub request_id: String,
    pub window_id: String,
    pub renderer: String,
    pub success: bool,
    pub error: Option<String>,
    pub url: Option<String>,
    pub locked: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub connection_id: String,
    pub agents: PoolCounters,
    pub limiter_available: usize,
    pub limiter_in_flight: usize,
    pub monitors: Vec<String>,
    pub main_queues: HashMap<String, usize>,
    pub window_agents: usize,
    pub window_queued: usize,
    pub windows: usize,
    pub tape_messages: usize,
    pub timeline_entries: usize,
    pub cache_entries: Option<usize>,
}

pub struct ContextPool {
    connection_id: String,
    cfg: svea_config::OrchestratorConfig,
    broadcast: Arc<BroadcastCenter>,
    limiter: Arc<AgentLimiter>,
    providers: Arc<ProviderSource>,
    budget: Arc<MonitorBudget>,
    tape: Arc<ContextTape>,
    timeline: Arc<InteractionTimeline>,
    registry: Arc<WindowStateRegistry>,
    cache: Option<Arc<ReloadCache>>,
    logger: Arc<SessionLogger>,
    emitter: Arc<ActionEmitter>,
    pool: Arc<AgentPool>,
    main_proc: Arc<MainTaskProcessor>,
    window_proc: Arc<WindowTaskProcessor>,
    dispatcher: Arc<TaskDispatcher>,
    resetting: Arc<AtomicBool>,
    in_flight: Arc<InFlightTracker>,
    monitors: Mutex<Vec<String>>,
    pending_dialogs: Arc<Mutex<HashMap<String, chrono::DateTime<chrono::Utc>>>>,
    pending_renders: Mutex<HashMap<String, oneshot::Sender<RenderFeedback>>>,
    signal_task: Mutex<Option<JoinHandle<()>>>,
}

impl ContextPool {
    pub fn new(opts: ContextPoolOptions) -> Arc<Self> {
        let cfg = opts.config.orchestrator.clone();
        let connection_id = opts.connection_id;
        let resetting = Arc::new(AtomicBool::new(false));
        let in_flight = InFlightTracker::new();

        let budget = MonitorBudget::new(cfg.monitor_budget);
        let tape = Arc::new(ContextTape::new(cfg.tape_main_cap));
        let timeline = Arc::new(InteractionTimeline::new(cfg.timeline_cap));
        let registry = Arc::new(WindowStateRegistry::new());
        let providers = ProviderSource::new(opts.warm_pool, opts.provider_name);

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let emitter = ActionEmitter::new(
            Arc::clone(&registry),
            Arc::clone(&opts.broadcast),
            Arc::clone(&timeline),
            Arc::clone(&opts.logger),
            connection_id.clone(),
            signal_tx,
        );

        let pool = AgentPool::new(
            Arc::clone(&opts.broadcast),
            Arc::clone(&opts.logger),
            Arc::clone(&tape),
            Arc::clone(&emitter),
            connection_id.clone(),
        );

        let acquire_timeout = Duration::from_secs(cfg.acquire_timeout_secs);
        let main_proc = MainTaskProcessor::new(
            cfg.main_queue_cap,
            Arc::clone(&pool),
            Arc::clone(&opts.limiter),
            Arc::clone(&budget),
            Arc::clone(&tape),
            Arc::clone(&timeline),
            Arc::clone(&registry),
            opts.cache.clone(),
            Arc::clone(&emitter),
            Arc::clone(&opts.broadcast),
            Arc::clone(&providers),
            Arc::clone(&resetting),
            Arc::clone(&in_flight),
            connection_id.clone(),
        );
        let window_proc = WindowTaskProcessor::new(
            Arc::clone(&pool),
            Arc::clone(&opts.limiter),
            Arc::clone(&tape),
            Arc::clone(&registry),
            Arc::clone(&emitter),
            Arc::clone(&opts.broadcast),
            Arc::clone(&providers),
            Arc::clone(&resetting),
            Arc::clone(&in_flight),
            acquire_timeout,
            cfg.prune_window_context_on_close,
            connection_id.clone(),
        );
        let dispatcher = TaskDispatcher::new(
            Arc::clone(&pool),
            Arc::clone(&opts.limiter),
            Arc::clone(&tape),
            Arc::clone(&providers),
            Arc::clone(&in_flight),
            acquire_timeout,
        );

        let pending_dialogs = Arc::new(Mutex::new(HashMap::new()));
        let signal_task = spawn_signal_loop(
            signal_rx,
            Arc::clone(&window_proc),
            Arc::clone(&pending_dialogs),
        );

        Arc::new(Self {
            connection_id,
            cfg,
            broadcast: opts.broadcast,
            limiter: opts.limiter,
            providers,
            budget,
            tape,
            timeline,
            registry,
            cache: opts.cache,
            logger: opts.logger,
            emitter,
            pool,
            main_proc,
            window_proc,
            dispatcher,
            resetting,
            in_flight,
            monitors: Mutex::new(Vec::new()),
            pending_dialogs,
            pending_renders: Mutex::new(HashMap::new()),
            signal_task: Mutex::new(Some(signal_task)),
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn registry(&self) -> &Arc<WindowStateRegistry> {
        &self.registry
    }

    pub fn emitter(&self) -> &Arc<ActionEmitter> {
        &self.emitter
    }

    pub fn provider_name(&self) -> String {
        self.providers.provider_name()
    }

    /// Publish one event to this pool's connection.
    pub fn publish(&self, event: ServerEvent) -> bool {
        self.broadcast
            .publish_to_connection(event, &self.connection_id)
    }

    // ── Monitor lifecycle ─────────────────────────────────────────────────────

    pub async fn create_monitor_agent(&self, monitor: &str) -> Result<(), CoreError> {
        if self.resetting.load(Ordering::SeqCst) {
            return Err(CoreError::PoolResetting);
        }
        self.create_monitor_inner(monitor).await
    }

    async fn create_monitor_inner(&self, monitor: &str) -> Result<(), CoreError> {
        let role = AgentRole::main(monitor);
        if self.pool.get(&role).is_none() {
            let timeout = Duration::from_secs(self.cfg.acquire_timeout_secs);
            let permit = match tokio::time::timeout(timeout, self.limiter.acquire()).await {
                Ok(Ok(p)) => p,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(CoreError::LimitReached),
            };
            let provider = self
                .providers
                .take()
                .await
                .map_err(|e| CoreError::Provider(e.to_string()))?;
            self.pool
                .create_with_permit(role.clone(), provider, permit, None);
            info!(%monitor, "main agent created");
        }
        self.window_proc.set_parent_role(&role.to_string());
        self.main_proc.ensure_monitor(monitor);
        let mut monitors = self.monitors.lock().unwrap();
        if !monitors.iter().any(|m| m == monitor) {
            monitors.push(monitor.to_string());
        }
        Ok(())
    }

    pub async fn remove_monitor_agent(&self, monitor: &str) {
        self.main_proc.remove_monitor(monitor);
        self.pool.dispose(&AgentRole::main(monitor).to_string()).await;
        self.monitors.lock().unwrap().retain(|m| m != monitor);
        info!(%monitor, "monitor removed");
    }

    /// The monitor USER_MESSAGE tasks route to: the first subscribed one.
    pub fn active_monitor(&self) -> Option<String> {
        self.monitors.lock().unwrap().first().cloned()
    }

    // ── Task routing ──────────────────────────────────────────────────────────

    pub async fn handle_task(&self, task: Task) -> Result<(), CoreError> {
        match task.kind {
            TaskKind::Main => self.main_proc.submit(task),
            TaskKind::Window | TaskKind::ComponentAction => self.window_proc.submit(task).await,
        }
    }

    pub async fn dispatch_task(&self, req: DispatchRequest) -> DispatchOutcome {
        if self.resetting.load(Ordering::SeqCst) {
            return DispatchOutcome {
                dispatched: false,
                reason: Some("resetting".into()),
                result: None,
            };
        }
        self.dispatcher.dispatch(req).await
    }

    pub fn push_user_interactions(&self, interactions: Vec<UserInteraction>) {
        for i in interactions {
            self.timeline.push_user(i);
        }
    }

    pub async fn handle_window_close(&self, window_id: &str) {
        self.window_proc.handle_close(window_id).await;
    }

    // ── Interrupts ────────────────────────────────────────────────────────────

    pub async fn interrupt_all(&self) {
        self.pool.interrupt_all().await;
    }

    pub async fn interrupt_agent(&self, role: &str) -> bool {
        self.pool.interrupt_role(role).await
    }

    // ── Provider swap ─────────────────────────────────────────────────────────

    pub fn set_provider(&self, warm_pool: Arc<WarmPool>, name: impl Into<String>) {
        self.providers.replace(warm_pool, name);
    }

    // ── Dialog / render feedback ──────────────────────────────────────────────

    pub fn resolve_dialog(&self, dialog_id: &str, confirmed: bool, remember: Option<bool>) -> bool {
        let known = self
            .pending_dialogs
            .lock()
            .unwrap()
            .remove(dialog_id)
            .is_some();
        if known {
            info!(%dialog_id, confirmed, ?remember, "dialog resolved");
            self.logger.log_user(
                "system",
                &format!("dialog {dialog_id} answered: confirmed={confirmed}"),
            );
        } else {
            warn!(%dialog_id, "feedback for unknown dialog");
        }
        known
    }

    pub fn pending_dialog_count(&self) -> usize {
        self.pending_dialogs.lock().unwrap().len()
    }

    /// Park a waiter for an iframe render outcome (called by the tool layer
    /// when it requests a render).
    pub fn register_render_request(&self, request_id: &str) -> oneshot::Receiver<RenderFeedback> {
        let (tx, rx) = oneshot::channel();
        self.pending_renders
            .lock()
            .unwrap()
            .insert(request_id.to_string(), tx);
        rx
    }

    pub fn resolve_render(&self, feedback: RenderFeedback) -> bool {
        let waiter = self
            .pending_renders
            .lock()
            .unwrap()
            .remove(&feedback.request_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(feedback);
                true
            }
            None => {
                if !feedback.success {
                    self.emitter.emit_as(
                        "system",
                        vec![DesktopAction::ToastShow {
                            message: format!(
                                "Rendering failed in window {}: {}",
                                feedback.window_id,
                                feedback.error.as_deref().unwrap_or("unknown error")
                            ),
                            variant: Some("error".into()),
                        }],
                    );
                }
                false
            }
        }
    }

    // ── Restore ───────────────────────────────────────────────────────────────

    /// Replay the previous session: fold its action stream to the terminal
    /// window set, re-emit those windows as creates, and seed the tape with
    /// the main transcript.
    pub fn restore(&self, restored: &RestoredSession) {
        let scratch = WindowStateRegistry::new();
        for action in &restored.actions {
            // Rejections are expected here: the stream may reference
            // windows that were closed later in the same session.
            let _ = scratch.apply(action);
        }
        let creates: Vec<DesktopAction> = scratch
            .list_windows()
            .into_iter()
            .map(|w| DesktopAction::WindowCreate {
                window_id: w.id,
                title: w.title,
                bounds: w.bounds,
                content: w.content,
            })
            .collect();
        let restored_windows = creates.len();
        if !creates.is_empty() {
            self.emitter.emit_as("system", creates);
        }

        let messages: Vec<ContextMessage> = restored
            .main_messages
            .iter()
            .map(|m| ContextMessage {
                role: if m.role == "assistant" {
                    ContextRole::Assistant
                } else {
                    ContextRole::User
                },
                content: m.content.clone(),
                timestamp: m.timestamp,
                source: MessageSource::Main,
            })
            .collect();
        let restored_messages = messages.len();
        self.tape.restore(messages);
        info!(restored_windows, restored_messages, "session state restored");
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            connection_id: self.connection_id.clone(),
            agents: self.pool.counters(),
            limiter_available: self.limiter.available(),
            limiter_in_flight: self.limiter.in_flight(),
            monitors: self.monitors.lock().unwrap().clone(),
            main_queues: self.main_proc.queue_lens(),
            window_agents: self.window_proc.window_count(),
            window_queued: self.window_proc.queued_total(),
            windows: self.registry.window_count(),
            tape_messages: self.tape.len(),
            timeline_entries: self.timeline.len(),
            cache_entries: self.cache.as_ref().map(|c| c.len()),
        }
    }

    pub fn session_count(&self) -> usize {
        self.pool.session_count()
    }

    // ── Reset / cleanup ───────────────────────────────────────────────────────

    /// Tear the pool down to a clean slate and respawn one main agent per
    /// previously active monitor.
    pub async fn reset(&self) -> Result<(), CoreError> {
        if self.resetting.swap(true, Ordering::SeqCst) {
            return Err(CoreError::PoolResetting);
        }
        info!(connection = %self.connection_id, "pool reset started");

        // New tasks are rejected from here on; pending ones are discarded.
        let dropped = self.main_proc.clear_queues();
        if dropped > 0 {
            debug!(dropped, "queued main tasks discarded by reset");
        }

        // Everyone parked on a semaphore gets the sentinel error.
        self.limiter.clear_waiting();
        self.budget.clear_waiting();

        // Cancel running turns, then wait (bounded) for them to unwind.
        self.pool.interrupt_all().await;
        let drain = Duration::from_secs(self.cfg.reset_drain_timeout_secs);
        if !self.in_flight.wait_idle(drain).await {
            warn!("reset drain timed out, disposing with turns in flight");
        }

        // Window agents first (unlock + dispose), then everything left.
        self.window_proc.shutdown().await;
        self.pool.cleanup().await;

        // Close every window the client still shows.
        let closes: Vec<DesktopAction> = self
            .registry
            .list_windows()
            .into_iter()
            .map(|w| DesktopAction::WindowClose { window_id: w.id })
            .collect();
        if !closes.is_empty() {
            self.emitter.emit_as("system", closes);
        }

        // Clean slate.
        self.tape.clear();
        self.timeline.clear();
        self.registry.clear();
        self.budget.clear();
        self.pending_dialogs.lock().unwrap().clear();
        self.pending_renders.lock().unwrap().clear();

        // Fresh main agent for every monitor that was active before.
        let monitors = self.monitors.lock().unwrap().clone();
        for monitor in &monitors {
            if let Err(e) = self.create_monitor_inner(monitor).await {
                warn!(%monitor, "main agent respawn failed: {e}");
            }
        }

        self.resetting.store(false, Ordering::SeqCst);
        info!(connection = %self.connection_id, "pool reset complete");
        Ok(())
    }

    /// Final teardown on connection drop.  Failures are logged and
    /// swallowed so shutdown always progresses.
    pub async fn cleanup(&self) {
        self.resetting.store(true, Ordering::SeqCst);
        self.main_proc.shutdown();
        self.limiter.clear_waiting();
        self.budget.clear_waiting();
        self.pool.interrupt_all().await;
        let _ = self.in_flight.wait_idle(Duration::from_secs(5)).await;
        self.window_proc.shutdown().await;
        self.pool.cleanup().await;
        if let Some(handle) = self.signal_task.lock().unwrap().take() {
            handle.abort();
        }
        self.logger.flush();
        info!(connection = %self.connection_id, "context pool cleaned up");
    }
}

/// Drains `CoreSignal`s from the action path: window closes cascade into
/// agent teardown, dialog opens are parked for DIALOG_FEEDBACK.
fn spawn_signal_loop(
    mut signal_rx: mpsc::UnboundedReceiver<CoreSignal>,
    window_proc: Arc<WindowTaskProcessor>,
    pending_dialogs: Arc<Mutex<HashMap<String, chrono::DateTime<chrono::Utc>>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(signal) = signal_rx.recv().await {
            match signal {
                CoreSignal::WindowClosed { window_id } => {
                    window_proc.handle_close(&window_id).await;
                }
                CoreSignal::DialogOpened { dialog_id } => {
                    pending_dialogs
                        .lock()
                        .unwrap()
                        .insert(dialog_id, chrono::Utc::now());
                }
            }
        }
    })
}
