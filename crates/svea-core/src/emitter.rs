// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The single write path for desktop actions.
//!
//! Every action a tool emits flows through here exactly once: applied to
//! the window-state registry, appended to the session log, summarized into
//! the interaction timeline, and published to the owning connection as one
//! `ACTIONS` batch.  Actions the registry rejects (lock violations, missing
//! windows) are dropped from the batch and logged — never forwarded.

use std::sync::Arc;

use svea_proto::{DesktopAction, ServerEvent};
use svea_session::SessionLogger;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{AgentRole, BroadcastCenter, InteractionTimeline, WindowStateRegistry};

/// Out-of-band notifications from the action path back to the owning
/// context pool (same shape as a completion channel: the emitter never
/// calls upward, it sends).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreSignal {
    /// A `window.close` was applied; the window agent (if any) must be
    /// torn down.
    WindowClosed { window_id: String },
    /// A `dialog.confirm` was applied; the pool parks a pending entry so
    /// DIALOG_FEEDBACK can resolve it.
    DialogOpened { dialog_id: String },
}

pub struct ActionEmitter {
    registry: Arc<WindowStateRegistry>,
    broadcast: Arc<BroadcastCenter>,
    timeline: Arc<InteractionTimeline>,
    logger: Arc<SessionLogger>,
    connection_id: String,
    signal_tx: mpsc::UnboundedSender<CoreSignal>,
}

impl ActionEmitter {
    pub fn new(
        registry: Arc<WindowStateRegistry>,
        broadcast: Arc<BroadcastCenter>,
        timeline: Arc<InteractionTimeline>,
        logger: Arc<SessionLogger>,
        connection_id: impl Into<String>,
        signal_tx: mpsc::UnboundedSender<CoreSignal>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            broadcast,
            timeline,
            logger,
            connection_id: connection_id.into(),
            signal_tx,
        })
    }

    /// Emit a batch on behalf of an agent.  Returns the actions that passed
    /// the registry and were published.
    pub fn emit(&self, agent: &AgentRole, actions: Vec<DesktopAction>) -> Vec<DesktopAction> {
        self.emit_as(&agent.to_string(), actions)
    }

    /// Emit under an arbitrary agent id (`"system"` during teardown).
    pub fn emit_as(&self, agent_id: &str, actions: Vec<DesktopAction>) -> Vec<DesktopAction> {
        let mut applied = Vec::with_capacity(actions.len());
        for action in actions {
            match self.registry.apply(&action) {
                Ok(()) => {
                    self.logger.log_action(agent_id, &action);
                    let summary = match action.window_id() {
                        Some(w) => format!("{} on {w}", action.kind()),
                        None => action.kind().to_string(),
                    };
                    self.timeline.push_agent_action(summary);
                    applied.push(action);
                }
                Err(e) => {
                    warn!(%agent_id, kind = action.kind(), "action rejected: {e}");
                }
            }
        }

        if applied.is_empty() {
            return applied;
        }

        for action in &applied {
            match action {
                DesktopAction::WindowClose { window_id } => {
                    let _ = self.signal_tx.send(CoreSignal::WindowClosed {
                        window_id: window_id.clone(),
                    });
                }
                DesktopAction::DialogConfirm { dialog_id, .. } => {
                    let _ = self.signal_tx.send(CoreSignal::DialogOpened {
                        dialog_id: dialog_id.clone(),
                    });
                }
                _ => {}
            }
        }

        debug!(%agent_id, count = applied.len(), "actions emitted");
        self.broadcast.publish_to_connection(
            ServerEvent::Actions { actions: applied.clone() },
            &self.connection_id,
        );
        applied
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
