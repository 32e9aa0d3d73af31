// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! One running agent bound to a provider handle.
//!
//! ```text
//!   created ──▶ idle ──handle──▶ running ──stream end──▶ idle
//!                  ▲                │
//!                  │                ├─interrupt─▶ interrupting ─▶ idle
//!                  │                └─dispose──▶ disposed (terminal)
//! ```
//!
//! At most one in-flight `handle` per session; the processors own that
//! guarantee structurally (one drain loop per queue) and `try_claim` makes
//! a violation loud instead of silent.

use std::sync::Mutex;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use svea_model::{Provider, ProviderEvent};
use svea_proto::{DesktopAction, ServerEvent, ToolStatus};
use svea_session::SessionLogger;
use tracing::{debug, error, warn};

use crate::{
    ActionEmitter, AgentRole, BroadcastCenter, ContextRole, ContextTape, CoreError, LimiterPermit,
    MessageSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Running,
    Interrupting,
    Disposed,
}

/// How a turn ended.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The stream completed; `actions` is everything the turn emitted and
    /// the registry accepted.
    Completed {
        text: String,
        actions: Vec<DesktopAction>,
    },
    /// Interrupted mid-stream; nothing was committed to the tape beyond
    /// the user message.
    Interrupted,
    /// The provider stream failed; the error was surfaced on the agent's
    /// connection and the session is idle again.
    Failed { error: String },
}

pub struct AgentSession {
    role: AgentRole,
    provider: Arc<dyn Provider>,
    phase: Mutex<SessionPhase>,
    /// Held for the whole life of the session; dropped on dispose, which
    /// returns the slot to the global limiter.
    permit: Mutex<Option<LimiterPermit>>,
    tape: Arc<ContextTape>,
    emitter: Arc<ActionEmitter>,
    broadcast: Arc<BroadcastCenter>,
    logger: Arc<SessionLogger>,
    created_at: DateTime<Utc>,
}

impl AgentSession {
    pub fn new(
        role: AgentRole,
        provider: Arc<dyn Provider>,
        permit: LimiterPermit,
        tape: Arc<ContextTape>,
        emitter: Arc<ActionEmitter>,
        broadcast: Arc<BroadcastCenter>,
        logger: Arc<SessionLogger>,
    ) -> Arc<Self> {
        Arc::new(Self {
            role,
            provider,
            phase: Mutex::new(SessionPhase::Idle),
            permit: Mutex::new(Some(permit)),
            tape,
            emitter,
            broadcast,
            logger,
            created_at: Utc::now(),
        })
    }

    pub fn role(&self) -> &AgentRole {
        &self.role
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn provider_name(&self) -> String {
        self.provider.name().to_string()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().unwrap()
    }

    pub fn is_idle(&self) -> bool {
        self.phase() == SessionPhase::Idle
    }

    /// Atomically claim the session for one turn (idle → running).  The
    /// processors claim under their drain-loop serialization before they
    /// spawn the turn, so a busy main agent is detected without racing.
    pub fn try_claim(&self) -> bool {
        let mut phase = self.phase.lock().unwrap();
        if *phase == SessionPhase::Idle {
            *phase = SessionPhase::Running;
            true
        } else {
            false
        }
    }

    /// Give back an unused claim (cache replay took the turn instead).
    pub(crate) fn release_claim(&self) {
        let mut phase = self.phase.lock().unwrap();
        if *phase == SessionPhase::Running {
            *phase = SessionPhase::Idle;
        }
    }

    /// Claim and run one turn.
    pub async fn handle(
        &self,
        prompt: String,
        user_content: &str,
        source: MessageSource,
        append_to_tape: bool,
    ) -> Result<TurnOutcome, CoreError> {
        if !self.try_claim() {
            let role = self.role.to_string();
            return match self.phase() {
                SessionPhase::Disposed => Err(CoreError::SessionDisposed(role)),
                _ => {
                    // Reentrant handle is a contract violation of the
                    // single-owner rule; log it loudly, don't tell the client.
                    error!(%role, "reentrant handle() call");
                    Err(CoreError::SessionBusy(role))
                }
            };
        }
        self.run_claimed(prompt, user_content, source, append_to_tape)
            .await
    }

    /// Run one turn on a session already claimed with [`try_claim`].
    pub async fn run_claimed(
        &self,
        prompt: String,
        user_content: &str,
        source: MessageSource,
        append_to_tape: bool,
    ) -> Result<TurnOutcome, CoreError> {
        let role = self.role.to_string();

        if append_to_tape {
            self.tape
                .append(ContextRole::User, user_content, source.clone());
        }
        self.logger.log_user(&role, user_content);

        let result = self.run_stream(prompt, &role).await;

        // Back to idle regardless of outcome — dispose is the only terminal
        // transition and may have happened concurrently.
        {
            let mut phase = self.phase.lock().unwrap();
            if *phase != SessionPhase::Disposed {
                *phase = SessionPhase::Idle;
            }
        }

        match result {
            Ok(StreamEnd { text, actions, completed: true }) => {
                if append_to_tape && !text.is_empty() {
                    self.tape.append(ContextRole::Assistant, &text, source);
                }
                self.logger.log_assistant(&role, &text);
                self.broadcast.publish_to_agent(
                    ServerEvent::AgentResponse {
                        agent_id: role,
                        content: Some(text.clone()),
                        is_complete: Some(true),
                    },
                    &self.role.to_string(),
                );
                Ok(TurnOutcome::Completed { text, actions })
            }
            Ok(StreamEnd { completed: false, .. }) => {
                // Incomplete turns leave no assistant entry on the tape.
                debug!(role = %self.role, "turn interrupted");
                Ok(TurnOutcome::Interrupted)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(role = %self.role, "provider stream failed: {message}");
                self.broadcast.publish_to_agent(
                    ServerEvent::Error { error: message.clone() },
                    &self.role.to_string(),
                );
                Ok(TurnOutcome::Failed { error: message })
            }
        }
    }

    async fn run_stream(&self, prompt: String, role: &str) -> anyhow::Result<StreamEnd> {
        let mut stream = self.provider.query(prompt).await?;
        let mut text = String::new();
        let mut actions = Vec::new();
        let mut completed = false;

        while let Some(event) = stream.next().await {
            match event? {
                ProviderEvent::Thinking { text: chunk } => {
                    self.logger.log_thinking(role, &chunk);
                    self.broadcast.publish_to_agent(
                        ServerEvent::AgentThinking {
                            agent_id: role.to_string(),
                            content: Some(chunk),
                            is_complete: None,
                        },
                        role,
                    );
                }
                ProviderEvent::Assistant { text: chunk } => {
                    text.push_str(&chunk);
                    self.broadcast.publish_to_agent(
                        ServerEvent::AgentResponse {
                            agent_id: role.to_string(),
                            content: Some(chunk),
                            is_complete: Some(false),
                        },
                        role,
                    );
                }
                ProviderEvent::ToolUse { id, name, input } => {
                    self.logger.log_tool_use(role, &name, &input, &id);
                    self.broadcast.publish_to_agent(
                        ServerEvent::ToolProgress {
                            agent_id: role.to_string(),
                            tool_name: name,
                            status: ToolStatus::Running,
                        },
                        role,
                    );
                }
                ProviderEvent::ToolResult {
                    id,
                    name,
                    content,
                    actions: tool_actions,
                    is_error,
                } => {
                    if !tool_actions.is_empty() {
                        let applied = self.emitter.emit(&self.role, tool_actions);
                        actions.extend(applied);
                    }
                    self.logger
                        .log_tool_result(role, &name, &id, &content, is_error);
                    self.broadcast.publish_to_agent(
                        ServerEvent::ToolProgress {
                            agent_id: role.to_string(),
                            tool_name: name,
                            status: if is_error {
                                ToolStatus::Error
                            } else {
                                ToolStatus::Complete
                            },
                        },
                        role,
                    );
                }
                ProviderEvent::Done => completed = true,
            }
        }

        Ok(StreamEnd { text, actions, completed })
    }

    /// Cancel the in-flight stream.  No-op when idle; returns immediately
    /// when an interrupt is already underway.
    pub async fn interrupt(&self) {
        let should_cancel = {
            let mut phase = self.phase.lock().unwrap();
            match *phase {
                SessionPhase::Running => {
                    *phase = SessionPhase::Interrupting;
                    true
                }
                _ => false,
            }
        };
        if should_cancel {
            debug!(role = %self.role, "interrupting");
            self.provider.interrupt().await;
        }
    }

    /// Terminal transition: close the provider, return the limiter slot,
    /// unregister from the broadcast center.  Double dispose is a logged
    /// no-op.
    pub async fn dispose(&self) {
        {
            let mut phase = self.phase.lock().unwrap();
            if *phase == SessionPhase::Disposed {
                warn!(role = %self.role, "dispose of an already-disposed session");
                return;
            }
            *phase = SessionPhase::Disposed;
        }
        self.provider.interrupt().await;
        self.provider.dispose().await;
        self.permit.lock().unwrap().take();
        self.broadcast.unregister_agent(&self.role.to_string());
        debug!(role = %self.role, "session disposed");
    }
}

struct StreamEnd {
    text: String,
    actions: Vec<DesktopAction>,
    completed: bool,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
