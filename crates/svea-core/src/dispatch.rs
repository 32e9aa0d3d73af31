// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! One-off task agents: spawned for a single objective with a
//! profile-scoped tool surface, run for one turn, disposed on return.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::pool::{InFlightTracker, ProviderSource};
use crate::{
    AgentLimiter, AgentPool, ContextTape, CoreError, MessageSource, PromptScope, TurnOutcome,
};

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub objective: String,
    /// Tool profile the provider adapter scopes the agent to.
    pub profile: String,
    pub hint: Option<String>,
    pub monitor_id: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub dispatched: bool,
    pub reason: Option<String>,
    pub result: Option<String>,
}

impl DispatchOutcome {
    fn refused(reason: impl Into<String>) -> Self {
        Self {
            dispatched: false,
            reason: Some(reason.into()),
            result: None,
        }
    }
}

pub struct TaskDispatcher {
    pool: Arc<AgentPool>,
    limiter: Arc<AgentLimiter>,
    tape: Arc<ContextTape>,
    providers: Arc<ProviderSource>,
    in_flight: Arc<InFlightTracker>,
    acquire_timeout: Duration,
}

impl TaskDispatcher {
    pub fn new(
        pool: Arc<AgentPool>,
        limiter: Arc<AgentLimiter>,
        tape: Arc<ContextTape>,
        providers: Arc<ProviderSource>,
        in_flight: Arc<InFlightTracker>,
        acquire_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            limiter,
            tape,
            providers,
            in_flight,
            acquire_timeout,
        })
    }

    /// Spawn a `task-<n>` agent for one objective and return its final
    /// assistant message.  Actions it emits are routed normally through the
    /// action path.  The agent never outlives the call.
    pub async fn dispatch(&self, req: DispatchRequest) -> DispatchOutcome {
        let permit = match tokio::time::timeout(self.acquire_timeout, self.limiter.acquire()).await
        {
            Ok(Ok(p)) => p,
            Ok(Err(_)) | Err(_) => {
                debug!("dispatch refused: limit");
                return DispatchOutcome::refused("limit");
            }
        };
        let provider = match self.providers.take().await {
            Ok(p) => p,
            Err(e) => {
                warn!("dispatch refused, provider unavailable: {e}");
                return DispatchOutcome::refused("provider");
            }
        };

        let role = self.pool.next_task_role();
        let parent = req.monitor_id.as_ref().map(|m| format!("main-{m}"));
        let session =
            self.pool
                .create_with_permit(role.clone(), provider, permit, parent.as_deref());

        let mut prompt = self.tape.format_for_prompt(&PromptScope::MainOnly);
        prompt.push_str(&format!("<profile>{}</profile>\n", req.profile));
        prompt.push_str(&format!("<objective>{}</objective>\n", req.objective));
        if let Some(hint) = &req.hint {
            prompt.push_str(&format!("<hint>{hint}</hint>\n"));
        }

        let outcome = {
            let _guard = self.in_flight.guard();
            // Task-agent turns do not enter the context tape; they are
            // one-shot side quests, visible only in the session log.
            session
                .handle(prompt, &req.objective, MessageSource::Main, false)
                .await
        };

        let role_str = role.to_string();
        self.pool.dispose(&role_str).await;

        match outcome {
            Ok(TurnOutcome::Completed { text, .. }) => DispatchOutcome {
                dispatched: true,
                reason: None,
                result: Some(text),
            },
            Ok(TurnOutcome::Interrupted) => DispatchOutcome::refused("interrupted"),
            Ok(TurnOutcome::Failed { error }) => DispatchOutcome::refused(error),
            Err(e) => DispatchOutcome::refused(e.to_string()),
        }
    }
}
