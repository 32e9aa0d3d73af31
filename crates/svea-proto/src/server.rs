// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use crate::action::DesktopAction;

/// Events pushed by the server to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    ConnectionStatus {
        status: ConnectionState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A batch of desktop actions the client applies atomically in order.
    Actions { actions: Vec<DesktopAction> },

    AgentThinking {
        agent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_complete: Option<bool>,
    },

    AgentResponse {
        agent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_complete: Option<bool>,
    },

    ToolProgress {
        agent_id: String,
        tool_name: String,
        status: ToolStatus,
    },

    /// The task was dequeued and an agent is handling it now.
    MessageAccepted {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },

    /// The task is waiting behind others; `position` 1 means it runs next.
    MessageQueued {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        position: usize,
    },

    WindowAgentStatus {
        window_id: String,
        agent_id: String,
        status: WindowAgentState,
    },

    Error { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Error,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAgentState {
    Created,
    Active,
    Idle,
    Destroyed,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
