// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use crate::interaction::UserInteraction;

/// Events sent by the browser client over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// A chat message for the active monitor's main agent.
    UserMessage {
        message_id: String,
        content: String,
        /// Interactions captured since the previous message; pushed into
        /// the timeline before the task is queued.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interactions: Option<Vec<UserInteraction>>,
    },

    /// A chat message addressed to one window's agent.
    WindowMessage {
        message_id: String,
        window_id: String,
        content: String,
    },

    /// A UI component inside a window fired an action (button click, form
    /// submit).  Routed as a window task so it queues behind the window's
    /// in-flight work while the window is locked.
    ComponentAction {
        window_id: String,
        window_title: String,
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        form_data: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        form_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        component_path: Option<String>,
    },

    /// Answer to a `dialog.confirm` action.
    DialogFeedback {
        dialog_id: String,
        confirmed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remember_choice: Option<bool>,
    },

    /// Outcome of an iframe render request, reported back to the tool that
    /// spawned it.
    RenderingFeedback {
        request_id: String,
        window_id: String,
        renderer: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locked: Option<bool>,
    },

    /// Interrupt every running agent on this connection.
    Interrupt,

    /// Interrupt one agent by role.
    InterruptAgent { agent_id: String },

    /// Swap the provider used for subsequent agent spawns.
    SetProvider { provider: String },

    /// Create a main agent for a monitor.
    SubscribeMonitor { monitor_id: String },

    /// Destroy a monitor's main agent.
    RemoveMonitor { monitor_id: String },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
