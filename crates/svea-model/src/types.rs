// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use svea_proto::DesktopAction;

/// One event in a provider's streaming response to a single prompt.
///
/// Tool execution happens inside the provider adapter (it owns the MCP tool
/// surface); the orchestrator observes the invocation and its result.  The
/// desktop actions a tool emitted ride on the `ToolResult` so the session
/// can mirror them into the registry, the session log, and the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// A reasoning chunk.  Forwarded to the client but never entered into
    /// the context tape.
    Thinking { text: String },

    /// A chunk of the assistant's visible reply.
    Assistant { text: String },

    /// The model invoked a tool.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// A tool finished; `actions` carries any desktop actions it emitted.
    ToolResult {
        id: String,
        name: String,
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        actions: Vec<DesktopAction>,
        #[serde(default)]
        is_error: bool,
    },

    /// The turn completed normally.  Always the final event of an
    /// uninterrupted stream.
    Done,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_omits_empty_actions() {
        let ev = ProviderEvent::ToolResult {
            id: "t1".into(),
            name: "window_create".into(),
            content: "ok".into(),
            actions: vec![],
            is_error: false,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("actions").is_none());
    }

    #[test]
    fn assistant_round_trips() {
        let ev = ProviderEvent::Assistant { text: "hello".into() };
        let json = serde_json::to_string(&ev).unwrap();
        let back: ProviderEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
