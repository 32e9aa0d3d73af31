// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Window geometry in client pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Window content as the client renders it: a renderer name plus
/// renderer-specific data (markdown string, component tree, image URL, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowContent {
    pub renderer: String,
    pub data: serde_json::Value,
}

impl WindowContent {
    pub fn text(renderer: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            renderer: renderer.into(),
            data: serde_json::Value::String(data.into()),
        }
    }
}

/// Server-side mirror of one client window.  Created by `window.create`,
/// mutated by the other `window.*` actions, removed by `window.close`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowState {
    pub id: String,
    pub title: String,
    pub bounds: WindowBounds,
    pub content: WindowContent,
    pub locked: bool,
    /// Role of the agent holding the lock; equal to the locking agent's id
    /// whenever `locked` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_state_serializes_camel_case() {
        let now = Utc::now();
        let w = WindowState {
            id: "w1".into(),
            title: "Notes".into(),
            bounds: WindowBounds { x: 0.0, y: 0.0, w: 320.0, h: 240.0 },
            content: WindowContent::text("markdown", "# hi"),
            locked: false,
            locked_by: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&w).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("lockedBy").is_none(), "None must be omitted");
    }

    #[test]
    fn content_text_helper_wraps_string() {
        let c = WindowContent::text("markdown", "hello");
        assert_eq!(c.data, serde_json::json!("hello"));
    }
}
