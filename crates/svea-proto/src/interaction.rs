// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw user interaction captured by the client between agent turns.
///
/// These accumulate in the interaction timeline and are drained into the
/// next main-agent prompt.  `Drawing` is the exception: it is consumed by
/// the client-facing drawing pipeline and never enters the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum UserInteraction {
    Click {
        x: f64,
        y: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        window_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Drag {
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        window_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Select {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        window_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Gesture {
        name: String,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    Drawing {
        strokes: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
}

impl UserInteraction {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Click { timestamp, .. }
            | Self::Drag { timestamp, .. }
            | Self::Select { timestamp, .. }
            | Self::Gesture { timestamp, .. }
            | Self::Drawing { timestamp, .. } => *timestamp,
        }
    }

    /// One-line description used when formatting the timeline into a prompt.
    pub fn describe(&self) -> String {
        match self {
            Self::Click { x, y, window_id, .. } => match window_id {
                Some(w) => format!("clicked at ({x:.0}, {y:.0}) in window {w}"),
                None => format!("clicked at ({x:.0}, {y:.0}) on the desktop"),
            },
            Self::Drag {
                from_x,
                from_y,
                to_x,
                to_y,
                window_id,
                ..
            } => match window_id {
                Some(w) => {
                    format!("dragged ({from_x:.0}, {from_y:.0}) → ({to_x:.0}, {to_y:.0}) in window {w}")
                }
                None => format!("dragged ({from_x:.0}, {from_y:.0}) → ({to_x:.0}, {to_y:.0})"),
            },
            Self::Select { text, window_id, .. } => {
                let preview: String = text.chars().take(80).collect();
                match window_id {
                    Some(w) => format!("selected \"{preview}\" in window {w}"),
                    None => format!("selected \"{preview}\""),
                }
            }
            Self::Gesture { name, .. } => format!("gesture: {name}"),
            Self::Drawing { .. } => "drew on the canvas".to_string(),
        }
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self, Self::Drawing { .. })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
