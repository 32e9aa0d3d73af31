// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use crate::window::{WindowBounds, WindowContent};

/// One desktop operation emitted by a tool, applied by the client window
/// manager and mirrored server-side by the window-state registry.
///
/// The tag is the dotted dispatch key the client switches on.  `window.*`
/// actions always carry a `windowId`; notification/toast/dialog actions are
/// pure passthrough and leave no registry state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum DesktopAction {
    #[serde(rename = "window.create")]
    WindowCreate {
        window_id: String,
        title: String,
        bounds: WindowBounds,
        content: WindowContent,
    },
    #[serde(rename = "window.close")]
    WindowClose { window_id: String },
    #[serde(rename = "window.setTitle")]
    WindowSetTitle { window_id: String, title: String },
    #[serde(rename = "window.setContent")]
    WindowSetContent {
        window_id: String,
        content: WindowContent,
    },
    #[serde(rename = "window.updateContent")]
    WindowUpdateContent {
        window_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        renderer: Option<String>,
        operation: UpdateOperation,
    },
    #[serde(rename = "window.move")]
    WindowMove { window_id: String, x: f64, y: f64 },
    #[serde(rename = "window.resize")]
    WindowResize { window_id: String, w: f64, h: f64 },
    #[serde(rename = "window.minimize")]
    WindowMinimize { window_id: String },
    #[serde(rename = "window.maximize")]
    WindowMaximize { window_id: String },
    #[serde(rename = "window.restore")]
    WindowRestore { window_id: String },
    #[serde(rename = "window.focus")]
    WindowFocus { window_id: String },
    #[serde(rename = "window.lock")]
    WindowLock { window_id: String, agent_id: String },
    #[serde(rename = "window.unlock")]
    WindowUnlock { window_id: String, agent_id: String },
    #[serde(rename = "notification.show")]
    NotificationShow {
        notification_id: String,
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "notification.dismiss")]
    NotificationDismiss { notification_id: String },
    #[serde(rename = "toast.show")]
    ToastShow {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        variant: Option<String>,
    },
    #[serde(rename = "toast.dismiss")]
    ToastDismiss { toast_id: String },
    #[serde(rename = "dialog.confirm")]
    DialogConfirm {
        dialog_id: String,
        title: String,
        message: String,
    },
}

impl DesktopAction {
    /// The dotted dispatch key, e.g. `"window.create"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WindowCreate { .. } => "window.create",
            Self::WindowClose { .. } => "window.close",
            Self::WindowSetTitle { .. } => "window.setTitle",
            Self::WindowSetContent { .. } => "window.setContent",
            Self::WindowUpdateContent { .. } => "window.updateContent",
            Self::WindowMove { .. } => "window.move",
            Self::WindowResize { .. } => "window.resize",
            Self::WindowMinimize { .. } => "window.minimize",
            Self::WindowMaximize { .. } => "window.maximize",
            Self::WindowRestore { .. } => "window.restore",
            Self::WindowFocus { .. } => "window.focus",
            Self::WindowLock { .. } => "window.lock",
            Self::WindowUnlock { .. } => "window.unlock",
            Self::NotificationShow { .. } => "notification.show",
            Self::NotificationDismiss { .. } => "notification.dismiss",
            Self::ToastShow { .. } => "toast.show",
            Self::ToastDismiss { .. } => "toast.dismiss",
            Self::DialogConfirm { .. } => "dialog.confirm",
        }
    }

    /// The target window, for `window.*` actions.
    pub fn window_id(&self) -> Option<&str> {
        match self {
            Self::WindowCreate { window_id, .. }
            | Self::WindowClose { window_id }
            | Self::WindowSetTitle { window_id, .. }
            | Self::WindowSetContent { window_id, .. }
            | Self::WindowUpdateContent { window_id, .. }
            | Self::WindowMove { window_id, .. }
            | Self::WindowResize { window_id, .. }
            | Self::WindowMinimize { window_id }
            | Self::WindowMaximize { window_id }
            | Self::WindowRestore { window_id }
            | Self::WindowFocus { window_id }
            | Self::WindowLock { window_id, .. }
            | Self::WindowUnlock { window_id, .. } => Some(window_id),
            _ => None,
        }
    }
}

/// Content mutation applied by `window.updateContent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOperation {
    pub op: UpdateOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Insertion index for `insertAt`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateOp {
    Append,
    Prepend,
    Replace,
    InsertAt,
    Clear,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_uses_dotted_tag_and_camel_fields() {
        let a = DesktopAction::WindowCreate {
            window_id: "w1".into(),
            title: "Notes".into(),
            bounds: WindowBounds { x: 10.0, y: 10.0, w: 640.0, h: 480.0 },
            content: WindowContent::text("markdown", "# hi"),
        };
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["type"], "window.create");
        assert_eq!(json["windowId"], "w1");
    }

    #[test]
    fn lock_round_trips() {
        let a = DesktopAction::WindowLock {
            window_id: "w1".into(),
            agent_id: "window-w1".into(),
        };
        let json = serde_json::to_string(&a).unwrap();
        let back: DesktopAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn update_op_serializes_camel_case() {
        let s = serde_json::to_string(&UpdateOp::InsertAt).unwrap();
        assert_eq!(s, "\"insertAt\"");
    }

    #[test]
    fn kind_matches_serialized_tag_for_every_window_variant() {
        let a = DesktopAction::WindowSetTitle {
            window_id: "w".into(),
            title: "t".into(),
        };
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["type"], a.kind());
    }

    #[test]
    fn toast_has_no_window_id() {
        let a = DesktopAction::ToastShow { message: "hi".into(), variant: None };
        assert!(a.window_id().is_none());
    }
}
