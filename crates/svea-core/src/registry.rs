// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Authoritative server-side mirror of client windows.
//!
//! The action-emit path is the only writer; everything else takes snapshot
//! reads.  Applying an action either performs the state transition for its
//! kind or rejects it (missing window, lock violation) without touching
//! state.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use svea_proto::{DesktopAction, UpdateOp, UpdateOperation, WindowContent, WindowState};
use tracing::warn;

use crate::CoreError;

#[derive(Default)]
pub struct WindowStateRegistry {
    windows: RwLock<HashMap<String, WindowState>>,
}

impl WindowStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one action's state transition.  Passthrough actions
    /// (notification/toast/dialog) are accepted without registry effect.
    pub fn apply(&self, action: &DesktopAction) -> Result<(), CoreError> {
        let mut windows = self.windows.write().unwrap();
        let now = Utc::now();
        match action {
            DesktopAction::WindowCreate {
                window_id,
                title,
                bounds,
                content,
            } => {
                windows.insert(
                    window_id.clone(),
                    WindowState {
                        id: window_id.clone(),
                        title: title.clone(),
                        bounds: *bounds,
                        content: content.clone(),
                        locked: false,
                        locked_by: None,
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(())
            }
            DesktopAction::WindowClose { window_id } => {
                if windows.remove(window_id).is_none() {
                    return Err(CoreError::WindowNotFound(window_id.clone()));
                }
                Ok(())
            }
            DesktopAction::WindowSetTitle { window_id, title } => {
                let w = get_mut(&mut windows, window_id)?;
                w.title = title.clone();
                w.updated_at = now;
                Ok(())
            }
            DesktopAction::WindowSetContent { window_id, content } => {
                let w = get_mut(&mut windows, window_id)?;
                w.content = content.clone();
                w.updated_at = now;
                Ok(())
            }
            DesktopAction::WindowUpdateContent {
                window_id,
                renderer,
                operation,
            } => {
                let w = get_mut(&mut windows, window_id)?;
                if let Some(r) = renderer {
                    w.content.renderer = r.clone();
                }
                apply_update(&mut w.content, operation);
                w.updated_at = now;
                Ok(())
            }
            DesktopAction::WindowMove { window_id, x, y } => {
                let w = get_mut(&mut windows, window_id)?;
                w.bounds.x = *x;
                w.bounds.y = *y;
                w.updated_at = now;
                Ok(())
            }
            DesktopAction::WindowResize { window_id, w: width, h } => {
                let win = get_mut(&mut windows, window_id)?;
                win.bounds.w = *width;
                win.bounds.h = *h;
                win.updated_at = now;
                Ok(())
            }
            // Client-side presentation state; mirrored as a touch only.
            DesktopAction::WindowMinimize { window_id }
            | DesktopAction::WindowMaximize { window_id }
            | DesktopAction::WindowRestore { window_id }
            | DesktopAction::WindowFocus { window_id } => {
                let w = get_mut(&mut windows, window_id)?;
                w.updated_at = now;
                Ok(())
            }
            DesktopAction::WindowLock { window_id, agent_id } => {
                let w = get_mut(&mut windows, window_id)?;
                if w.locked && w.locked_by.as_deref() != Some(agent_id.as_str()) {
                    let holder = w.locked_by.clone().unwrap_or_default();
                    warn!(window = %window_id, %agent_id, %holder, "lock rejected");
                    return Err(CoreError::LockHeld {
                        window: window_id.clone(),
                        holder,
                    });
                }
                w.locked = true;
                w.locked_by = Some(agent_id.clone());
                w.updated_at = now;
                Ok(())
            }
            DesktopAction::WindowUnlock { window_id, agent_id } => {
                let w = get_mut(&mut windows, window_id)?;
                if w.locked_by.as_deref() != Some(agent_id.as_str()) {
                    let holder = w.locked_by.clone().unwrap_or_default();
                    warn!(window = %window_id, %agent_id, %holder, "unlock rejected");
                    return Err(CoreError::LockHeld {
                        window: window_id.clone(),
                        holder,
                    });
                }
                w.locked = false;
                w.locked_by = None;
                w.updated_at = now;
                Ok(())
            }
            DesktopAction::NotificationShow { .. }
            | DesktopAction::NotificationDismiss { .. }
            | DesktopAction::ToastShow { .. }
            | DesktopAction::ToastDismiss { .. }
            | DesktopAction::DialogConfirm { .. } => Ok(()),
        }
    }

    /// Snapshot of all windows, oldest first.
    pub fn list_windows(&self) -> Vec<WindowState> {
        let windows = self.windows.read().unwrap();
        let mut all: Vec<WindowState> = windows.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn get_window(&self, id: &str) -> Option<WindowState> {
        self.windows.read().unwrap().get(id).cloned()
    }

    pub fn has_window(&self, id: &str) -> bool {
        self.windows.read().unwrap().contains_key(id)
    }

    pub fn window_count(&self) -> usize {
        self.windows.read().unwrap().len()
    }

    pub fn clear(&self) {
        self.windows.write().unwrap().clear();
    }

    /// `(id, renderer)` pairs for cache fingerprinting.
    pub fn renderer_pairs(&self) -> Vec<(String, String)> {
        self.windows
            .read()
            .unwrap()
            .values()
            .map(|w| (w.id.clone(), w.content.renderer.clone()))
            .collect()
    }

    /// The `<open_windows>` prompt block; empty string when the desktop is
    /// empty.
    pub fn format_open_windows(&self) -> String {
        let windows = self.list_windows();
        if windows.is_empty() {
            return String::new();
        }
        let mut out = String::from("<open_windows>\n");
        for w in &windows {
            out.push_str(&format!("{}:{} \"{}\"\n", w.id, w.content.renderer, w.title));
        }
        out.push_str("</open_windows>\n");
        out
    }
}

fn get_mut<'a>(
    windows: &'a mut HashMap<String, WindowState>,
    id: &str,
) -> Result<&'a mut WindowState, CoreError> {
    windows
        .get_mut(id)
        .ok_or_else(|| CoreError::WindowNotFound(id.to_string()))
}

/// Content mutation semantics: text ops apply to string data; for
/// non-string data, append/prepend fall back to replace.
fn apply_update(content: &mut WindowContent, op: &UpdateOperation) {
    let incoming = op.data.clone().unwrap_or(serde_json::Value::Null);
    match op.op {
        UpdateOp::Replace => content.data = incoming,
        UpdateOp::Clear => {
            content.data = match content.data {
                serde_json::Value::String(_) => serde_json::Value::String(String::new()),
                _ => serde_json::Value::Null,
            };
        }
        UpdateOp::Append => match (&mut content.data, incoming) {
            (serde_json::Value::String(s), serde_json::Value::String(add)) => s.push_str(&add),
            (_, incoming) => content.data = incoming,
        },
        UpdateOp::Prepend => match (&mut content.data, incoming) {
            (serde_json::Value::String(s), serde_json::Value::String(add)) => {
                *s = format!("{add}{s}");
            }
            (_, incoming) => content.data = incoming,
        },
        UpdateOp::InsertAt => match (&mut content.data, incoming) {
            (serde_json::Value::String(s), serde_json::Value::String(add)) => {
                let at = op.position.unwrap_or(s.len()).min(s.len());
                // Clamp to a char boundary so mid-codepoint positions from
                // the client cannot panic.
                let at = s
                    .char_indices()
                    .map(|(i, _)| i)
                    .chain([s.len()])
                    .take_while(|i| *i <= at)
                    .last()
                    .unwrap_or(0);
                s.insert_str(at, &add);
            }
            (_, incoming) => content.data = incoming,
        },
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
