// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use svea_proto::UserInteraction;
use uuid::Uuid;

/// Routing kind of a task.  Component actions are window tasks synthesized
/// from a UI action descriptor, kept distinct for logging and cache
/// fingerprinting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Main,
    Window,
    ComponentAction,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Window => "window",
            Self::ComponentAction => "component_action",
        }
    }
}

/// One client-originated unit of work, consumed exactly once by a
/// processor.
///
/// Invariant: a window-kind task carries a non-empty `window_id`; a
/// main-kind task carries a non-empty `monitor_id`.  The constructors are
/// the only way tasks are built, so the invariant holds at the type level.
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    /// Client message id this task answers to (MESSAGE_ACCEPTED/QUEUED).
    pub message_id: String,
    pub kind: TaskKind,
    pub monitor_id: Option<String>,
    pub window_id: Option<String>,
    pub content: String,
    pub interactions: Vec<UserInteraction>,
}

impl Task {
    pub fn main(
        message_id: impl Into<String>,
        monitor_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            message_id: message_id.into(),
            kind: TaskKind::Main,
            monitor_id: Some(monitor_id.into()),
            window_id: None,
            content: content.into(),
            interactions: Vec::new(),
        }
    }

    pub fn window(
        message_id: impl Into<String>,
        window_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            message_id: message_id.into(),
            kind: TaskKind::Window,
            monitor_id: None,
            window_id: Some(window_id.into()),
            content: content.into(),
            interactions: Vec::new(),
        }
    }

    /// Synthesize a window task from a component action descriptor.
    pub fn component_action(
        window_id: impl Into<String>,
        window_title: &str,
        action: &str,
        action_id: Option<&str>,
        form_data: Option<&serde_json::Value>,
        component_path: Option<&str>,
    ) -> Self {
        let mut content = format!(
            "<component_action window=\"{}\" action=\"{}\"",
            window_title, action
        );
        if let Some(id) = action_id {
            content.push_str(&format!(" actionId=\"{id}\""));
        }
        if let Some(path) = component_path {
            content.push_str(&format!(" componentPath=\"{path}\""));
        }
        content.push('>');
        if let Some(data) = form_data {
            content.push_str(&data.to_string());
        }
        content.push_str("</component_action>");

        Self {
            task_id: Uuid::new_v4().to_string(),
            message_id: Uuid::new_v4().to_string(),
            kind: TaskKind::ComponentAction,
            monitor_id: None,
            window_id: Some(window_id.into()),
            content,
            interactions: Vec::new(),
        }
    }

    pub fn with_interactions(mut self, interactions: Vec<UserInteraction>) -> Self {
        self.interactions = interactions;
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_task_carries_monitor() {
        let t = Task::main("m1", "monitor-0", "hello");
        assert_eq!(t.kind, TaskKind::Main);
        assert_eq!(t.monitor_id.as_deref(), Some("monitor-0"));
        assert!(t.window_id.is_none());
    }

    #[test]
    fn window_task_carries_window() {
        let t = Task::window("m1", "w1", "hello");
        assert_eq!(t.kind, TaskKind::Window);
        assert_eq!(t.window_id.as_deref(), Some("w1"));
        assert!(t.monitor_id.is_none());
    }

    #[test]
    fn component_action_content_embeds_descriptor() {
        let data = serde_json::json!({"field": "value"});
        let t = Task::component_action("w1", "Notes", "submit", Some("a1"), Some(&data), None);
        assert_eq!(t.kind, TaskKind::ComponentAction);
        assert!(t.content.contains("action=\"submit\""));
        assert!(t.content.contains("\"field\""));
    }

    #[test]
    fn task_ids_are_unique() {
        let a = Task::main("m", "mon", "x");
        let b = Task::main("m", "mon", "x");
        assert_ne!(a.task_id, b.task_id);
    }
}
