// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use svea_proto::UserInteraction;
use tracing::debug;

/// Bounded ordered buffer of user interactions and recent agent actions,
/// drained into the next main-agent turn as a `<previous_interactions>`
/// block.  Oldest entries are dropped on overflow.
pub struct InteractionTimeline {
    cap: usize,
    entries: Mutex<VecDeque<TimelineEntry>>,
}

#[derive(Debug, Clone)]
enum TimelineEntry {
    User(UserInteraction),
    AgentAction {
        summary: String,
        timestamp: DateTime<Utc>,
    },
}

impl TimelineEntry {
    fn describe(&self) -> String {
        match self {
            Self::User(i) => format!("user {}", i.describe()),
            Self::AgentAction { summary, .. } => format!("agent {summary}"),
        }
    }
}

impl InteractionTimeline {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a user interaction.  Drawings are handled by the client-facing
    /// drawing pipeline and never enter the timeline; returns whether the
    /// interaction was accepted.
    pub fn push_user(&self, interaction: UserInteraction) -> bool {
        if interaction.is_drawing() {
            debug!("drawing interaction skipped by timeline");
            return false;
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == self.cap {
            entries.pop_front();
        }
        entries.push_back(TimelineEntry::User(interaction));
        true
    }

    /// Record a one-line summary of an agent action (e.g. "created window
    /// w1") so the next main turn knows what just changed on screen.
    pub fn push_agent_action(&self, summary: impl Into<String>) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == self.cap {
            entries.pop_front();
        }
        entries.push_back(TimelineEntry::AgentAction {
            summary: summary.into(),
            timestamp: Utc::now(),
        });
    }

    /// Take everything as a formatted prompt block, clearing the buffer.
    /// Returns an empty string when there is nothing to report.
    pub fn drain_for_main_prompt(&self) -> String {
        let drained: Vec<TimelineEntry> = {
            let mut entries = self.entries.lock().unwrap();
            entries.drain(..).collect()
        };
        if drained.is_empty() {
            return String::new();
        }
        let mut out = String::from("<previous_interactions>\n");
        for e in &drained {
            out.push_str(&format!("- {}\n", e.describe()));
        }
        out.push_str("</previous_interactions>\n");
        out
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn click(x: f64) -> UserInteraction {
        UserInteraction::Click {
            x,
            y: 0.0,
            window_id: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn overflow_drops_oldest() {
        let t = InteractionTimeline::new(3);
        for i in 0..5 {
            t.push_user(click(i as f64));
        }
        assert_eq!(t.len(), 3);
        let block = t.drain_for_main_prompt();
        assert!(!block.contains("(0,"));
        assert!(block.contains("(4, 0)"));
    }

    #[test]
    fn drain_clears_and_formats() {
        let t = InteractionTimeline::new(8);
        t.push_user(click(1.0));
        t.push_agent_action("created window w1");
        let block = t.drain_for_main_prompt();
        assert!(block.starts_with("<previous_interactions>"));
        assert!(block.contains("user clicked"));
        assert!(block.contains("agent created window w1"));
        assert!(t.is_empty());
        assert_eq!(t.drain_for_main_prompt(), "");
    }

    #[test]
    fn drawings_are_rejected() {
        let t = InteractionTimeline::new(8);
        let accepted = t.push_user(UserInteraction::Drawing {
            strokes: serde_json::json!([]),
            timestamp: Utc::now(),
        });
        assert!(!accepted);
        assert!(t.is_empty());
    }
}
