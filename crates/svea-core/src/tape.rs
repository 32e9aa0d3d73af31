// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The context tape: the server-side transcript of user/assistant turns,
//! tagged by source (the main conversation or one window's branch).
//!
//! Main messages accumulate under a soft cap; overflowing drops the oldest
//! half of the main subset in place, which preserves window branches and
//! the relative order of everything that survives.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextRole {
    User,
    Assistant,
}

impl ContextRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Where a message came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Main,
    Window { id: String },
}

impl MessageSource {
    pub fn window(id: impl Into<String>) -> Self {
        Self::Window { id: id.into() }
    }

    pub fn is_main(&self) -> bool {
        matches!(self, Self::Main)
    }

    pub fn window_id(&self) -> Option<&str> {
        match self {
            Self::Main => None,
            Self::Window { id } => Some(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: ContextRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub source: MessageSource,
}

/// Which slice of the tape a prompt gets.
#[derive(Debug, Clone)]
pub enum PromptScope {
    /// Main conversation only — what main and task agents see.
    MainOnly,
    /// Main plus one window's branch — what that window's agent sees.
    MainAndWindow(String),
}

/// Filter for [`ContextTape::get_messages`].
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub include_windows: bool,
    /// When non-empty, only these window branches are included.
    pub window_ids: Vec<String>,
    pub exclude_window_ids: Vec<String>,
}

pub struct ContextTape {
    main_cap: usize,
    inner: Mutex<TapeInner>,
}

struct TapeInner {
    messages: Vec<ContextMessage>,
    /// High-water mark for monotonic timestamps.
    last_ts: DateTime<Utc>,
}

impl ContextTape {
    pub fn new(main_cap: usize) -> Self {
        Self {
            main_cap,
            inner: Mutex::new(TapeInner {
                messages: Vec::new(),
                last_ts: DateTime::<Utc>::MIN_UTC,
            }),
        }
    }

    /// Append one message in causal order.  Triggers main-subset pruning
    /// when the cap is exceeded.
    pub fn append(&self, role: ContextRole, content: impl Into<String>, source: MessageSource) {
        let mut inner = self.inner.lock().unwrap();
        // Timestamps are monotonic non-decreasing within one tape even if
        // the wall clock steps backwards.
        let ts = Utc::now().max(inner.last_ts);
        inner.last_ts = ts;
        inner.messages.push(ContextMessage {
            role,
            content: content.into(),
            timestamp: ts,
            source,
        });

        let main_count = inner.messages.iter().filter(|m| m.source.is_main()).count();
        if main_count > self.main_cap {
            let drop_n = main_count / 2;
            let mut dropped = 0;
            inner.messages.retain(|m| {
                if m.source.is_main() && dropped < drop_n {
                    dropped += 1;
                    false
                } else {
                    true
                }
            });
            debug!(dropped, "context tape pruned oldest main messages");
        }
    }

    pub fn get_messages(&self, filter: &MessageFilter) -> Vec<ContextMessage> {
        let inner = self.inner.lock().unwrap();
        inner
            .messages
            .iter()
            .filter(|m| match m.source.window_id() {
                None => true,
                Some(w) => {
                    filter.include_windows
                        && (filter.window_ids.is_empty()
                            || filter.window_ids.iter().any(|x| x == w))
                        && !filter.exclude_window_ids.iter().any(|x| x == w)
                }
            })
            .cloned()
            .collect()
    }

    /// Remove one window's branch, returning the pruned messages in order.
    pub fn prune_window(&self, window_id: &str) -> Vec<ContextMessage> {
        let mut inner = self.inner.lock().unwrap();
        let mut pruned = Vec::new();
        inner.messages.retain(|m| {
            if m.source.window_id() == Some(window_id) {
                pruned.push(m.clone());
                false
            } else {
                true
            }
        });
        pruned
    }

    /// Format the scoped transcript as a `<previous_conversation>` block
    /// for prompt injection.  Empty scope yields an empty string so prompts
    /// carry no vacant block on a fresh tape.
    pub fn format_for_prompt(&self, scope: &PromptScope) -> String {
        let filter = match scope {
            PromptScope::MainOnly => MessageFilter::default(),
            PromptScope::MainAndWindow(id) => MessageFilter {
                include_windows: true,
                window_ids: vec![id.clone()],
                ..MessageFilter::default()
            },
        };
        let messages = self.get_messages(&filter);
        if messages.is_empty() {
            return String::new();
        }
        let mut out = String::from("<previous_conversation>\n");
        for m in &messages {
            out.push_str(&format!("[{}] {}\n", m.role.as_str(), m.content));
        }
        out.push_str("</previous_conversation>\n");
        out
    }

    /// Prepend messages from a previous session.  Existing messages keep
    /// their order; the restored block keeps its own.
    pub fn restore(&self, messages: Vec<ContextMessage>) {
        if messages.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        let restored = messages.len();
        // The high-water mark must cover restored timestamps too, so later
        // appends stay monotonic.
        if let Some(max_ts) = messages.iter().map(|m| m.timestamp).max() {
            inner.last_ts = inner.last_ts.max(max_ts);
        }
        let mut merged = messages;
        merged.append(&mut inner.messages);
        inner.messages = merged;
        debug!(restored, "context tape restored from previous session");
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().messages.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn main_len(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.source.is_main())
            .count()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tape_with(cap: usize) -> ContextTape {
        ContextTape::new(cap)
    }

    #[test]
    fn append_preserves_order() {
        let t = tape_with(100);
        t.append(ContextRole::User, "one", MessageSource::Main);
        t.append(ContextRole::Assistant, "two", MessageSource::Main);
        let msgs = t.get_messages(&MessageFilter::default());
        assert_eq!(msgs[0].content, "one");
        assert_eq!(msgs[1].content, "two");
    }

    #[test]
    fn timestamps_are_monotonic() {
        let t = tape_with(100);
        for i in 0..20 {
            t.append(ContextRole::User, format!("m{i}"), MessageSource::Main);
        }
        let msgs = t.get_messages(&MessageFilter::default());
        for pair in msgs.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn overflow_drops_oldest_half_of_main_only() {
        let t = tape_with(4);
        t.append(ContextRole::User, "w-msg", MessageSource::window("w1"));
        for i in 0..5 {
            t.append(ContextRole::User, format!("main-{i}"), MessageSource::Main);
        }
        // 5 main messages exceeded the cap of 4 → oldest 2 dropped.
        assert_eq!(t.main_len(), 3);
        let all = t.get_messages(&MessageFilter {
            include_windows: true,
            ..MessageFilter::default()
        });
        // The window message survives and stays first.
        assert_eq!(all[0].content, "w-msg");
        assert_eq!(all[1].content, "main-2");
    }

    #[test]
    fn prune_window_removes_only_that_branch() {
        let t = tape_with(100);
        t.append(ContextRole::User, "main", MessageSource::Main);
        t.append(ContextRole::User, "a", MessageSource::window("w1"));
        t.append(ContextRole::Assistant, "b", MessageSource::window("w1"));
        t.append(ContextRole::User, "c", MessageSource::window("w2"));

        let pruned = t.prune_window("w1");
        assert_eq!(pruned.len(), 2);
        let rest = t.get_messages(&MessageFilter {
            include_windows: true,
            ..MessageFilter::default()
        });
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|m| m.source.window_id() != Some("w1")));
        // Relative order of the survivors is unchanged.
        assert_eq!(rest[0].content, "main");
        assert_eq!(rest[1].content, "c");
    }

    #[test]
    fn format_main_only_excludes_window_branches() {
        let t = tape_with(100);
        t.append(ContextRole::User, "visible", MessageSource::Main);
        t.append(ContextRole::User, "hidden", MessageSource::window("w1"));
        let s = t.format_for_prompt(&PromptScope::MainOnly);
        assert!(s.contains("visible"));
        assert!(!s.contains("hidden"));
        assert!(s.starts_with("<previous_conversation>"));
    }

    #[test]
    fn format_window_scope_includes_own_branch_only() {
        let t = tape_with(100);
        t.append(ContextRole::User, "main", MessageSource::Main);
        t.append(ContextRole::User, "mine", MessageSource::window("w1"));
        t.append(ContextRole::User, "other", MessageSource::window("w2"));
        let s = t.format_for_prompt(&PromptScope::MainAndWindow("w1".into()));
        assert!(s.contains("main"));
        assert!(s.contains("mine"));
        assert!(!s.contains("other"));
    }

    #[test]
    fn format_empty_tape_is_empty_string() {
        let t = tape_with(100);
        assert_eq!(t.format_for_prompt(&PromptScope::MainOnly), "");
    }

    #[test]
    fn restore_prepends_without_reordering() {
        let t = tape_with(100);
        t.append(ContextRole::User, "current", MessageSource::Main);
        let old = vec![ContextMessage {
            role: ContextRole::User,
            content: "restored".into(),
            timestamp: Utc::now(),
            source: MessageSource::Main,
        }];
        t.restore(old);
        let msgs = t.get_messages(&MessageFilter::default());
        assert_eq!(msgs[0].content, "restored");
        assert_eq!(msgs[1].content, "current");
    }

    #[test]
    fn append_after_restore_stays_monotonic() {
        let t = tape_with(100);
        let future = Utc::now() + chrono::Duration::seconds(3600);
        t.restore(vec![ContextMessage {
            role: ContextRole::User,
            content: "from the future".into(),
            timestamp: future,
            source: MessageSource::Main,
        }]);
        t.append(ContextRole::User, "now", MessageSource::Main);
        let msgs = t.get_messages(&MessageFilter::default());
        assert!(msgs[1].timestamp >= msgs[0].timestamp);
    }
}
