// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use svea_proto::DesktopAction;
use tracing::{debug, warn};

use crate::logger::{LogBody, LogRecord};

/// A user/assistant turn extracted for the context-tape restore buffer.
#[derive(Debug, Clone)]
pub struct RestoredMessage {
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// The replayable remains of the newest session.
#[derive(Debug, Clone, Default)]
pub struct RestoredSession {
    /// The full action stream in log order.  The caller folds it through
    /// the window-state registry to recover terminal window state.
    pub actions: Vec<DesktopAction>,
    /// Main-conversation turns (`agentId` starting with `main-`), in order.
    pub main_messages: Vec<RestoredMessage>,
}

/// Read the newest session under `root` and extract its action stream and
/// main transcript.  Returns `None` when there is no prior session.
///
/// Unparseable lines are skipped: a partially written final line (crash
/// mid-append) must not block the restore.
pub fn restore_latest(root: &Path) -> anyhow::Result<Option<RestoredSession>> {
    if !root.is_dir() {
        return Ok(None);
    }

    let mut sessions: Vec<_> = std::fs::read_dir(root)
        .with_context(|| format!("reading session root {}", root.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.path())
        .collect();
    // Directory names are timestamps, so lexicographic order is temporal.
    sessions.sort();
    let Some(newest) = sessions.pop() else {
        return Ok(None);
    };

    let messages_path = newest.join("messages.jsonl");
    let text = match std::fs::read_to_string(&messages_path) {
        Ok(t) => t,
        Err(e) => {
            warn!(path = %messages_path.display(), "session unreadable, skipping restore: {e}");
            return Ok(None);
        }
    };

    let mut restored = RestoredSession::default();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: LogRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                debug!(line = lineno + 1, "skipping unparseable log line: {e}");
                continue;
            }
        };
        match record.body {
            LogBody::Action { action } => restored.actions.push(action),
            LogBody::User { content } if record.agent_id.starts_with("main-") => {
                restored.main_messages.push(RestoredMessage {
                    role: "user".into(),
                    content,
                    timestamp: record.timestamp,
                });
            }
            LogBody::Assistant { content } if record.agent_id.starts_with("main-") => {
                restored.main_messages.push(RestoredMessage {
                    role: "assistant".into(),
                    content,
                    timestamp: record.timestamp,
                });
            }
            _ => {}
        }
    }

    debug!(
        session = %newest.display(),
        actions = restored.actions.len(),
        messages = restored.main_messages.len(),
        "session restored"
    );
    Ok(Some(restored))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionLogger;
    use svea_proto::{WindowBounds, WindowContent};

    fn create_action(id: &str) -> DesktopAction {
        DesktopAction::WindowCreate {
            window_id: id.into(),
            title: id.into(),
            bounds: WindowBounds { x: 0.0, y: 0.0, w: 100.0, h: 100.0 },
            content: WindowContent::text("markdown", ""),
        }
    }

    #[test]
    fn empty_root_restores_nothing() {
        let root = tempfile::tempdir().unwrap();
        assert!(restore_latest(root.path()).unwrap().is_none());
        assert!(restore_latest(&root.path().join("missing")).unwrap().is_none());
    }

    #[test]
    fn restore_extracts_actions_and_main_messages() {
        let root = tempfile::tempdir().unwrap();
        let logger = SessionLogger::open(root.path(), "mock", false).unwrap();
        logger.register_agent("main-m0", None, None);
        logger.register_agent("window-w1", Some("main-m0"), Some("w1"));

        logger.log_user("main-m0", "open notes");
        logger.log_action("main-m0", &create_action("w1"));
        logger.log_assistant("main-m0", "done");
        // Window-branch chatter must not land in the main restore buffer.
        logger.log_user("window-w1", "tweak it");
        drop(logger);

        let restored = restore_latest(root.path()).unwrap().unwrap();
        assert_eq!(restored.actions.len(), 1);
        assert_eq!(restored.main_messages.len(), 2);
        assert_eq!(restored.main_messages[0].role, "user");
        assert_eq!(restored.main_messages[1].content, "done");
    }

    #[test]
    fn newest_session_wins() {
        let root = tempfile::tempdir().unwrap();
        let old = SessionLogger::open(root.path(), "mock", false).unwrap();
        old.register_agent("main-m0", None, None);
        old.log_user("main-m0", "old message");
        drop(old);

        let new = SessionLogger::open(root.path(), "mock", false).unwrap();
        new.register_agent("main-m0", None, None);
        new.log_user("main-m0", "new message");
        drop(new);

        let restored = restore_latest(root.path()).unwrap().unwrap();
        assert_eq!(restored.main_messages.len(), 1);
        assert_eq!(restored.main_messages[0].content, "new message");
    }

    #[test]
    fn truncated_final_line_is_skipped() {
        use std::io::Write;
        let root = tempfile::tempdir().unwrap();
        let logger = SessionLogger::open(root.path(), "mock", false).unwrap();
        logger.register_agent("main-m0", None, None);
        logger.log_user("main-m0", "survives");
        let dir = logger.dir().unwrap().to_path_buf();
        drop(logger);

        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.join("messages.jsonl"))
            .unwrap();
        write!(f, "{{\"type\":\"user\",\"cont").unwrap();

        let restored = restore_latest(root.path()).unwrap().unwrap();
        assert_eq!(restored.main_messages.len(), 1);
    }
}
