// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use svea_proto::DesktopAction;
use tracing::warn;

/// One line of `messages.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_agent_id: Option<String>,
    #[serde(flatten)]
    pub body: LogBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LogBody {
    User { content: String },
    Assistant { content: String },
    Thinking { content: String },
    Action { action: DesktopAction },
    ToolUse {
        tool_name: String,
        tool_input: serde_json::Value,
        tool_use_id: String,
    },
    ToolResult {
        tool_name: String,
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMeta {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub created_at: DateTime<Utc>,
    pub provider: String,
    pub last_activity: DateTime<Utc>,
    pub agents: HashMap<String, AgentMeta>,
}

struct LoggerInner {
    messages: Option<File>,
    transcript: Option<File>,
    metadata: SessionMetadata,
}

/// Append-only writer for one session directory.
///
/// All writes are best-effort: a failing disk degrades the log, never the
/// orchestrator.
pub struct SessionLogger {
    dir: Option<PathBuf>,
    inner: Mutex<LoggerInner>,
}

impl SessionLogger {
    /// Create a new session directory under `root`, named
    /// `YYYY-MM-DD_HH-MM-SS` (suffixed on collision).
    pub fn open(root: &Path, provider: &str, write_transcript: bool) -> anyhow::Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("creating session root {}", root.display()))?;

        let stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let mut dir = root.join(&stamp);
        let mut n = 1;
        while dir.exists() {
            n += 1;
            dir = root.join(format!("{stamp}-{n}"));
        }
        std::fs::create_dir(&dir)
            .with_context(|| format!("creating session dir {}", dir.display()))?;

        let messages = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("messages.jsonl"))
            .context("opening messages.jsonl")?;
        let transcript = if write_transcript {
            Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(dir.join("transcript.md"))
                    .context("opening transcript.md")?,
            )
        } else {
            None
        };

        let now = Utc::now();
        let metadata = SessionMetadata {
            created_at: now,
            provider: provider.to_string(),
            last_activity: now,
            agents: HashMap::new(),
        };

        let logger = Self {
            dir: Some(dir),
            inner: Mutex::new(LoggerInner {
                messages: Some(messages),
                transcript,
                metadata,
            }),
        };
        logger.persist_metadata();
        Ok(logger)
    }

    /// A logger that discards everything (tests, logging disabled).
    pub fn disabled() -> Self {
        let now = Utc::now();
        Self {
            dir: None,
            inner: Mutex::new(LoggerInner {
                messages: None,
                transcript: None,
                metadata: SessionMetadata {
                    created_at: now,
                    provider: "none".into(),
                    last_activity: now,
                    agents: HashMap::new(),
                },
            }),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Record an agent in the session's agent tree.
    pub fn register_agent(
        &self,
        agent_id: &str,
        parent_agent_id: Option<&str>,
        window_id: Option<&str>,
    ) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.metadata.agents.insert(
                agent_id.to_string(),
                AgentMeta {
                    agent_id: agent_id.to_string(),
                    parent_agent_id: parent_agent_id.map(str::to_string),
                    window_id: window_id.map(str::to_string),
                    created_at: Utc::now(),
                },
            );
        }
        self.persist_metadata();
    }

    pub fn log_user(&self, agent_id: &str, content: &str) {
        self.append(agent_id, LogBody::User { content: content.to_string() });
    }

    pub fn log_assistant(&self, agent_id: &str, content: &str) {
        self.append(agent_id, LogBody::Assistant { content: content.to_string() });
    }

    pub fn log_thinking(&self, agent_id: &str, content: &str) {
        self.append(agent_id, LogBody::Thinking { content: content.to_string() });
    }

    pub fn log_action(&self, agent_id: &str, action: &DesktopAction) {
        self.append(agent_id, LogBody::Action { action: action.clone() });
    }

    pub fn log_tool_use(
        &self,
        agent_id: &str,
        tool_name: &str,
        tool_input: &serde_json::Value,
        tool_use_id: &str,
    ) {
        self.append(
            agent_id,
            LogBody::ToolUse {
                tool_name: tool_name.to_string(),
                tool_input: tool_input.clone(),
                tool_use_id: tool_use_id.to_string(),
            },
        );
    }

    pub fn log_tool_result(
        &self,
        agent_id: &str,
        tool_name: &str,
        tool_use_id: &str,
        content: &str,
        is_error: bool,
    ) {
        self.append(
            agent_id,
            LogBody::ToolResult {
                tool_name: tool_name.to_string(),
                tool_use_id: tool_use_id.to_string(),
                content: content.to_string(),
                is_error,
            },
        );
    }

    /// Flush metadata (called on cleanup so `last_activity` survives).
    pub fn flush(&self) {
        self.persist_metadata();
    }

    fn append(&self, agent_id: &str, body: LogBody) {
        let record = {
            let mut inner = self.inner.lock().unwrap();
            let now = Utc::now();
            inner.metadata.last_activity = now;
            let parent = inner
                .metadata
                .agents
                .get(agent_id)
                .and_then(|a| a.parent_agent_id.clone());
            let record = LogRecord {
                timestamp: now,
                agent_id: agent_id.to_string(),
                parent_agent_id: parent,
                body,
            };

            if let Some(f) = inner.messages.as_mut() {
                match serde_json::to_string(&record) {
                    Ok(line) => {
                        if let Err(e) = writeln!(f, "{line}") {
                            warn!("session log append failed: {e}");
                        }
                    }
                    Err(e) => warn!("session log serialize failed: {e}"),
                }
            }
            record
        };
        self.mirror_transcript(&record);
    }

    fn mirror_transcript(&self, record: &LogRecord) {
        let mut inner = self.inner.lock().unwrap();
        let Some(f) = inner.transcript.as_mut() else { return };
        let line = match &record.body {
            LogBody::User { content } => {
                format!("## user → {}\n\n{}\n", record.agent_id, content)
            }
            LogBody::Assistant { content } => {
                format!("## {} \n\n{}\n", record.agent_id, content)
            }
            LogBody::Thinking { content } => {
                format!("> thinking ({}): {}\n", record.agent_id, content)
            }
            LogBody::Action { action } => {
                format!("- action `{}` by {}\n", action.kind(), record.agent_id)
            }
            LogBody::ToolUse { tool_name, .. } => {
                format!("- tool `{}` invoked by {}\n", tool_name, record.agent_id)
            }
            LogBody::ToolResult { tool_name, is_error, .. } => {
                let mark = if *is_error { "failed" } else { "ok" };
                format!("- tool `{tool_name}` {mark}\n")
            }
        };
        if let Err(e) = writeln!(f, "{line}") {
            warn!("transcript append failed: {e}");
        }
    }

    fn persist_metadata(&self) {
        let Some(dir) = &self.dir else { return };
        let metadata = {
            let inner = self.inner.lock().unwrap();
            serde_json::to_string_pretty(&inner.metadata)
        };
        match metadata {
            Ok(text) => {
                if let Err(e) = std::fs::write(dir.join("metadata.json"), text) {
                    warn!("metadata persist failed: {e}");
                }
            }
            Err(e) => warn!("metadata serialize failed: {e}"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_session_files() {
        let root = tempfile::tempdir().unwrap();
        let logger = SessionLogger::open(root.path(), "mock", true).unwrap();
        let dir = logger.dir().unwrap();
        assert!(dir.join("metadata.json").is_file());
        assert!(dir.join("messages.jsonl").is_file());
        assert!(dir.join("transcript.md").is_file());
    }

    #[test]
    fn appends_are_one_json_object_per_line() {
        let root = tempfile::tempdir().unwrap();
        let logger = SessionLogger::open(root.path(), "mock", false).unwrap();
        logger.register_agent("main-m0", None, None);
        logger.log_user("main-m0", "hello");
        logger.log_assistant("main-m0", "hi there");

        let text = std::fs::read_to_string(logger.dir().unwrap().join("messages.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: LogRecord = serde_json::from_str(lines[0]).unwrap();
        assert!(matches!(first.body, LogBody::User { content } if content == "hello"));
        assert_eq!(first.agent_id, "main-m0");
    }

    #[test]
    fn child_records_carry_parent_agent_id() {
        let root = tempfile::tempdir().unwrap();
        let logger = SessionLogger::open(root.path(), "mock", false).unwrap();
        logger.register_agent("main-m0", None, None);
        logger.register_agent("window-w1", Some("main-m0"), Some("w1"));
        logger.log_user("window-w1", "window message");

        let text = std::fs::read_to_string(logger.dir().unwrap().join("messages.jsonl")).unwrap();
        let rec: LogRecord = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(rec.parent_agent_id.as_deref(), Some("main-m0"));
    }

    #[test]
    fn metadata_tracks_agents_and_activity() {
        let root = tempfile::tempdir().unwrap();
        let logger = SessionLogger::open(root.path(), "stdio", false).unwrap();
        logger.register_agent("main-m0", None, None);
        logger.log_user("main-m0", "x");
        logger.flush();

        let text = std::fs::read_to_string(logger.dir().unwrap().join("metadata.json")).unwrap();
        let meta: SessionMetadata = serde_json::from_str(&text).unwrap();
        assert_eq!(meta.provider, "stdio");
        assert!(meta.agents.contains_key("main-m0"));
        assert!(meta.last_activity >= meta.created_at);
    }

    #[test]
    fn disabled_logger_is_silent() {
        let logger = SessionLogger::disabled();
        logger.log_user("main-m0", "goes nowhere");
        assert!(logger.dir().is_none());
    }

    #[test]
    fn colliding_timestamps_get_distinct_dirs() {
        let root = tempfile::tempdir().unwrap();
        let a = SessionLogger::open(root.path(), "mock", false).unwrap();
        let b = SessionLogger::open(root.path(), "mock", false).unwrap();
        assert_ne!(a.dir().unwrap(), b.dir().unwrap());
    }
}
