// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fmt;
use std::str::FromStr;

/// Stable identity of an agent session.
///
/// The string form (`main-<monitor>`, `window-<id>`, `ephemeral-<n>`,
/// `task-<n>`) is what travels on the wire as `agentId` and what the
/// broadcast center and session log index by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgentRole {
    /// The persistent main agent of one monitor.
    Main { monitor: String },
    /// The persistent agent bound to one window.
    Window { window: String },
    /// Short-lived main-kind overflow agent.
    Ephemeral { seq: u64 },
    /// One-off dispatched task agent.
    Task { seq: u64 },
}

impl AgentRole {
    pub fn main(monitor: impl Into<String>) -> Self {
        Self::Main { monitor: monitor.into() }
    }

    pub fn window(window: impl Into<String>) -> Self {
        Self::Window { window: window.into() }
    }

    pub fn is_main(&self) -> bool {
        matches!(self, Self::Main { .. })
    }

    pub fn monitor_id(&self) -> Option<&str> {
        match self {
            Self::Main { monitor } => Some(monitor),
            _ => None,
        }
    }

    pub fn window_id(&self) -> Option<&str> {
        match self {
            Self::Window { window } => Some(window),
            _ => None,
        }
    }

    /// The role family without its instance id: `"main"`, `"window"`,
    /// `"ephemeral"`, or `"task"`.
    pub fn family(&self) -> &'static str {
        match self {
            Self::Main { .. } => "main",
            Self::Window { .. } => "window",
            Self::Ephemeral { .. } => "ephemeral",
            Self::Task { .. } => "task",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main { monitor } => write!(f, "main-{monitor}"),
            Self::Window { window } => write!(f, "window-{window}"),
            Self::Ephemeral { seq } => write!(f, "ephemeral-{seq}"),
            Self::Task { seq } => write!(f, "task-{seq}"),
        }
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("main-") {
            if !rest.is_empty() {
                return Ok(Self::Main { monitor: rest.to_string() });
            }
        }
        if let Some(rest) = s.strip_prefix("window-") {
            if !rest.is_empty() {
                return Ok(Self::Window { window: rest.to_string() });
            }
        }
        if let Some(rest) = s.strip_prefix("ephemeral-") {
            if let Ok(seq) = rest.parse() {
                return Ok(Self::Ephemeral { seq });
            }
        }
        if let Some(rest) = s.strip_prefix("task-") {
            if let Ok(seq) = rest.parse() {
                return Ok(Self::Task { seq });
            }
        }
        Err(format!("not an agent role: {s}"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_wire_form() {
        assert_eq!(AgentRole::main("m0").to_string(), "main-m0");
        assert_eq!(AgentRole::window("w1").to_string(), "window-w1");
        assert_eq!(AgentRole::Ephemeral { seq: 3 }.to_string(), "ephemeral-3");
        assert_eq!(AgentRole::Task { seq: 7 }.to_string(), "task-7");
    }

    #[test]
    fn parse_round_trips() {
        for s in ["main-m0", "window-w-2", "ephemeral-1", "task-42"] {
            let role: AgentRole = s.parse().unwrap();
            assert_eq!(role.to_string(), s);
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("mains-x".parse::<AgentRole>().is_err());
        assert!("ephemeral-x".parse::<AgentRole>().is_err());
        assert!("main-".parse::<AgentRole>().is_err());
    }

    #[test]
    fn window_id_only_for_window_roles() {
        assert_eq!(AgentRole::window("w1").window_id(), Some("w1"));
        assert_eq!(AgentRole::main("m0").window_id(), None);
    }
}
