// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the WebSocket/HTTP endpoint.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Allow any origin on /ws.  The desktop client is served from a
    /// different port during development, so this defaults to on.
    #[serde(default = "default_true")]
    pub permissive_cors: bool,
}

/// Tunables for the agent orchestration core.  Every limit the processors,
/// queues, and semaphores enforce comes from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Global cap on concurrently live agents across the whole process.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    /// Per-monitor cap on in-flight action-producing operations.
    #[serde(default = "default_monitor_budget")]
    pub monitor_budget: usize,
    /// Per-monitor main-task queue capacity.  Overflow is rejected, not
    /// blocked, so the client gets immediate feedback.
    #[serde(default = "default_main_queue_cap")]
    pub main_queue_cap: usize,
    /// Soft cap on main-sourced messages in the context tape.  When
    /// exceeded, the oldest half of the main subset is dropped.
    #[serde(default = "default_tape_main_cap")]
    pub tape_main_cap: usize,
    /// Ring capacity of the user-interaction timeline.
    #[serde(default = "default_timeline_cap")]
    pub timeline_cap: usize,
    /// Bounded wait for a limiter slot when creating window/task agents.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    /// How long reset waits for in-flight turns to return before disposing.
    #[serde(default = "default_reset_drain_timeout")]
    pub reset_drain_timeout_secs: u64,
    /// Prune a window's context-tape branch when the window closes.
    /// Off by default so a later session restore keeps the full transcript.
    #[serde(default)]
    pub prune_window_context_on_close: bool,
}

/// Which provider transport new agents are bound to.
///
/// The transports themselves live outside this server (stdio and WebSocket
/// JSON-RPC adapters); `Mock` is the in-process deterministic provider used
/// by tests and offline development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Stdio,
    Websocket,
    Mock,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(Self::Stdio),
            "websocket" => Ok(Self::Websocket),
            "mock" | "echo" => Ok(Self::Mock),
            other => Err(format!("unknown provider kind: {other}")),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Websocket => write!(f, "websocket"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Default transport for newly spawned agents.  The client can switch
    /// at runtime with a SET_PROVIDER event.
    #[serde(default = "default_provider_kind")]
    pub kind: ProviderKind,
    /// Command line for the stdio transport (the LLM adapter process).
    pub command: Option<String>,
    /// Endpoint for the websocket transport.
    pub url: Option<String>,
    /// Number of pre-initialized provider handles kept warm so the first
    /// message of a new agent does not pay construction latency.
    #[serde(default = "default_warm_pool_size")]
    pub warm_pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Where the reload-cache JSON lives.  `None` resolves to the data dir
    /// at runtime.
    pub path: Option<PathBuf>,
    /// Minimum similarity for a fuzzy candidate to be offered.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// How many fuzzy candidates to surface at most.
    #[serde(default = "default_cache_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Root directory for session logs.  `None` resolves to the data dir.
    pub dir: Option<PathBuf>,
    /// Write the human-readable transcript.md mirror alongside the JSONL.
    #[serde(default = "default_true")]
    pub write_transcript: bool,
    /// Replay the newest session's windows and main transcript on boot.
    #[serde(default = "default_true")]
    pub restore_on_boot: bool,
}

// ── Serde default helpers ─────────────────────────────────────────────────────

/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be on unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

fn default_listen() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_max_agents() -> usize {
    16
}

fn default_monitor_budget() -> usize {
    4
}

fn default_main_queue_cap() -> usize {
    10
}

fn default_tape_main_cap() -> usize {
    200
}

fn default_timeline_cap() -> usize {
    64
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_reset_drain_timeout() -> u64 {
    30
}

fn default_provider_kind() -> ProviderKind {
    // The in-process mock; the stdio/websocket adapters are external and
    // must be pointed at explicitly.
    ProviderKind::Mock
}

fn default_warm_pool_size() -> usize {
    2
}

fn default_similarity_threshold() -> f64 {
    0.6
}

fn default_cache_top_k() -> usize {
    3
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            permissive_cors: true,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            monitor_budget: default_monitor_budget(),
            main_queue_cap: default_main_queue_cap(),
            tape_main_cap: default_tape_main_cap(),
            timeline_cap: default_timeline_cap(),
            acquire_timeout_secs: default_acquire_timeout(),
            reset_drain_timeout_secs: default_reset_drain_timeout(),
            prune_window_context_on_close: false,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            command: None,
            url: None,
            warm_pool_size: default_warm_pool_size(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            similarity_threshold: default_similarity_threshold(),
            top_k: default_cache_top_k(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dir: None,
            write_transcript: true,
            restore_on_boot: true,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
