// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tokio::sync::watch;

use svea_config::ProviderKind;
use svea_proto::DesktopAction;

use crate::{EventStream, Provider, ProviderEvent};

/// Deterministic provider for offline development.  Echoes the last line of
/// the prompt (the user content, after the injected context blocks) back as
/// the assistant reply.
#[derive(Default)]
pub struct EchoProvider;

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn query(&self, prompt: String) -> anyhow::Result<EventStream> {
        let tail = prompt.lines().last().unwrap_or("[no input]").to_string();
        let events: Vec<anyhow::Result<ProviderEvent>> = vec![
            Ok(ProviderEvent::Assistant { text: format!("MOCK: {tail}") }),
            Ok(ProviderEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }

    async fn interrupt(&self) {}

    async fn dispose(&self) {}
}

/// A pre-scripted provider.  Each `query` pops the next script from the
/// front of the queue, so tests can specify exact event sequences —
/// including tool invocations that carry desktop actions — without any
/// adapter process.
///
/// Every prompt seen is recorded in `prompts` for inspection, and an
/// optional per-event delay makes the stream slow enough for interrupt and
/// queueing tests to observe intermediate states.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Vec<ProviderEvent>>>,
    /// Error injected instead of a script; `query` yields it as a stream
    /// failure.
    error_text: Option<String>,
    delay: Option<Duration>,
    /// Every prompt this provider has been asked, in order.
    pub prompts: Arc<Mutex<Vec<String>>>,
    cancel_tx: watch::Sender<()>,
    disposed: AtomicBool,
}

impl ScriptedProvider {
    /// Build a provider from a list of response scripts.  The outer `Vec`
    /// is the ordered list of calls; the inner `Vec` is the event sequence
    /// emitted for that call.
    pub fn new(scripts: Vec<Vec<ProviderEvent>>) -> Self {
        let (cancel_tx, _) = watch::channel(());
        Self {
            scripts: Mutex::new(scripts),
            error_text: None,
            delay: None,
            prompts: Arc::new(Mutex::new(Vec::new())),
            cancel_tx,
            disposed: AtomicBool::new(false),
        }
    }

    /// Sleep this long before each event, so tests can interleave other
    /// work (interrupts, queue fills) with a turn in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Convenience: provider whose every stream fails immediately.
    pub fn erroring(message: impl Into<String>) -> Self {
        let mut p = Self::new(vec![]);
        p.error_text = Some(message.into());
        p
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            ProviderEvent::Assistant { text: r },
            ProviderEvent::Done,
        ]])
    }

    /// Convenience: one turn of `n` assistant chunks.
    pub fn text_chunks(chunks: Vec<&str>) -> Self {
        let mut events: Vec<ProviderEvent> = chunks
            .into_iter()
            .map(|c| ProviderEvent::Assistant { text: c.to_string() })
            .collect();
        events.push(ProviderEvent::Done);
        Self::new(vec![events])
    }

    /// Convenience: a tool invocation that emits desktop actions, followed
    /// by a closing text reply.
    pub fn tool_with_actions(
        tool_name: impl Into<String>,
        actions: Vec<DesktopAction>,
        final_text: impl Into<String>,
    ) -> Self {
        let name = tool_name.into();
        Self::new(vec![vec![
            ProviderEvent::ToolUse {
                id: "call-1".into(),
                name: name.clone(),
                input: serde_json::json!({}),
            },
            ProviderEvent::ToolResult {
                id: "call-1".into(),
                name,
                content: "ok".into(),
                actions,
                is_error: false,
            },
            ProviderEvent::Assistant { text: final_text.into() },
            ProviderEvent::Done,
        ]])
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn query(&self, prompt: String) -> anyhow::Result<EventStream> {
        if self.disposed.load(Ordering::SeqCst) {
            anyhow::bail!("provider disposed");
        }
        self.prompts.lock().unwrap().push(prompt);

        if let Some(msg) = &self.error_text {
            let msg = msg.clone();
            let events: Vec<anyhow::Result<ProviderEvent>> = vec![Err(anyhow::anyhow!(msg))];
            return Ok(Box::pin(stream::iter(events)));
        }

        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                vec![
                    ProviderEvent::Assistant { text: "[no more scripts]".into() },
                    ProviderEvent::Done,
                ]
            } else {
                scripts.remove(0)
            }
        };

        let mut cancel_rx = self.cancel_tx.subscribe();
        let delay = self.delay;
        let s = async_stream::stream! {
            // Mark the current value seen so only interrupts issued after
            // this stream started terminate it.
            cancel_rx.borrow_and_update();
            for ev in events {
                if let Some(d) = delay {
                    tokio::select! {
                        _ = cancel_rx.changed() => return,
                        _ = tokio::time::sleep(d) => {}
                    }
                } else if cancel_rx.has_changed().unwrap_or(false) {
                    return;
                }
                yield Ok(ev);
            }
        };
        Ok(Box::pin(s))
    }

    async fn interrupt(&self) {
        let _ = self.cancel_tx.send(());
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
