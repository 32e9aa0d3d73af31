// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use svea_config::ProviderKind;

use crate::ProviderEvent;

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<ProviderEvent>> + Send>>;

/// Capability interface every provider transport implements.
///
/// A provider handle is owned by exactly one agent session at a time.  The
/// orchestrator only ever needs these five operations; transport details
/// (process lifecycle, reconnects, framing) stay behind the seam.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Which transport this handle speaks.
    fn kind(&self) -> ProviderKind;

    /// Send one prompt and return the streaming response.
    ///
    /// The stream ends with [`ProviderEvent::Done`] on a completed turn.
    /// A stream that ends without `Done` was interrupted or failed.
    async fn query(&self, prompt: String) -> anyhow::Result<EventStream>;

    /// Cancel the in-flight stream, if any.  The stream observes the
    /// cancellation at its next yield point and terminates without `Done`.
    /// No-op when nothing is streaming.
    async fn interrupt(&self);

    /// Release transport resources.  Idempotent; the handle is unusable
    /// afterwards.
    async fn dispose(&self);
}
