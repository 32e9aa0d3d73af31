// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{EchoProvider, Provider};

/// Builds provider handles for one transport.  The warm pool calls this on
/// a background task, so construction may do slow work (spawn a process,
/// open a socket) without blocking a task processor.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn build(&self) -> anyhow::Result<Arc<dyn Provider>>;

    /// Name shown in connection status events.
    fn provider_name(&self) -> &str;
}

/// Factory for the in-process echo provider.
#[derive(Default)]
pub struct MockFactory;

#[async_trait]
impl ProviderFactory for MockFactory {
    async fn build(&self) -> anyhow::Result<Arc<dyn Provider>> {
        Ok(Arc::new(EchoProvider))
    }

    fn provider_name(&self) -> &str {
        "echo"
    }
}

/// Small pool of pre-initialized provider handles.
///
/// `take` pops a ready handle when one exists and falls back to a cold
/// build otherwise; either way a background refill is kicked off so the
/// next agent spawn finds a warm handle again.
pub struct WarmPool {
    factory: Arc<dyn ProviderFactory>,
    ready: Mutex<Vec<Arc<dyn Provider>>>,
    target: usize,
}

impl WarmPool {
    pub fn new(factory: Arc<dyn ProviderFactory>, target: usize) -> Arc<Self> {
        Arc::new(Self {
            factory,
            ready: Mutex::new(Vec::new()),
            target,
        })
    }

    /// Fill the pool up to its target size.  Called once at startup.
    pub async fn prefill(self: &Arc<Self>) {
        loop {
            {
                let ready = self.ready.lock().await;
                if ready.len() >= self.target {
                    return;
                }
            }
            match self.factory.build().await {
                Ok(p) => self.ready.lock().await.push(p),
                Err(e) => {
                    warn!("warm pool prefill failed: {e}");
                    return;
                }
            }
        }
    }

    /// Get a provider handle, warm if possible.
    pub async fn take(self: &Arc<Self>) -> anyhow::Result<Arc<dyn Provider>> {
        let warm = self.ready.lock().await.pop();
        self.spawn_refill();
        match warm {
            Some(p) => {
                debug!("warm provider handle served");
                Ok(p)
            }
            None => self.factory.build().await,
        }
    }

    /// Number of ready handles (for stats).
    pub async fn warm_count(&self) -> usize {
        self.ready.lock().await.len()
    }

    fn spawn_refill(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let need = {
                let ready = pool.ready.lock().await;
                ready.len() < pool.target
            };
            if !need {
                return;
            }
            match pool.factory.build().await {
                Ok(p) => {
                    let mut ready = pool.ready.lock().await;
                    if ready.len() < pool.target {
                        ready.push(p);
                    }
                }
                Err(e) => warn!("warm pool refill failed: {e}"),
            }
        });
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefill_reaches_target() {
        let pool = WarmPool::new(Arc::new(MockFactory), 2);
        pool.prefill().await;
        assert_eq!(pool.warm_count().await, 2);
    }

    #[tokio::test]
    async fn take_falls_back_to_cold_build_when_empty() {
        let pool = WarmPool::new(Arc::new(MockFactory), 1);
        let p = pool.take().await.unwrap();
        assert_eq!(p.name(), "echo");
    }

    #[tokio::test]
    async fn take_refills_in_background() {
        let pool = WarmPool::new(Arc::new(MockFactory), 1);
        pool.prefill().await;
        let _ = pool.take().await.unwrap();
        // The refill task runs on the same runtime; give it a beat.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(pool.warm_count().await, 1);
    }
}
