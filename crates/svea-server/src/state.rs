// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use svea_cache::ReloadCache;
use svea_config::{Config, ProviderConfig, ProviderKind};
use svea_core::{AgentLimiter, BroadcastCenter, ContextPool};
use svea_model::{MockFactory, ProviderFactory, WarmPool};
use svea_session::{RestoredSession, SessionLogger};

/// Build the warm provider pool for a provider config.
///
/// The stdio and websocket transports are adapter processes outside this
/// server; until one is pointed at via `provider.command` / `provider.url`,
/// only the in-process mock can be constructed here.
pub fn build_warm_pool(cfg: &ProviderConfig) -> anyhow::Result<(Arc<WarmPool>, String)> {
    match cfg.kind {
        ProviderKind::Mock => {
            let factory = Arc::new(MockFactory);
            let name = factory.provider_name().to_string();
            Ok((WarmPool::new(factory, cfg.warm_pool_size), name))
        }
        ProviderKind::Stdio => anyhow::bail!(
            "stdio provider adapter is external; configure provider.command and run the adapter"
        ),
        ProviderKind::Websocket => anyhow::bail!(
            "websocket provider adapter is external; configure provider.url and run the adapter"
        ),
    }
}

/// Process-wide server state shared by every connection handler.
pub struct ServerState {
    pub config: Config,
    pub broadcast: Arc<BroadcastCenter>,
    pub limiter: Arc<AgentLimiter>,
    pub cache: Option<Arc<ReloadCache>>,
    pub logger: Arc<SessionLogger>,
    pub warm_pool: Arc<WarmPool>,
    pub provider_name: String,
    /// Previous-session state, replayed into the first connection.
    restored: Mutex<Option<RestoredSession>>,
    restore_spent: AtomicBool,
    /// Live pools by connection id, for /stats and shutdown.
    pools: Mutex<HashMap<String, Arc<ContextPool>>>,
}

impl ServerState {
    pub fn new(
        config: Config,
        limiter: Arc<AgentLimiter>,
        cache: Option<Arc<ReloadCache>>,
        logger: Arc<SessionLogger>,
        warm_pool: Arc<WarmPool>,
        provider_name: String,
        restored: Option<RestoredSession>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            broadcast: BroadcastCenter::new(),
            limiter,
            cache,
            logger,
            warm_pool,
            provider_name,
            restored: Mutex::new(restored),
            restore_spent: AtomicBool::new(false),
            pools: Mutex::new(HashMap::new()),
        })
    }

    /// The restore payload, handed out exactly once (to the first
    /// connection that asks).
    pub fn take_restored(&self) -> Option<RestoredSession> {
        if self.restore_spent.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.restored.lock().unwrap().take()
    }

    pub fn register_pool(&self, pool: Arc<ContextPool>) {
        self.pools
            .lock()
            .unwrap()
            .insert(pool.connection_id().to_string(), pool);
    }

    pub fn remove_pool(&self, connection_id: &str) -> Option<Arc<ContextPool>> {
        self.pools.lock().unwrap().remove(connection_id)
    }

    pub fn pools(&self) -> Vec<Arc<ContextPool>> {
        self.pools.lock().unwrap().values().cloned().collect()
    }

    /// Clean up every live pool (graceful shutdown).
    pub async fn shutdown(&self) {
        let pools: Vec<_> = self.pools.lock().unwrap().drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.cleanup().await;
        }
        self.logger.flush();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_kind_builds_a_pool() {
        let cfg = ProviderConfig { kind: ProviderKind::Mock, ..ProviderConfig::default() };
        let (pool, name) = build_warm_pool(&cfg).unwrap();
        assert_eq!(name, "echo");
        let provider = pool.take().await.unwrap();
        assert_eq!(provider.name(), "echo");
    }

    #[test]
    fn external_transports_require_an_adapter() {
        for kind in [ProviderKind::Stdio, ProviderKind::Websocket] {
            let cfg = ProviderConfig { kind, ..ProviderConfig::default() };
            assert!(build_warm_pool(&cfg).is_err());
        }
    }

    #[test]
    fn restore_payload_is_handed_out_once() {
        let state = ServerState::new(
            Config::default(),
            svea_core::AgentLimiter::new(4),
            None,
            Arc::new(SessionLogger::disabled()),
            WarmPool::new(Arc::new(MockFactory), 0),
            "echo".into(),
            Some(RestoredSession::default()),
        );
        assert!(state.take_restored().is_some());
        assert!(state.take_restored().is_none());
    }
}
