// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use svea_cache::ReloadCache;
use svea_core::AgentLimiter;
use svea_server::{build_warm_pool, serve, ServerState};
use svea_session::SessionLogger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Subcommands run before any server state is built.
    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::ShowConfig => {
                let config = svea_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                return Ok(());
            }
            Commands::Sessions { limit } => {
                let config = svea_config::load(cli.config.as_deref())?;
                print_sessions(&session_root(&config), *limit);
                return Ok(());
            }
        }
    }

    let mut config = svea_config::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    let session_root = session_root(&config);
    let cache_path = config
        .cache
        .path
        .clone()
        .unwrap_or_else(|| data_dir().join("reload-cache.json"));

    // Previous session first: the logger below creates a newer directory.
    let restored = if config.session.restore_on_boot {
        svea_session::restore_latest(&session_root)?
    } else {
        None
    };

    let logger = Arc::new(
        SessionLogger::open(
            &session_root,
            &config.provider.kind.to_string(),
            config.session.write_transcript,
        )
        .context("opening session log")?,
    );
    info!(session = ?logger.dir(), "session log opened");

    let cache = if config.cache.enabled {
        Some(Arc::new(ReloadCache::open(
            cache_path,
            config.cache.similarity_threshold,
            config.cache.top_k,
        )))
    } else {
        None
    };

    let limiter = AgentLimiter::new(config.orchestrator.max_agents);
    let (warm_pool, provider_name) =
        build_warm_pool(&config.provider).context("building provider pool")?;
    warm_pool.prefill().await;

    let state = ServerState::new(
        config,
        limiter,
        cache,
        logger,
        warm_pool,
        provider_name,
        restored,
    );

    serve(state, shutdown_signal()).await
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("svea")
}

fn session_root(config: &svea_config::Config) -> PathBuf {
    config
        .session
        .dir
        .clone()
        .unwrap_or_else(|| data_dir().join("sessions"))
}

fn print_sessions(root: &PathBuf, limit: usize) {
    let Ok(entries) = std::fs::read_dir(root) else {
        println!("no sessions under {}", root.display());
        return;
    };
    let mut dirs: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    dirs.sort();
    dirs.reverse();
    for name in dirs.into_iter().take(limit) {
        println!("{name}");
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
