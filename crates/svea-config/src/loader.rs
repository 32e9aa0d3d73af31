// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Layered configuration loading for the server daemon.
//!
//! Up to four sources apply, lowest precedence first: the system layer
//! (`/etc/svea/`), the operator's XDG config dir, a file named by
//! `$SVEA_CONFIG`, and the `--config` flag.  svea runs as a daemon, so
//! there is no per-project config crawl the way workspace tools do it —
//! what the service loads must not depend on the directory it happens to
//! be started from.
//!
//! Merging is per leaf field: every layer is reduced to dotted-path
//! assignments (`orchestrator.monitor_budget = 2`) which are applied in
//! order, so a one-line override file never wipes out the rest of its
//! section.  The merged result is validated before the server accepts it.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde_yaml::Value;
use tracing::debug;

use crate::Config;

struct Layer {
    path: PathBuf,
    /// Layers the operator named explicitly must exist; discovered
    /// locations are skipped when absent.
    required: bool,
}

fn discovered_layers() -> Vec<Layer> {
    let mut layers = Vec::new();
    for name in ["config.yaml", "config.yml"] {
        layers.push(Layer {
            path: PathBuf::from("/etc/svea").join(name),
            required: false,
        });
    }
    if let Some(cfg) = dirs::config_dir() {
        for name in ["config.yaml", "config.yml"] {
            layers.push(Layer {
                path: cfg.join("svea").join(name),
                required: false,
            });
        }
    }
    if let Ok(path) = std::env::var("SVEA_CONFIG") {
        layers.push(Layer { path: PathBuf::from(path), required: true });
    }
    layers
}

/// Load and validate the merged configuration.  `explicit` is the
/// `--config` flag and takes the highest precedence.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut layers = discovered_layers();
    if let Some(p) = explicit {
        layers.push(Layer { path: p.to_path_buf(), required: true });
    }
    load_layers(&layers)
}

fn load_layers(layers: &[Layer]) -> anyhow::Result<Config> {
    let mut merged = Value::Mapping(serde_yaml::Mapping::new());

    for layer in layers {
        if !layer.path.is_file() {
            if layer.required {
                bail!("config file not found: {}", layer.path.display());
            }
            continue;
        }
        let text = std::fs::read_to_string(&layer.path)
            .with_context(|| format!("reading {}", layer.path.display()))?;
        let value: Value = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing {}", layer.path.display()))?;

        let mut leaves = Vec::new();
        flatten(String::new(), value, &mut leaves);
        debug!(path = %layer.path.display(), fields = leaves.len(), "applying config layer");
        for (dotted, leaf) in leaves {
            assign(&mut merged, &dotted, leaf);
        }
    }

    let config: Config =
        serde_yaml::from_value(merged).context("interpreting merged configuration")?;
    validate(&config)?;
    Ok(config)
}

/// Reduce a YAML tree to dotted leaf assignments.  Scalars and sequences
/// are leaves; mappings recurse.  Non-string keys cannot name a config
/// field and are dropped.
fn flatten(prefix: String, value: Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let Value::String(key) = key else {
                    debug!(%prefix, "ignoring non-string config key");
                    continue;
                };
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(path, child, out);
            }
        }
        leaf => out.push((prefix, leaf)),
    }
}

/// Write one dotted-path leaf into the merged tree, creating intermediate
/// tables as needed.  A scalar left behind by an earlier layer gives way
/// when a later layer needs a table at the same path.
fn assign(node: &mut Value, dotted: &str, leaf: Value) {
    if !matches!(node, Value::Mapping(_)) {
        *node = Value::Mapping(serde_yaml::Mapping::new());
    }
    let Value::Mapping(map) = node else { return };
    match dotted.split_once('.') {
        None => {
            map.insert(Value::String(dotted.to_string()), leaf);
        }
        Some((head, rest)) => {
            let child = map
                .entry(Value::String(head.to_string()))
                .or_insert(Value::Mapping(serde_yaml::Mapping::new()));
            assign(child, rest, leaf);
        }
    }
}

/// Reject configurations the orchestrator cannot run with.  Catching these
/// at boot beats a drain loop that can never acquire a slot.
fn validate(config: &Config) -> anyhow::Result<()> {
    if config.orchestrator.max_agents == 0 {
        bail!("orchestrator.max_agents must be at least 1");
    }
    if config.orchestrator.monitor_budget == 0 {
        bail!("orchestrator.monitor_budget must be at least 1");
    }
    if config.orchestrator.main_queue_cap == 0 {
        bail!("orchestrator.main_queue_cap must be at least 1");
    }
    if config.cache.top_k == 0 {
        bail!("cache.top_k must be at least 1");
    }
    if !(0.0..=1.0).contains(&config.cache.similarity_threshold) {
        bail!(
            "cache.similarity_threshold must be within 0.0..=1.0, got {}",
            config.cache.similarity_threshold
        );
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
