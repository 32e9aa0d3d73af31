// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "svea", about = "Orchestration server for an AI desktop shell")]
pub struct Cli {
    /// Explicit config file (merged on top of the discovered layers)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address override, e.g. 0.0.0.0:8787
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Verbose logging (debug level) to stderr
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the merged configuration and exit
    ShowConfig,
    /// List recorded sessions, newest first
    Sessions {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}
