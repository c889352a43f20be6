//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - get: fetch one or more paths through the scheduler
//! - simulate: run a synthetic workload with injected throttling and auth failures
//! - config: print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pacer - resilient request scheduler
#[derive(Parser, Debug)]
#[command(name = "pacer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Override the concurrency cap
    #[arg(long, global = true)]
    pub max_concurrent: Option<usize>,

    /// Override the minimum spacing between dispatches (ms)
    #[arg(long, global = true)]
    pub min_delay_ms: Option<u64>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// GET one or more paths relative to the configured base URL
    Get {
        /// Paths to fetch
        #[arg(required = true)]
        paths: Vec<String>,

        /// Priority for every request (lower runs first)
        #[arg(short, long)]
        priority: Option<u32>,

        /// Retry budget per request
        #[arg(short = 'r', long)]
        max_retries: Option<u32>,
    },

    /// Run a synthetic workload and report dispatch order and stats
    Simulate {
        /// Number of work items
        #[arg(short = 'n', long, default_value_t = 20)]
        items: usize,

        /// Every Nth item is throttled on its first attempt (0 = never)
        #[arg(short = 't', long, default_value_t = 5)]
        throttle_every: usize,

        /// Number of items that fail with 401
        #[arg(short = 'a', long, default_value_t = 0)]
        auth_failures: usize,

        /// Simulated latency of each attempt (ms)
        #[arg(short = 'l', long, default_value_t = 50)]
        latency_ms: u64,
    },

    /// Print the effective configuration as YAML
    Config,
}
