//! Incast - unified CLI entrypoint.
//!
//! Usage:
//!   incast simulate [--ranks N] [--keys N] [--seed N]
//!   incast config validate --config config/incast.toml
//!   incast config show [--format json]
//!   incast config generate [--output path]

use anyhow::Result;
use clap::Parser;
use incast::cli::commands::{run_config, run_simulate};
use incast::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/incast.toml"));

    match cli.command {
        Commands::Simulate(args) => run_simulate(&config_path, args).await,
        Commands::Config(args) => run_config(args),
    }
}
