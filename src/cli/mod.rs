//! Command-line interface.
//!
//! Unified CLI for Incast operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// Incast - tree-propagated incast variable cache.
#[derive(Parser, Debug)]
#[command(name = "incast")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive fetch/update/invalidate traffic on an in-process cluster.
    Simulate(commands::SimulateArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}
