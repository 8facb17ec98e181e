//! Config command implementation.

use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

use crate::core::config::Config;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = "config/incast.toml")]
        config: PathBuf,
    },
    /// Print configuration with defaults.
    Show {
        /// Config file path.
        #[arg(short, long, default_value = "config/incast.toml")]
        config: PathBuf,
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Generate a configuration template.
    Generate {
        /// Output file path.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => validate_config(&config),
        ConfigCommand::Show { config, format } => show_config(&config, &format),
        ConfigCommand::Generate { output } => generate_config(output.as_deref()),
    }
}

fn validate_config(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }

    let config = Config::from_file(path)?;
    println!("✓ Config file is valid");

    if config.cluster.ranks == 1 {
        println!("  ⚠ Warning: single-rank cluster, nothing will ever forward");
    }

    println!("✓ Configuration validation complete");
    Ok(())
}

fn show_config(path: &Path, format: &str) -> Result<()> {
    let config = if path.exists() {
        Config::from_file(path)?
    } else {
        Config::default()
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        _ => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn generate_config(output: Option<&Path>) -> Result<()> {
    let template = toml::to_string_pretty(&Config::default())?;

    match output {
        Some(path) => {
            std::fs::write(path, &template)?;
            println!("✓ Wrote configuration template to {:?}", path);
        }
        None => {
            println!("{}", template);
        }
    }

    Ok(())
}
