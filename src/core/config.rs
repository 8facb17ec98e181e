//! Configuration parsing and validation.
//!
//! Incast configuration is loaded from TOML files with CLI overrides. The
//! sections mirror the architectural components: cluster shape, protocol
//! defaults, and telemetry.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::proto::wire::{SyncMode, ShortcutPolicy};
use crate::topo::TopologyKind;

/// Top-level Incast configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cluster shape for the in-process simulator.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Protocol defaults.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Telemetry and observability configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            protocol: ProtocolConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Cluster shape configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of ranks in the group.
    #[serde(default = "default_ranks")]
    pub ranks: u32,

    /// Tree topology: "flat" or "kary".
    #[serde(default = "default_topology")]
    pub topology: String,

    /// Branch factor for the kary topology.
    #[serde(default = "default_branch")]
    pub branch: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            ranks: default_ranks(),
            topology: default_topology(),
            branch: default_branch(),
        }
    }
}

impl ClusterConfig {
    /// Resolve the configured topology kind.
    pub fn topology_kind(&self) -> TopologyKind {
        match self.topology.as_str() {
            "flat" => TopologyKind::Flat,
            _ => TopologyKind::Kary {
                branch: self.branch,
            },
        }
    }
}

/// Protocol defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Default sync mode for updates: "none", "lazy", or "eager".
    #[serde(default = "default_sync_mode")]
    pub sync_mode: String,

    /// Default forwarding shortcut: "none" or "to-root".
    #[serde(default = "default_shortcut")]
    pub shortcut: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            sync_mode: default_sync_mode(),
            shortcut: default_shortcut(),
        }
    }
}

impl ProtocolConfig {
    /// Resolve the configured default sync mode.
    pub fn default_sync_mode(&self) -> SyncMode {
        match self.sync_mode.as_str() {
            "none" => SyncMode::None,
            "lazy" => SyncMode::Lazy,
            _ => SyncMode::Eager,
        }
    }

    /// Resolve the configured default shortcut policy.
    pub fn default_shortcut(&self) -> ShortcutPolicy {
        match self.shortcut.as_str() {
            "to-root" => ShortcutPolicy::ToRoot,
            _ => ShortcutPolicy::None,
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_ranks() -> u32 {
    4
}

fn default_topology() -> String {
    "kary".to_string()
}

fn default_branch() -> u32 {
    2
}

fn default_sync_mode() -> String {
    "eager".to_string()
}

fn default_shortcut() -> String {
    "none".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ranks) = overrides.ranks {
            self.cluster.ranks = ranks;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.ranks == 0 {
            anyhow::bail!("cluster.ranks must be > 0");
        }

        if self.cluster.topology != "flat" && self.cluster.topology != "kary" {
            anyhow::bail!(
                "cluster.topology must be 'flat' or 'kary', got: {}",
                self.cluster.topology
            );
        }

        if self.cluster.topology == "kary" && self.cluster.branch == 0 {
            anyhow::bail!("cluster.branch must be > 0 for the kary topology");
        }

        let valid_modes = ["none", "lazy", "eager"];
        if !valid_modes.contains(&self.protocol.sync_mode.as_str()) {
            anyhow::bail!(
                "protocol.sync_mode must be one of {:?}, got: {}",
                valid_modes,
                self.protocol.sync_mode
            );
        }

        if self.protocol.shortcut != "none" && self.protocol.shortcut != "to-root" {
            anyhow::bail!(
                "protocol.shortcut must be 'none' or 'to-root', got: {}",
                self.protocol.shortcut
            );
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }

        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override rank count.
    pub ranks: Option<u32>,
}
