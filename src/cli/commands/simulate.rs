//! Simulate command implementation.
//!
//! Spins up an in-process cluster and drives update, fetch, and invalidate
//! traffic across it, verifying every fetch sees the value the update wrote.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Args;
use tracing::info;

use crate::core::config::Config;
use crate::core::error::ErrorCode;
use crate::ns::class::ValueClass;
use crate::ns::store::MemStoreClass;
use crate::proto::wire::{SyncDescriptor, SyncEvent};
use crate::topo::GroupView;
use crate::transport::local::LocalCluster;

/// Drive traffic on an in-process cluster.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of ranks (overrides config).
    #[arg(long)]
    pub ranks: Option<u32>,

    /// Number of keys to exercise.
    #[arg(long, default_value_t = 8)]
    pub keys: u32,

    /// Placement hash seed.
    #[arg(long, default_value_t = 2026)]
    pub seed: u64,
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Run the simulate command with the given config path.
pub async fn run_simulate(config_path: &Path, args: SimulateArgs) -> Result<()> {
    let mut config = if config_path.exists() {
        Config::from_file(config_path)
            .with_context(|| format!("failed to load config from {:?}", config_path))?
    } else {
        Config::default()
    };
    if let Some(ranks) = args.ranks {
        config.cluster.ranks = ranks;
    }
    config.validate()?;
    init_tracing(&config.telemetry.log_level);

    let ranks = config.cluster.ranks;
    let topology = config.cluster.topology_kind();
    let sync = SyncDescriptor {
        mode: config.protocol.default_sync_mode(),
        event: SyncEvent::Update,
    };
    let shortcut = config.protocol.default_shortcut();
    let seed = args.seed;

    info!(ranks, ?topology, ?sync, "starting in-process cluster");

    let cluster = LocalCluster::new(ranks)?;
    let ns_id = cluster.attach_all(topology, |rank| {
        let group = GroupView {
            size: ranks,
            self_rank: rank,
        };
        vec![Arc::new(MemStoreClass::for_group(seed, group)) as Arc<dyn ValueClass>]
    })?;

    for i in 0..args.keys {
        let key = format!("key-{}", i).into_bytes();
        let value = Bytes::from(format!("value-{}", i));

        let writer = cluster.node(i % ranks);
        let ns = writer.registry().lookup(ns_id)?;
        writer
            .update(&ns, 0, &key, value.clone(), shortcut, sync)
            .await?;

        let reader = cluster.node((i + 1) % ranks);
        let ns = reader.registry().lookup(ns_id)?;
        let fetched = reader.fetch(&ns, 0, &key, shortcut).await?;
        if fetched != value {
            anyhow::bail!(
                "fetch mismatch for key {}: wrote {:?}, read {:?}",
                i,
                value,
                fetched
            );
        }
    }
    info!(keys = args.keys, "all fetches matched their updates");

    // Invalidate every other key and confirm it is gone group-wide.
    for i in (0..args.keys).step_by(2) {
        let key = format!("key-{}", i).into_bytes();
        let node = cluster.node(i % ranks);
        let ns = node.registry().lookup(ns_id)?;
        node.invalidate(&ns, 0, &key, shortcut, SyncDescriptor::eager_update())
            .await?;

        let reader = cluster.node((i + 2) % ranks);
        let ns = reader.registry().lookup(ns_id)?;
        match reader.fetch(&ns, 0, &key, shortcut).await {
            Err(err) if err.code() == ErrorCode::NotFound => {}
            Err(err) => return Err(err.into()),
            Ok(stale) => anyhow::bail!("key {} still resolves to {:?} after invalidate", i, stale),
        }
    }
    info!("invalidated keys no longer resolve");

    for rank in 0..ranks {
        let snapshot = cluster.node(rank).metrics().snapshot();
        println!("rank {}: {}", rank, serde_json::to_string(&snapshot)?);
    }

    Ok(())
}
