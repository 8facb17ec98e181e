//! Protocol counters.
//!
//! One [`Metrics`] instance lives in each node; the protocol engines bump
//! counters as traffic moves. Snapshots are cheap and lock-free.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-node protocol counters.
#[derive(Default)]
pub struct Metrics {
    fetch_rpcs_out: AtomicU64,
    fetch_rpcs_in: AtomicU64,
    update_rpcs_out: AtomicU64,
    update_rpcs_in: AtomicU64,
    sync_rpcs_in: AtomicU64,
    sync_broadcasts: AtomicU64,
    inflight_waits: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $get:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(inc_fetch_out, fetch_rpcs_out, fetch_rpcs_out);
    counter!(inc_fetch_in, fetch_rpcs_in, fetch_rpcs_in);
    counter!(inc_update_out, update_rpcs_out, update_rpcs_out);
    counter!(inc_update_in, update_rpcs_in, update_rpcs_in);
    counter!(inc_sync_in, sync_rpcs_in, sync_rpcs_in);
    counter!(inc_sync_broadcast, sync_broadcasts, sync_broadcasts);
    counter!(inc_inflight_wait, inflight_waits, inflight_waits);

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fetch_rpcs_out: self.fetch_rpcs_out(),
            fetch_rpcs_in: self.fetch_rpcs_in(),
            update_rpcs_out: self.update_rpcs_out(),
            update_rpcs_in: self.update_rpcs_in(),
            sync_rpcs_in: self.sync_rpcs_in(),
            sync_broadcasts: self.sync_broadcasts(),
            inflight_waits: self.inflight_waits(),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub fetch_rpcs_out: u64,
    pub fetch_rpcs_in: u64,
    pub update_rpcs_out: u64,
    pub update_rpcs_in: u64,
    pub sync_rpcs_in: u64,
    pub sync_broadcasts: u64,
    pub inflight_waits: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_into_snapshot() {
        let m = Metrics::new();
        m.inc_fetch_out();
        m.inc_fetch_out();
        m.inc_sync_broadcast();

        let snap = m.snapshot();
        assert_eq!(snap.fetch_rpcs_out, 2);
        assert_eq!(snap.sync_broadcasts, 1);
        assert_eq!(snap.update_rpcs_in, 0);
    }
}
