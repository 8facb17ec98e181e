//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use incast::core::error::{ErrorCode, IvResult};
use incast::node::IvNode;
use incast::ns::class::{ClassOutcome, FetchPhase, Permission, ValueClass, ValueSlot};
use incast::ns::registry::{Namespace, NamespaceId};
use incast::ns::store::MemStoreClass;
use incast::topo::{GroupView, Rank, TopologyKind};
use incast::transport::local::LocalCluster;
use tempfile::NamedTempFile;

/// Create a configuration file with the given TOML content.
pub fn create_config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// An in-process cluster with one instrumented store class per rank.
pub struct TestCluster {
    pub cluster: LocalCluster,
    pub ns_id: NamespaceId,
    pub classes: Vec<Arc<CountingClass>>,
    size: u32,
}

/// Build a cluster where every rank runs a [`CountingClass`] wrapping a
/// [`MemStoreClass`] seeded identically, so placement agrees group-wide.
pub fn build_cluster(size: u32, topology: TopologyKind, seed: u64) -> TestCluster {
    let cluster = LocalCluster::new(size).expect("cluster");
    let classes: Vec<Arc<CountingClass>> = (0..size)
        .map(|rank| {
            let group = GroupView {
                size,
                self_rank: rank,
            };
            Arc::new(CountingClass::new(MemStoreClass::for_group(seed, group)))
        })
        .collect();

    let ns_id = cluster
        .attach_all(topology, |rank| {
            vec![Arc::clone(&classes[rank as usize]) as Arc<dyn ValueClass>]
        })
        .expect("attach");

    TestCluster {
        cluster,
        ns_id,
        classes,
        size,
    }
}

impl TestCluster {
    pub fn node(&self, rank: Rank) -> Arc<IvNode> {
        self.cluster.node(rank)
    }

    pub fn ns(&self, rank: Rank) -> Arc<Namespace> {
        self.node(rank)
            .registry()
            .lookup(self.ns_id)
            .expect("namespace attached")
    }

    pub fn class(&self, rank: Rank) -> &Arc<CountingClass> {
        &self.classes[rank as usize]
    }

    pub fn store(&self, rank: Rank) -> &MemStoreClass {
        self.classes[rank as usize].inner()
    }

    /// The root rank the shared placement assigns to `key`.
    pub fn root_of(&self, key: &[u8]) -> Rank {
        let group = GroupView {
            size: self.size,
            self_rank: 0,
        };
        self.classes[0]
            .inner()
            .root_rank(key, &group)
            .expect("placement")
    }

    /// Find a key whose root is `root`.
    pub fn key_rooted_at(&self, root: Rank) -> Vec<u8> {
        (0..10_000u32)
            .map(|i| format!("key-{}", i).into_bytes())
            .find(|k| self.root_of(k) == root)
            .expect("some key must land on every rank")
    }
}

/// Delegating value class that counts engine calls.
pub struct CountingClass {
    inner: MemStoreClass,
    fetch_attempts: AtomicU64,
    replay_attempts: AtomicU64,
    update_attempts: AtomicU64,
    refreshes: AtomicU64,
}

impl CountingClass {
    pub fn new(inner: MemStoreClass) -> Self {
        Self {
            inner,
            fetch_attempts: AtomicU64::new(0),
            replay_attempts: AtomicU64::new(0),
            update_attempts: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &MemStoreClass {
        &self.inner
    }

    pub fn fetch_attempts(&self) -> u64 {
        self.fetch_attempts.load(Ordering::Relaxed)
    }

    pub fn replay_attempts(&self) -> u64 {
        self.replay_attempts.load(Ordering::Relaxed)
    }

    pub fn update_attempts(&self) -> u64 {
        self.update_attempts.load(Ordering::Relaxed)
    }

    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn outstanding_checkouts(&self) -> u64 {
        self.inner.outstanding_checkouts()
    }
}

impl ValueClass for CountingClass {
    fn root_rank(&self, key: &[u8], group: &GroupView) -> IvResult<Rank> {
        self.inner.root_rank(key, group)
    }

    fn checkout(&self, key: &[u8], version: u64, permission: Permission) -> IvResult<ValueSlot> {
        self.inner.checkout(key, version, permission)
    }

    fn release(&self, slot: ValueSlot) {
        self.inner.release(slot)
    }

    fn attempt_fetch(
        &self,
        key: &[u8],
        version: u64,
        phase: FetchPhase,
        slot: &mut ValueSlot,
    ) -> IvResult<ClassOutcome> {
        self.fetch_attempts.fetch_add(1, Ordering::Relaxed);
        if phase == FetchPhase::Replay {
            self.replay_attempts.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.attempt_fetch(key, version, phase, slot)
    }

    fn attempt_update(
        &self,
        key: &[u8],
        version: u64,
        is_root: bool,
        value: &[u8],
        slot: &mut ValueSlot,
    ) -> IvResult<ClassOutcome> {
        self.update_attempts.fetch_add(1, Ordering::Relaxed);
        self.inner.attempt_update(key, version, is_root, value, slot)
    }

    fn apply_refresh(
        &self,
        key: &[u8],
        version: u64,
        value: Option<&[u8]>,
        invalidate: bool,
        rc: ErrorCode,
    ) -> IvResult<ClassOutcome> {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        self.inner.apply_refresh(key, version, value, invalidate, rc)
    }
}
