//! In-memory value class used by the simulator and tests.
//!
//! Placement hashes the key with a seeded xxHash and takes it modulo the
//! group size, so the root rank is deterministic and uniformly spread.
//! Values live in a per-rank map that doubles as the cache on non-root
//! ranks and the authoritative store on the root.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use twox_hash::XxHash64;

use crate::core::error::{ErrorCode, IvError, IvResult};
use crate::ns::class::{ClassOutcome, FetchPhase, Permission, ValueClass, ValueSlot};
use crate::topo::{GroupView, Rank};

/// Hash-placed, map-backed value class.
pub struct MemStoreClass {
    seed: u64,
    group: Option<GroupView>,
    values: RwLock<HashMap<Vec<u8>, Bytes>>,
    checkouts: AtomicU64,
    releases: AtomicU64,
}

impl MemStoreClass {
    /// A class with no group binding. Fetch misses always forward; useful
    /// for exercising machinery that does not reach the root.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            group: None,
            values: RwLock::new(HashMap::new()),
            checkouts: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    /// A class bound to a group view, so it can tell when the local rank is
    /// the root for a key and answer misses with `NotFound` there.
    pub fn for_group(seed: u64, group: GroupView) -> Self {
        Self {
            group: Some(group),
            ..Self::new(seed)
        }
    }

    fn placement(&self, key: &[u8], size: u32) -> Rank {
        use std::hash::Hasher;
        let mut hasher = XxHash64::with_seed(self.seed);
        hasher.write(key);
        (hasher.finish() % size as u64) as Rank
    }

    fn is_local_root(&self, key: &[u8]) -> bool {
        match self.group {
            Some(g) => self.placement(key, g.size) == g.self_rank,
            None => false,
        }
    }

    /// Direct cache peek, for assertions.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.values.read().get(key).cloned()
    }

    /// Seed a value directly, bypassing the protocol.
    pub fn put(&self, key: &[u8], value: Bytes) {
        self.values.write().insert(key.to_vec(), value);
    }

    /// Checkouts not yet paired with a release.
    pub fn outstanding_checkouts(&self) -> u64 {
        self.checkouts.load(Ordering::Acquire) - self.releases.load(Ordering::Acquire)
    }
}

impl ValueClass for MemStoreClass {
    fn root_rank(&self, key: &[u8], group: &GroupView) -> IvResult<Rank> {
        if group.size == 0 {
            return Err(IvError::invalid("empty group"));
        }
        Ok(self.placement(key, group.size))
    }

    fn checkout(&self, _key: &[u8], _version: u64, _permission: Permission) -> IvResult<ValueSlot> {
        self.checkouts.fetch_add(1, Ordering::AcqRel);
        Ok(ValueSlot::empty())
    }

    fn release(&self, _slot: ValueSlot) {
        self.releases.fetch_add(1, Ordering::AcqRel);
    }

    fn attempt_fetch(
        &self,
        key: &[u8],
        _version: u64,
        _phase: FetchPhase,
        slot: &mut ValueSlot,
    ) -> IvResult<ClassOutcome> {
        if let Some(value) = self.values.read().get(key) {
            slot.data.clear();
            slot.data.extend_from_slice(value);
            return Ok(ClassOutcome::Done);
        }
        if self.is_local_root(key) {
            return Err(IvError::not_found(format!(
                "key {:?} absent at its root",
                String::from_utf8_lossy(key)
            )));
        }
        Ok(ClassOutcome::Forward)
    }

    fn attempt_update(
        &self,
        key: &[u8],
        _version: u64,
        is_root: bool,
        value: &[u8],
        _slot: &mut ValueSlot,
    ) -> IvResult<ClassOutcome> {
        if !is_root {
            return Ok(ClassOutcome::Forward);
        }
        self.values
            .write()
            .insert(key.to_vec(), Bytes::copy_from_slice(value));
        Ok(ClassOutcome::Done)
    }

    fn apply_refresh(
        &self,
        key: &[u8],
        _version: u64,
        value: Option<&[u8]>,
        invalidate: bool,
        rc: ErrorCode,
    ) -> IvResult<ClassOutcome> {
        if invalidate {
            self.values.write().remove(key);
            // A group-bound non-root drops its copy and keeps the
            // invalidation moving toward the root.
            return Ok(if self.group.is_none() || self.is_local_root(key) {
                ClassOutcome::Done
            } else {
                ClassOutcome::Forward
            });
        }
        if !rc.is_ok() {
            // Failure notice for a fetch this class has no partial state for.
            return Ok(ClassOutcome::Done);
        }
        if let Some(value) = value {
            self.values
                .write()
                .insert(key.to_vec(), Bytes::copy_from_slice(value));
        }
        Ok(ClassOutcome::Done)
    }
}
