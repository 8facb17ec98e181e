//! Value-class capability set consumed by the protocol engines.
//!
//! A value class owns the storage and placement policy for one family of
//! keys. The engines drive it through a narrow contract: check a value
//! buffer out, attempt a local fetch or update against it, apply refreshed
//! state pushed from elsewhere in the tree, and release the buffer. The
//! class never talks to the transport; it only reports `Done` or `Forward`
//! and the engine decides where the request goes next.

use std::any::Any;

use bytes::BytesMut;

use crate::core::error::{ErrorCode, IvResult};
use crate::topo::{GroupView, Rank};

/// Access intent declared at checkout time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// The engine will read the value out of the slot.
    Read,
    /// The engine will write fetched or updated bytes into the slot.
    Write,
}

/// Result of a local fetch or update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassOutcome {
    /// The class satisfied the request locally.
    Done,
    /// The class is not authoritative for this key here; forward one hop
    /// toward the root.
    Forward,
}

/// Distinguishes a first fetch attempt from a retry after waiting out an
/// earlier in-flight fetch for the same key.
///
/// A class that caches negatively may want to re-check its backing state on
/// `Replay` even when the first attempt would have forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Initial,
    Replay,
}

/// A checked-out value buffer.
///
/// Slots are produced by [`ValueClass::checkout`] and must be handed back to
/// [`ValueClass::release`] exactly once. The `token` field lets a class
/// thread private per-checkout state (pin handles, version stamps) through
/// the engine without the engine understanding it.
pub struct ValueSlot {
    /// The value bytes. Engines write into this on fetch and read from it
    /// when replying to a child or completing a caller.
    pub data: BytesMut,
    /// Opaque per-checkout state owned by the class.
    pub token: Option<Box<dyn Any + Send>>,
}

impl ValueSlot {
    /// An empty slot with no class token.
    pub fn empty() -> Self {
        Self {
            data: BytesMut::new(),
            token: None,
        }
    }

    /// A slot pre-filled with the given bytes.
    pub fn with_data(data: impl Into<BytesMut>) -> Self {
        Self {
            data: data.into(),
            token: None,
        }
    }
}

/// The capability set a namespace registers per value class.
///
/// Implementations must be safe to call concurrently; the engines hold no
/// lock across class calls.
pub trait ValueClass: Send + Sync {
    /// The rank owning the authoritative copy of `key`.
    ///
    /// Must be deterministic for a stable group membership: every rank that
    /// asks gets the same answer, and repeated calls agree.
    fn root_rank(&self, key: &[u8], group: &GroupView) -> IvResult<Rank>;

    /// Check out a value buffer for `key` with the declared access intent.
    fn checkout(&self, key: &[u8], version: u64, permission: Permission) -> IvResult<ValueSlot>;

    /// Release a buffer previously checked out. Paired with every checkout,
    /// on success and failure paths alike.
    fn release(&self, slot: ValueSlot);

    /// Attempt to satisfy a fetch from local state.
    ///
    /// `Done` means `slot.data` now holds the value. `Forward` means this
    /// rank is not authoritative and holds no usable copy.
    fn attempt_fetch(
        &self,
        key: &[u8],
        version: u64,
        phase: FetchPhase,
        slot: &mut ValueSlot,
    ) -> IvResult<ClassOutcome>;

    /// Attempt to apply an update locally.
    ///
    /// `is_root` tells the class whether this rank is the authoritative one
    /// for `key`; a non-root class typically returns `Forward` so the update
    /// travels up the tree.
    fn attempt_update(
        &self,
        key: &[u8],
        version: u64,
        is_root: bool,
        value: &[u8],
        slot: &mut ValueSlot,
    ) -> IvResult<ClassOutcome>;

    /// Apply refreshed state pushed by the protocol: a fetched value coming
    /// back down the tree, a sync broadcast, or an invalidation.
    ///
    /// `value` is `None` for invalidations and for failure notices; `rc`
    /// carries the outcome of the operation that produced this refresh so
    /// the class can react to failures (drop a negative cache entry, for
    /// example).
    fn apply_refresh(
        &self,
        key: &[u8],
        version: u64,
        value: Option<&[u8]>,
        invalidate: bool,
        rc: ErrorCode,
    ) -> IvResult<ClassOutcome>;

    /// Key equivalence for in-flight deduplication.
    ///
    /// Byte equality by default; classes with structured keys may override
    /// to treat distinct encodings of the same key as one in-flight entry.
    fn keys_equal(&self, a: &[u8], b: &[u8]) -> bool {
        a == b
    }
}
