//! Transport seam: point-to-point RPC, collective broadcast, and bulk
//! buffer movement.
//!
//! The protocol engines only ever talk to [`Transport`]; the in-process
//! [`local::LocalCluster`] implementation backs the simulator and the test
//! suite. A wire-backed implementation plugs in behind the same trait.

pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::error::{ErrorCode, IvResult};
use crate::proto::wire::{FetchReply, FetchRequest, SyncRequest, UpdateReply, UpdateRequest};
use crate::topo::Rank;

/// Name of a buffer registered with the transport on some rank.
///
/// Handles are plain data and travel inside requests; only the transport
/// can dereference them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkHandle {
    /// Rank that registered the buffer.
    pub owner: Rank,
    /// Transport-assigned identifier.
    pub id: u64,
}

/// RPC, broadcast, and bulk operations available to one rank.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a fetch request and wait for its reply.
    async fn send_fetch(&self, dest: Rank, req: FetchRequest) -> IvResult<FetchReply>;

    /// Send an update request and wait for its reply.
    async fn send_update(&self, dest: Rank, req: UpdateRequest) -> IvResult<UpdateReply>;

    /// Deliver a sync request to every rank except those in `exclude`,
    /// returning the aggregated result code (first non-Ok wins).
    async fn sync_broadcast(&self, exclude: &[Rank], req: SyncRequest) -> IvResult<ErrorCode>;

    /// Register a readable buffer holding `data`. Peers read it with
    /// [`Transport::bulk_take`]; reads do not consume it.
    fn bulk_expose(&self, data: Bytes) -> IvResult<BulkHandle>;

    /// Register a writable buffer for a peer to fill with
    /// [`Transport::bulk_put`].
    fn bulk_expose_sink(&self) -> IvResult<BulkHandle>;

    /// Push `data` into a peer's writable buffer.
    async fn bulk_put(&self, handle: &BulkHandle, data: Bytes) -> IvResult<()>;

    /// Read a peer's readable buffer, or collect what a peer pushed into a
    /// local sink.
    async fn bulk_take(&self, handle: &BulkHandle) -> IvResult<Bytes>;

    /// Unregister a buffer this rank previously exposed.
    fn bulk_free(&self, handle: &BulkHandle);
}
