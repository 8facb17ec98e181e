//! In-process cluster: every rank is an [`IvNode`] in the same address
//! space, RPCs are direct async calls, and bulk buffers live in a shared
//! table. Used by the simulator and the test suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::core::error::{ErrorCode, IvError, IvResult};
use crate::node::IvNode;
use crate::ns::class::ValueClass;
use crate::ns::registry::NamespaceId;
use crate::proto::wire::{FetchReply, FetchRequest, SyncRequest, UpdateReply, UpdateRequest};
use crate::topo::{GroupView, Rank, TopologyKind};
use crate::transport::{BulkHandle, Transport};

enum BulkSlot {
    /// Readable buffer; reads clone, they do not consume.
    Exposed(Bytes),
    /// Writable buffer awaiting a peer's push.
    Sink(Option<Bytes>),
}

/// One update RPC observed on the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateHop {
    pub from: Rank,
    pub to: Rank,
    /// Rank the request names as the update's initiator.
    pub origin: Rank,
}

struct Shared {
    nodes: RwLock<HashMap<Rank, Arc<IvNode>>>,
    bulks: Mutex<HashMap<u64, BulkSlot>>,
    next_bulk: AtomicU64,
    /// Fault injection: when set, bulk puts and takes fail.
    fail_bulk: AtomicBool,
    /// Trace of every update RPC sent, oldest first.
    update_hops: Mutex<Vec<UpdateHop>>,
}

impl Shared {
    fn node(&self, rank: Rank) -> IvResult<Arc<IvNode>> {
        self.nodes
            .read()
            .get(&rank)
            .cloned()
            .ok_or(IvError::Unreachable)
    }

    fn check_bulk_fault(&self) -> IvResult<()> {
        if self.fail_bulk.load(Ordering::Acquire) {
            return Err(IvError::transfer("injected bulk fault"));
        }
        Ok(())
    }
}

/// The per-rank transport endpoint.
pub struct LocalTransport {
    rank: Rank,
    shared: Arc<Shared>,
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send_fetch(&self, dest: Rank, req: FetchRequest) -> IvResult<FetchReply> {
        trace!(from = self.rank, to = dest, "fetch rpc");
        let node = self.shared.node(dest)?;
        Ok(node.handle_fetch(req).await)
    }

    async fn send_update(&self, dest: Rank, req: UpdateRequest) -> IvResult<UpdateReply> {
        trace!(from = self.rank, to = dest, origin = req.origin, "update rpc");
        self.shared.update_hops.lock().push(UpdateHop {
            from: self.rank,
            to: dest,
            origin: req.origin,
        });
        let node = self.shared.node(dest)?;
        Ok(node.handle_update(req).await)
    }

    async fn sync_broadcast(&self, exclude: &[Rank], req: SyncRequest) -> IvResult<ErrorCode> {
        let targets: Vec<Arc<IvNode>> = {
            let nodes = self.shared.nodes.read();
            let mut ranks: Vec<Rank> = nodes.keys().copied().collect();
            ranks.sort_unstable();
            ranks
                .into_iter()
                .filter(|r| !exclude.contains(r))
                .filter_map(|r| nodes.get(&r).cloned())
                .collect()
        };

        let mut rc = ErrorCode::Ok;
        for node in targets {
            let reply = node.handle_sync(req.clone()).await;
            rc = rc.merge(reply.rc);
        }
        Ok(rc)
    }

    fn bulk_expose(&self, data: Bytes) -> IvResult<BulkHandle> {
        let id = self.shared.next_bulk.fetch_add(1, Ordering::Relaxed);
        self.shared.bulks.lock().insert(id, BulkSlot::Exposed(data));
        Ok(BulkHandle {
            owner: self.rank,
            id,
        })
    }

    fn bulk_expose_sink(&self) -> IvResult<BulkHandle> {
        let id = self.shared.next_bulk.fetch_add(1, Ordering::Relaxed);
        self.shared.bulks.lock().insert(id, BulkSlot::Sink(None));
        Ok(BulkHandle {
            owner: self.rank,
            id,
        })
    }

    async fn bulk_put(&self, handle: &BulkHandle, data: Bytes) -> IvResult<()> {
        self.shared.check_bulk_fault()?;
        match self.shared.bulks.lock().get_mut(&handle.id) {
            Some(BulkSlot::Sink(slot)) => {
                *slot = Some(data);
                Ok(())
            }
            Some(BulkSlot::Exposed(_)) => {
                Err(IvError::transfer("bulk handle is not writable"))
            }
            None => Err(IvError::transfer("stale bulk handle")),
        }
    }

    async fn bulk_take(&self, handle: &BulkHandle) -> IvResult<Bytes> {
        self.shared.check_bulk_fault()?;
        match self.shared.bulks.lock().get_mut(&handle.id) {
            Some(BulkSlot::Exposed(data)) => Ok(data.clone()),
            Some(BulkSlot::Sink(slot)) => slot
                .take()
                .ok_or_else(|| IvError::transfer("sink was never filled")),
            None => Err(IvError::transfer("stale bulk handle")),
        }
    }

    fn bulk_free(&self, handle: &BulkHandle) {
        self.shared.bulks.lock().remove(&handle.id);
    }
}

/// A whole group of ranks in one process.
pub struct LocalCluster {
    shared: Arc<Shared>,
    size: u32,
}

impl LocalCluster {
    /// Spin up `size` ranks wired to a shared in-process fabric.
    pub fn new(size: u32) -> IvResult<Self> {
        let shared = Arc::new(Shared {
            nodes: RwLock::new(HashMap::new()),
            bulks: Mutex::new(HashMap::new()),
            next_bulk: AtomicU64::new(1),
            fail_bulk: AtomicBool::new(false),
            update_hops: Mutex::new(Vec::new()),
        });

        for rank in 0..size {
            let group = GroupView::new(size, rank)?;
            let transport = Arc::new(LocalTransport {
                rank,
                shared: Arc::clone(&shared),
            });
            let node = Arc::new(IvNode::new(group, transport));
            shared.nodes.write().insert(rank, node);
        }

        Ok(Self { shared, size })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Handle for `rank`.
    ///
    /// # Panics
    ///
    /// Panics if `rank` was never part of the cluster or has been removed
    /// with [`partition`](Self::partition). The simulator and tests treat
    /// that as a harness bug, not a runtime condition.
    pub fn node(&self, rank: Rank) -> Arc<IvNode> {
        self.shared
            .nodes
            .read()
            .get(&rank)
            .cloned()
            .unwrap_or_else(|| panic!("rank {} not in cluster", rank))
    }

    /// Create a namespace on rank 0 and attach every other rank, giving each
    /// rank the classes produced by `make_classes`.
    pub fn attach_all<F>(
        &self,
        topology: TopologyKind,
        mut make_classes: F,
    ) -> IvResult<NamespaceId>
    where
        F: FnMut(Rank) -> Vec<Arc<dyn ValueClass>>,
    {
        let minter = self.node(0);
        let ns = minter.registry().create(topology, make_classes(0))?;
        let descriptor = ns.descriptor();

        for rank in 1..self.size {
            self.node(rank)
                .registry()
                .attach(&descriptor, make_classes(rank))?;
        }
        Ok(descriptor.id)
    }

    /// Toggle bulk fault injection for the whole fabric.
    pub fn fail_bulk_transfers(&self, fail: bool) {
        self.shared.fail_bulk.store(fail, Ordering::Release);
    }

    /// Number of bulk buffers still registered; zero when every exposed
    /// handle has been freed.
    pub fn live_bulk_handles(&self) -> usize {
        self.shared.bulks.lock().len()
    }

    /// Every update RPC the fabric has carried so far, oldest first.
    pub fn update_hops(&self) -> Vec<UpdateHop> {
        self.shared.update_hops.lock().clone()
    }

    /// Remove a rank from the fabric; RPCs to it fail with `Unreachable`.
    pub fn partition(&self, rank: Rank) -> Option<Arc<IvNode>> {
        self.shared.nodes.write().remove(&rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "not in cluster")]
    fn node_panics_on_unknown_rank() {
        let cluster = LocalCluster::new(2).unwrap();
        let _ = cluster.node(7);
    }

    #[test]
    #[should_panic(expected = "not in cluster")]
    fn node_panics_after_partition() {
        let cluster = LocalCluster::new(3).unwrap();
        cluster.partition(1);
        let _ = cluster.node(1);
    }
}
