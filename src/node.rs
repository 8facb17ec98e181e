//! Per-rank runtime: a namespace registry, a transport endpoint, and the
//! protocol counters, with the engine entry points hung off one handle.

use std::sync::Arc;

use bytes::Bytes;

use crate::core::error::IvResult;
use crate::ns::registry::{Namespace, NamespaceRegistry};
use crate::ops::metrics::Metrics;
use crate::proto::wire::{
    FetchReply, FetchRequest, ShortcutPolicy, SyncDescriptor, SyncReply, SyncRequest,
    UpdateReply, UpdateRequest,
};
use crate::proto::{fetch, sync, update};
use crate::topo::{GroupView, Rank};
use crate::transport::Transport;

/// One rank's incast variable runtime.
pub struct IvNode {
    group: GroupView,
    registry: NamespaceRegistry,
    transport: Arc<dyn Transport>,
    metrics: Metrics,
}

impl IvNode {
    pub fn new(group: GroupView, transport: Arc<dyn Transport>) -> Self {
        Self {
            group,
            registry: NamespaceRegistry::new(group),
            transport,
            metrics: Metrics::new(),
        }
    }

    pub fn rank(&self) -> Rank {
        self.group.self_rank
    }

    pub fn group(&self) -> &GroupView {
        &self.group
    }

    pub fn registry(&self) -> &NamespaceRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Fetch the value for `key`, pulling it down the tree if it is not
    /// cached locally.
    pub async fn fetch(
        &self,
        ns: &Arc<Namespace>,
        class_id: u32,
        key: &[u8],
        shortcut: ShortcutPolicy,
    ) -> IvResult<Bytes> {
        fetch::fetch(self, ns, class_id, key, shortcut).await
    }

    /// Apply an update at the key's root, then propagate per `sync`.
    pub async fn update(
        &self,
        ns: &Arc<Namespace>,
        class_id: u32,
        key: &[u8],
        value: Bytes,
        shortcut: ShortcutPolicy,
        sync: SyncDescriptor,
    ) -> IvResult<()> {
        update::update(self, ns, class_id, key, Some(value), shortcut, sync).await
    }

    /// Drop the value for `key` group-wide, subject to `sync`.
    pub async fn invalidate(
        &self,
        ns: &Arc<Namespace>,
        class_id: u32,
        key: &[u8],
        shortcut: ShortcutPolicy,
        sync: SyncDescriptor,
    ) -> IvResult<()> {
        update::update(self, ns, class_id, key, None, shortcut, sync).await
    }

    /// Inbound fetch dispatch.
    pub async fn handle_fetch(&self, req: FetchRequest) -> FetchReply {
        fetch::handle_fetch(self, req).await
    }

    /// Inbound update dispatch.
    pub async fn handle_update(&self, req: UpdateRequest) -> UpdateReply {
        update::handle_update(self, req).await
    }

    /// Inbound sync broadcast dispatch.
    pub async fn handle_sync(&self, req: SyncRequest) -> SyncReply {
        sync::handle_sync(self, req).await
    }
}
