//! Request and reply shapes exchanged between ranks.
//!
//! Values never travel inline: requests carry a [`BulkHandle`] naming a
//! buffer on the sender, and the peer pulls from or pushes into it through
//! the transport's bulk operations. Replies carry only a result code.

use serde::{Deserialize, Serialize};

use crate::core::error::ErrorCode;
use crate::ns::registry::NamespaceId;
use crate::topo::Rank;
use crate::transport::BulkHandle;

/// When a completed update is pushed to the rest of the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// No propagation; caches converge through later fetches.
    None,
    /// Broadcast launched after the update completes; the caller does not
    /// wait for it.
    Lazy,
    /// The update does not complete until the broadcast has been
    /// acknowledged by the group.
    Eager,
}

/// What a sync broadcast carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// Push the new value (or the invalidation) into every cache.
    Update,
    /// Tell every rank the key changed without shipping the value.
    Notify,
}

/// Sync behavior attached to an update as it travels toward the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDescriptor {
    pub mode: SyncMode,
    pub event: SyncEvent,
}

impl SyncDescriptor {
    pub fn none() -> Self {
        Self {
            mode: SyncMode::None,
            event: SyncEvent::Notify,
        }
    }

    pub fn eager_update() -> Self {
        Self {
            mode: SyncMode::Eager,
            event: SyncEvent::Update,
        }
    }

    pub fn lazy_update() -> Self {
        Self {
            mode: SyncMode::Lazy,
            event: SyncEvent::Update,
        }
    }
}

/// Where a forwarded fetch is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShortcutPolicy {
    /// One hop toward the root along the tree.
    None,
    /// Straight to the root, skipping intermediates.
    ToRoot,
}

/// Fetch a value; the responder pushes the bytes into `value_bulk`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub ns: NamespaceId,
    pub class_id: u32,
    pub key: Vec<u8>,
    /// Root rank as computed by the sender; responders verify agreement.
    pub root: Rank,
    /// Writable buffer on the sender for the fetched value.
    pub value_bulk: BulkHandle,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FetchReply {
    pub rc: ErrorCode,
}

/// Apply an update (or, without `value_bulk`, an invalidation) at the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub ns: NamespaceId,
    pub class_id: u32,
    pub key: Vec<u8>,
    pub root: Rank,
    /// Rank where the update originated.
    pub origin: Rank,
    pub sync: SyncDescriptor,
    /// Readable buffer on the sender holding the new value; absent for
    /// invalidations.
    pub value_bulk: Option<BulkHandle>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UpdateReply {
    pub rc: ErrorCode,
}

/// Post-update broadcast refreshing or invalidating remote caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub ns: NamespaceId,
    pub class_id: u32,
    pub key: Vec<u8>,
    pub sync: SyncDescriptor,
    /// Readable buffer holding the value for `SyncEvent::Update` pushes;
    /// absent for notifications and invalidations.
    pub value_bulk: Option<BulkHandle>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncReply {
    pub rc: ErrorCode,
}
