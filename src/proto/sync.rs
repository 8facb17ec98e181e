//! Post-update sync broadcast engine.
//!
//! Once an update lands, the applying rank may push it out to the rest of
//! the group: eagerly (the update does not complete until the group has
//! acknowledged), lazily (broadcast in the background, caller proceeds), or
//! not at all. The broadcast carries either the value itself or a bare
//! change notification, and excludes the launching rank, which refreshed
//! locally before sending.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::error::{ErrorCode, IvResult};
use crate::node::IvNode;
use crate::ns::registry::Namespace;
use crate::proto::wire::{SyncDescriptor, SyncEvent, SyncMode, SyncReply, SyncRequest};

/// Launch the sync for an update that just applied on this rank.
///
/// Returns the code the update completes with: `Ok` unless an eager
/// broadcast reported a failure somewhere in the group.
pub(crate) async fn run_sync(
    node: &IvNode,
    ns: &Arc<Namespace>,
    class_id: u32,
    key: &[u8],
    value: Option<Bytes>,
    sync: SyncDescriptor,
) -> ErrorCode {
    if sync.mode == SyncMode::None {
        return ErrorCode::Ok;
    }

    let class = match ns.class(class_id) {
        Ok(class) => class,
        Err(err) => return err.code(),
    };

    // Refresh the local cache layer before telling the group.
    let local = match sync.event {
        SyncEvent::Update => {
            class.apply_refresh(key, 0, value.as_deref(), value.is_none(), ErrorCode::Ok)
        }
        SyncEvent::Notify => class.apply_refresh(key, 0, None, false, ErrorCode::Ok),
    };
    if let Err(err) = local {
        return err.code();
    }

    let transport = Arc::clone(node.transport());
    let bulk = match (sync.event, &value) {
        (SyncEvent::Update, Some(v)) => match transport.bulk_expose(v.clone()) {
            Ok(handle) => Some(handle),
            Err(err) => return err.code(),
        },
        _ => None,
    };
    let req = SyncRequest {
        ns: ns.id(),
        class_id,
        key: key.to_vec(),
        sync,
        value_bulk: bulk,
    };
    let exclude = vec![ns.group().self_rank];
    node.metrics().inc_sync_broadcast();
    debug!(ns = %ns.id(), class_id, mode = ?sync.mode, event = ?sync.event, "sync broadcast");

    match sync.mode {
        SyncMode::Eager => {
            let rc = match transport.sync_broadcast(&exclude, req).await {
                Ok(rc) => rc,
                Err(err) => err.code(),
            };
            if let Some(handle) = &bulk {
                transport.bulk_free(handle);
            }
            rc
        }
        SyncMode::Lazy => {
            let ns_id = ns.id();
            tokio::spawn(async move {
                match transport.sync_broadcast(&exclude, req).await {
                    Ok(rc) if rc.is_ok() => {}
                    Ok(rc) => {
                        warn!(ns = %ns_id, %rc, "lazy sync reported failure");
                    }
                    Err(err) => {
                        warn!(ns = %ns_id, error = %err, "lazy sync broadcast failed");
                    }
                }
                if let Some(handle) = &bulk {
                    transport.bulk_free(handle);
                }
            });
            ErrorCode::Ok
        }
        SyncMode::None => ErrorCode::Ok,
    }
}

/// Apply an inbound sync push to the local class.
pub(crate) async fn handle_sync(node: &IvNode, req: SyncRequest) -> SyncReply {
    node.metrics().inc_sync_in();
    let rc = match serve_sync(node, &req).await {
        Ok(()) => ErrorCode::Ok,
        Err(err) => {
            warn!(ns = %req.ns, error = %err, "sync apply failed");
            err.code()
        }
    };
    SyncReply { rc }
}

async fn serve_sync(node: &IvNode, req: &SyncRequest) -> IvResult<()> {
    let ns = node.registry().lookup(req.ns)?;
    let class = ns.class(req.class_id)?;

    let value = match &req.value_bulk {
        Some(handle) => Some(node.transport().bulk_take(handle).await?),
        None => None,
    };

    // The class outcome is irrelevant on a downward push; there is nowhere
    // further to forward.
    match req.sync.event {
        SyncEvent::Update => {
            class.apply_refresh(&req.key, 0, value.as_deref(), value.is_none(), ErrorCode::Ok)?;
        }
        SyncEvent::Notify => {
            class.apply_refresh(&req.key, 0, None, false, ErrorCode::Ok)?;
        }
    }
    Ok(())
}
