//! Update and invalidate engine.
//!
//! Updates travel up the tree until some rank's class applies them -
//! normally the root. The applying rank launches the sync broadcast and the
//! aggregated result rides back down the reply chain, so a caller that asked
//! for eager sync learns whether the whole group refreshed. An invalidation
//! is an update with no value: each rank's class drops its copy and decides
//! whether the invalidation still needs to reach the root.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::error::{ErrorCode, IvError, IvResult};
use crate::node::IvNode;
use crate::ns::class::{ClassOutcome, Permission};
use crate::ns::inflight::MarkOutcome;
use crate::ns::registry::Namespace;
use crate::proto::sync::run_sync;
use crate::proto::wire::{ShortcutPolicy, SyncDescriptor, UpdateReply, UpdateRequest};
use crate::topo::Rank;

/// Apply an update (`Some`) or invalidation (`None`) for `key`.
pub async fn update(
    node: &IvNode,
    ns: &Arc<Namespace>,
    class_id: u32,
    key: &[u8],
    value: Option<Bytes>,
    shortcut: ShortcutPolicy,
    sync: SyncDescriptor,
) -> IvResult<()> {
    let origin = ns.group().self_rank;
    let rc = apply_or_forward(node, ns, class_id, key, value, origin, shortcut, sync).await?;
    rc.into_result()
}

/// Shared body of the caller API and the inbound handler: attempt locally,
/// forward on demand, launch the sync where the update lands. `origin` is
/// the rank that initiated the update and travels through every forward
/// unchanged.
#[allow(clippy::too_many_arguments)]
async fn apply_or_forward(
    node: &IvNode,
    ns: &Arc<Namespace>,
    class_id: u32,
    key: &[u8],
    value: Option<Bytes>,
    origin: Rank,
    shortcut: ShortcutPolicy,
    sync: SyncDescriptor,
) -> IvResult<ErrorCode> {
    let class = ns.class(class_id)?;
    let group = *ns.group();
    let root = class.root_rank(key, &group)?;
    let is_root = group.self_rank == root;

    loop {
        let mut slot = class.checkout(key, 0, Permission::Write)?;
        let attempted = match &value {
            Some(v) => class.attempt_update(key, 0, is_root, v, &mut slot),
            None => class.apply_refresh(key, 0, None, true, ErrorCode::Ok),
        };
        let outcome = match attempted {
            Ok(outcome) => {
                class.release(slot);
                outcome
            }
            Err(err) => {
                class.release(slot);
                return Err(err);
            }
        };

        match outcome {
            ClassOutcome::Done => {
                // Applied here. This rank launches the sync; the aggregated
                // result flows back to the caller or the waiting child.
                return Ok(run_sync(node, ns, class_id, key, value, sync).await);
            }
            ClassOutcome::Forward => {
                if is_root {
                    return Err(IvError::invalid(
                        "authoritative rank asked to forward an update",
                    ));
                }

                match ns.inflight().mark(class_id, class.as_ref(), key) {
                    MarkOutcome::Waiter(rx) => {
                        node.metrics().inc_inflight_wait();
                        let rc = rx.await.map_err(|_| IvError::Canceled)?;
                        rc.into_result()?;
                        // Earlier flight done; retry against fresh state.
                    }
                    MarkOutcome::Owner => {
                        let result = forward_update(
                            node,
                            ns,
                            class_id,
                            key,
                            value.as_ref(),
                            origin,
                            root,
                            shortcut,
                            sync,
                        )
                        .await;
                        let rc = match &result {
                            Ok(rc) => *rc,
                            Err(err) => err.code(),
                        };
                        ns.inflight().complete(class_id, class.as_ref(), key, rc);
                        return result;
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn forward_update(
    node: &IvNode,
    ns: &Arc<Namespace>,
    class_id: u32,
    key: &[u8],
    value: Option<&Bytes>,
    origin: Rank,
    root: Rank,
    shortcut: ShortcutPolicy,
    sync: SyncDescriptor,
) -> IvResult<ErrorCode> {
    let group = ns.group();
    let next: Rank = match shortcut {
        ShortcutPolicy::ToRoot => root,
        ShortcutPolicy::None => ns.topology().parent(group, root, group.self_rank)?,
    };
    let transport = node.transport();

    let bulk = match value {
        Some(v) => Some(transport.bulk_expose(v.clone())?),
        None => None,
    };
    let req = UpdateRequest {
        ns: ns.id(),
        class_id,
        key: key.to_vec(),
        root,
        origin,
        sync,
        value_bulk: bulk,
    };
    node.metrics().inc_update_out();
    debug!(
        ns = %ns.id(),
        class_id,
        to = next,
        root,
        invalidate = value.is_none(),
        "forwarding update"
    );

    let result = transport.send_update(next, req).await;
    if let Some(handle) = &bulk {
        transport.bulk_free(handle);
    }
    Ok(result?.rc)
}

/// Serve an update arriving from a child.
pub(crate) async fn handle_update(node: &IvNode, req: UpdateRequest) -> UpdateReply {
    node.metrics().inc_update_in();
    debug!(ns = %req.ns, origin = req.origin, "inbound update");
    let rc = match serve_update(node, &req).await {
        Ok(rc) => rc,
        Err(err) => {
            warn!(ns = %req.ns, error = %err, "update service failed");
            err.code()
        }
    };
    UpdateReply { rc }
}

async fn serve_update(node: &IvNode, req: &UpdateRequest) -> IvResult<ErrorCode> {
    let ns = node.registry().lookup(req.ns)?;
    let class = ns.class(req.class_id)?;

    let root = class.root_rank(&req.key, ns.group())?;
    if root != req.root {
        return Err(IvError::invalid(format!(
            "root disagreement: sender says {}, local placement says {}",
            req.root, root
        )));
    }

    let value = match &req.value_bulk {
        Some(handle) => Some(node.transport().bulk_take(handle).await?),
        None => None,
    };
    // Intermediates always walk the tree; the shortcut is an
    // originator-only decision. The origin keeps naming the rank that
    // started the update, however many hops it has taken.
    apply_or_forward(
        node,
        &ns,
        req.class_id,
        &req.key,
        value,
        req.origin,
        ShortcutPolicy::None,
        req.sync,
    )
    .await
}
