//! Fetch engine: satisfy locally, or pull the value down the tree.
//!
//! A fetch tries the local value class first. If the class is not
//! authoritative and holds no copy, the request forwards one hop toward the
//! key's root (or straight to it, under the shortcut policy), with the
//! in-flight table collapsing concurrent fetches for the same key into a
//! single wire round trip. Woken waiters replay the local attempt, which
//! normally hits the value the owner's fetch just installed.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::error::{ErrorCode, IvError, IvResult};
use crate::node::IvNode;
use crate::ns::class::{ClassOutcome, FetchPhase, Permission, ValueClass};
use crate::ns::inflight::MarkOutcome;
use crate::ns::registry::Namespace;
use crate::proto::wire::{FetchReply, FetchRequest, ShortcutPolicy};
use crate::topo::Rank;

/// Fetch the value for `key`, forwarding toward its root as needed.
pub async fn fetch(
    node: &IvNode,
    ns: &Arc<Namespace>,
    class_id: u32,
    key: &[u8],
    shortcut: ShortcutPolicy,
) -> IvResult<Bytes> {
    let class = ns.class(class_id)?;
    let group = *ns.group();
    let root = class.root_rank(key, &group)?;
    if root >= group.size {
        return Err(IvError::invalid(format!(
            "class placed key at rank {} outside group of size {}",
            root, group.size
        )));
    }

    let mut phase = FetchPhase::Initial;
    loop {
        let mut slot = class.checkout(key, 0, Permission::Read)?;
        match class.attempt_fetch(key, 0, phase, &mut slot) {
            Ok(ClassOutcome::Done) => {
                let value = slot.data.clone().freeze();
                class.release(slot);
                class.apply_refresh(key, 0, Some(&value), false, ErrorCode::Ok)?;
                return Ok(value);
            }
            Err(err) => {
                // Let the class observe the failed conclusion before the
                // caller sees it.
                let _ = class.apply_refresh(key, 0, None, false, err.code());
                class.release(slot);
                return Err(err);
            }
            Ok(ClassOutcome::Forward) => {
                class.release(slot);
            }
        }

        if group.self_rank == root {
            return Err(IvError::invalid(
                "authoritative rank asked to forward a fetch",
            ));
        }

        match ns.inflight().mark(class_id, class.as_ref(), key) {
            MarkOutcome::Waiter(rx) => {
                node.metrics().inc_inflight_wait();
                let rc = rx.await.map_err(|_| IvError::Canceled)?;
                rc.into_result()?;
                // The owner's fetch installed fresh state; try again.
                phase = FetchPhase::Replay;
            }
            MarkOutcome::Owner => {
                let result = fetch_remote(node, ns, &class, class_id, key, root, shortcut).await;
                let rc = ErrorCode::from_result(&result);
                ns.inflight().complete(class_id, class.as_ref(), key, rc);
                return result;
            }
        }
    }
}

/// Issue the single remote fetch for a key this rank now owns the flight of.
async fn fetch_remote(
    node: &IvNode,
    ns: &Arc<Namespace>,
    class: &Arc<dyn ValueClass>,
    class_id: u32,
    key: &[u8],
    root: Rank,
    shortcut: ShortcutPolicy,
) -> IvResult<Bytes> {
    let group = ns.group();
    let next: Rank = match shortcut {
        ShortcutPolicy::ToRoot => root,
        ShortcutPolicy::None => ns.topology().parent(group, root, group.self_rank)?,
    };

    let mut slot = class.checkout(key, 0, Permission::Write)?;
    let transport = node.transport();
    let sink = match transport.bulk_expose_sink() {
        Ok(sink) => sink,
        Err(err) => {
            class.release(slot);
            return Err(err);
        }
    };

    let req = FetchRequest {
        ns: ns.id(),
        class_id,
        key: key.to_vec(),
        root,
        value_bulk: sink,
    };
    node.metrics().inc_fetch_out();
    debug!(ns = %ns.id(), class_id, to = next, root, "forwarding fetch");

    let pulled = async {
        let reply = transport.send_fetch(next, req).await?;
        reply.rc.into_result()?;
        transport.bulk_take(&sink).await
    }
    .await;
    transport.bulk_free(&sink);

    match pulled {
        Ok(value) => {
            slot.data.clear();
            slot.data.extend_from_slice(&value);
            class.release(slot);
            class.apply_refresh(key, 0, Some(&value), false, ErrorCode::Ok)?;
            Ok(value)
        }
        Err(err) => {
            class.release(slot);
            let _ = class.apply_refresh(key, 0, None, false, err.code());
            Err(err)
        }
    }
}

/// Serve a fetch arriving from a child: resolve it here (recursing up the
/// tree when this rank cannot), then push the bytes into the child's sink.
pub(crate) async fn handle_fetch(node: &IvNode, req: FetchRequest) -> FetchReply {
    node.metrics().inc_fetch_in();
    let rc = match serve_fetch(node, &req).await {
        Ok(()) => ErrorCode::Ok,
        Err(err) => {
            warn!(ns = %req.ns, error = %err, "fetch service failed");
            err.code()
        }
    };
    FetchReply { rc }
}

async fn serve_fetch(node: &IvNode, req: &FetchRequest) -> IvResult<()> {
    let ns = node.registry().lookup(req.ns)?;
    let class = ns.class(req.class_id)?;

    let root = class.root_rank(&req.key, ns.group())?;
    if root != req.root {
        return Err(IvError::invalid(format!(
            "root disagreement: sender says {}, local placement says {}",
            req.root, root
        )));
    }

    // Intermediates always walk the tree; the shortcut is an
    // originator-only decision.
    let value = fetch(node, &ns, req.class_id, &req.key, ShortcutPolicy::None).await?;
    node.transport().bulk_put(&req.value_bulk, value).await?;
    Ok(())
}
