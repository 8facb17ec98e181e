//! Namespace identity and lifecycle: create, attach, destroy, lookup.
//!
//! A namespace binds a tree topology and an ordered set of value classes to
//! a group-unique identity. The creating rank mints the identity; other
//! ranks attach by descriptor, supplying their own class implementations in
//! the same order. Engines hold namespaces as `Arc` handles, so a destroy
//! removes the registry entry immediately while in-flight operations finish
//! on their own handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{IvError, IvResult};
use crate::ns::class::ValueClass;
use crate::ns::inflight::InflightTable;
use crate::topo::{GroupView, Rank, TopologyKind};

/// Group-unique namespace identity: the minting rank plus a per-rank
/// sequence number. Two ranks can mint concurrently without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceId {
    pub origin: Rank,
    pub seq: u32,
}

impl std::fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.origin, self.seq)
    }
}

/// Everything a remote rank needs to attach to an existing namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDescriptor {
    pub id: NamespaceId,
    pub topology: TopologyKind,
    pub class_count: u32,
}

/// One attached namespace on the local rank.
pub struct Namespace {
    id: NamespaceId,
    topology: TopologyKind,
    group: GroupView,
    classes: Vec<Arc<dyn ValueClass>>,
    inflight: InflightTable,
}

impl Namespace {
    pub fn id(&self) -> NamespaceId {
        self.id
    }

    pub fn topology(&self) -> TopologyKind {
        self.topology
    }

    pub fn group(&self) -> &GroupView {
        &self.group
    }

    pub fn inflight(&self) -> &InflightTable {
        &self.inflight
    }

    /// The descriptor remote ranks attach with.
    pub fn descriptor(&self) -> NamespaceDescriptor {
        NamespaceDescriptor {
            id: self.id,
            topology: self.topology,
            class_count: self.classes.len() as u32,
        }
    }

    /// Number of direct children the local rank has in the tree rooted at
    /// `root`. Classes that pre-size aggregation buffers ask this before a
    /// fetch fans back out.
    pub fn children_count(&self, root: Rank) -> IvResult<u32> {
        self.topology
            .children_count(&self.group, root, self.group.self_rank)
    }

    /// Look up a value class by its registration index.
    pub fn class(&self, class_id: u32) -> IvResult<Arc<dyn ValueClass>> {
        self.classes
            .get(class_id as usize)
            .cloned()
            .ok_or_else(|| {
                IvError::invalid(format!(
                    "class {} out of range for namespace {} ({} classes)",
                    class_id,
                    self.id,
                    self.classes.len()
                ))
            })
    }

    pub fn class_count(&self) -> u32 {
        self.classes.len() as u32
    }
}

/// Per-rank table of attached namespaces.
pub struct NamespaceRegistry {
    group: GroupView,
    namespaces: Mutex<HashMap<NamespaceId, Arc<Namespace>>>,
    next_seq: AtomicU32,
}

impl NamespaceRegistry {
    pub fn new(group: GroupView) -> Self {
        Self {
            group,
            namespaces: Mutex::new(HashMap::new()),
            next_seq: AtomicU32::new(0),
        }
    }

    pub fn group(&self) -> &GroupView {
        &self.group
    }

    /// Mint a new namespace on this rank.
    pub fn create(
        &self,
        topology: TopologyKind,
        classes: Vec<Arc<dyn ValueClass>>,
    ) -> IvResult<Arc<Namespace>> {
        if classes.is_empty() {
            return Err(IvError::invalid("namespace requires at least one class"));
        }

        let id = NamespaceId {
            origin: self.group.self_rank,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let ns = Arc::new(Namespace {
            id,
            topology,
            group: self.group,
            classes,
            inflight: InflightTable::new(),
        });

        self.namespaces.lock().insert(id, Arc::clone(&ns));
        debug!(ns = %id, ?topology, "namespace created");
        Ok(ns)
    }

    /// Attach to a namespace minted elsewhere.
    ///
    /// The supplied classes must match the descriptor's class count; class
    /// indices are positional and must line up across the group.
    pub fn attach(
        &self,
        descriptor: &NamespaceDescriptor,
        classes: Vec<Arc<dyn ValueClass>>,
    ) -> IvResult<Arc<Namespace>> {
        if classes.len() as u32 != descriptor.class_count {
            return Err(IvError::invalid(format!(
                "descriptor declares {} classes, {} supplied",
                descriptor.class_count,
                classes.len()
            )));
        }

        let mut namespaces = self.namespaces.lock();
        if namespaces.contains_key(&descriptor.id) {
            return Err(IvError::invalid(format!(
                "namespace {} already attached",
                descriptor.id
            )));
        }

        let ns = Arc::new(Namespace {
            id: descriptor.id,
            topology: descriptor.topology,
            group: self.group,
            classes,
            inflight: InflightTable::new(),
        });
        namespaces.insert(descriptor.id, Arc::clone(&ns));
        debug!(ns = %descriptor.id, "namespace attached");
        Ok(ns)
    }

    /// Detach the namespace from this rank.
    ///
    /// Existing `Arc<Namespace>` handles stay valid; only new lookups fail.
    pub fn destroy(&self, id: NamespaceId) -> IvResult<()> {
        match self.namespaces.lock().remove(&id) {
            Some(_) => {
                debug!(ns = %id, "namespace destroyed");
                Ok(())
            }
            None => Err(IvError::not_found(format!("namespace {}", id))),
        }
    }

    pub fn lookup(&self, id: NamespaceId) -> IvResult<Arc<Namespace>> {
        self.namespaces
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| IvError::not_found(format!("namespace {}", id)))
    }

    pub fn len(&self) -> usize {
        self.namespaces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.lock().is_empty()
    }
}
