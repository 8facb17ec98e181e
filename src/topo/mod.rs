//! Tree topology parent/child resolution.
//!
//! Forwarding routes requests one hop toward the key's root rank along a
//! spanning tree rooted at that rank. The tree is defined over rank numbers
//! rotated so that the root sits at relative position zero; any rank can
//! therefore be the root of its own tree without renumbering the group.

use serde::{Deserialize, Serialize};

use crate::core::error::{IvError, IvResult};

/// A member's position within the process group.
pub type Rank = u32;

/// Tree shape used for forwarding and sync propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyKind {
    /// Every non-root rank is a direct child of the root.
    Flat,
    /// K-ary tree with the given branch factor.
    Kary { branch: u32 },
}

/// Cached view of the group a namespace is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupView {
    /// Number of ranks in the group.
    pub size: u32,
    /// The local rank.
    pub self_rank: Rank,
}

impl GroupView {
    /// Create a group view, validating the local rank is a member.
    pub fn new(size: u32, self_rank: Rank) -> IvResult<Self> {
        if size == 0 {
            return Err(IvError::invalid("group size must be > 0"));
        }
        if self_rank >= size {
            return Err(IvError::invalid(format!(
                "self rank {} outside group of size {}",
                self_rank, size
            )));
        }
        Ok(Self { size, self_rank })
    }
}

impl TopologyKind {
    /// The parent of `rank` in the tree rooted at `root`.
    ///
    /// Asking for the parent of the root itself is an invariant violation in
    /// the forwarding path and is reported as an error rather than looping.
    pub fn parent(&self, group: &GroupView, root: Rank, rank: Rank) -> IvResult<Rank> {
        if root >= group.size || rank >= group.size {
            return Err(IvError::invalid("rank outside group"));
        }
        if rank == root {
            return Err(IvError::invalid("root rank has no parent"));
        }

        let rel = relative(rank, root, group.size);
        let parent_rel = match self {
            Self::Flat => 0,
            Self::Kary { branch } => {
                if *branch == 0 {
                    return Err(IvError::invalid("branch factor must be > 0"));
                }
                (rel - 1) / branch
            }
        };

        Ok(absolute(parent_rel, root, group.size))
    }

    /// Children of `rank` in the tree rooted at `root`.
    pub fn children(&self, group: &GroupView, root: Rank, rank: Rank) -> IvResult<Vec<Rank>> {
        if root >= group.size || rank >= group.size {
            return Err(IvError::invalid("rank outside group"));
        }

        let rel = relative(rank, root, group.size);
        let kids = match self {
            Self::Flat => {
                if rel == 0 {
                    (1..group.size).collect()
                } else {
                    Vec::new()
                }
            }
            Self::Kary { branch } => {
                let first = rel
                    .checked_mul(*branch)
                    .and_then(|v| v.checked_add(1))
                    .unwrap_or(group.size);
                (first..group.size.min(first.saturating_add(*branch))).collect()
            }
        };

        Ok(kids.into_iter().map(|r| absolute(r, root, group.size)).collect())
    }

    /// Number of direct children `rank` has in the tree rooted at `root`.
    pub fn children_count(&self, group: &GroupView, root: Rank, rank: Rank) -> IvResult<u32> {
        Ok(self.children(group, root, rank)?.len() as u32)
    }
}

/// Rotate `rank` into the coordinate system where `root` is zero.
fn relative(rank: Rank, root: Rank, size: u32) -> u32 {
    (rank + size - root) % size
}

/// Rotate a relative position back to an absolute rank.
fn absolute(rel: u32, root: Rank, size: u32) -> Rank {
    (rel + root) % size
}
