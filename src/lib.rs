//! Incast - tree-propagated incast variable cache over group RPC.
//!
//! An incast variable (IV) is a named value whose authoritative copy is owned
//! by exactly one member of a process group (the "root" rank, selected by a
//! deterministic hash of the key) and cached on the other members. Fetches
//! flow *toward* the root along a tree topology; updates and invalidations
//! flow away from it as a post-apply broadcast. Neither direction ever needs
//! all-to-all communication.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Caller API                            │
//! │      fetch(key)  │  update(key, value)  │  invalidate(key)   │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Protocol Engines                         │
//! │  Fetch (toward root) │ Update/Invalidate │ Sync broadcast    │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//! ┌──────────────────────────────────────────────────────────────┐
//! │        Namespaces │ Value Classes │ In-flight Keys           │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//! ┌──────────────────────────────────────────────────────────────┐
//! │       Transport: RPC │ Collective Broadcast │ Bulk           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Error taxonomy and wire code mapping
//!
//! ## Namespace
//! - [`ns::registry`] - Namespace identity, create/attach/destroy/lookup
//! - [`ns::class`] - Value-class capability set consumed by the engines
//! - [`ns::inflight`] - Per-key in-flight request deduplication
//! - [`ns::store`] - In-memory value class for the simulator and tests
//!
//! ## Protocol
//! - [`proto::fetch`] - Fetch engine (local attempt, forward, replay)
//! - [`proto::update`] - Update/invalidate engine
//! - [`proto::sync`] - Post-update sync broadcast engine
//! - [`proto::wire`] - Request/reply message shapes
//!
//! ## Infrastructure
//! - [`topo`] - Tree topology parent/child resolution
//! - [`transport`] - Transport traits and the in-process cluster
//! - [`node`] - Per-rank runtime wiring engines to the transport
//! - [`ops::metrics`] - Protocol counters
//!
//! # Key Invariants
//!
//! - **SINGLE-FLIGHT**: at most one remote fetch or update-forward per
//!   (namespace, key) is outstanding from a given node
//! - **PAIRED-CHECKOUT**: every value checkout is released exactly once
//! - **STABLE-ROOT**: `root_rank(key)` is constant for a stable membership
//! - **ONE-COMPLETION**: every caller observes exactly one completion per
//!   operation, carrying either a value or an error

// Core infrastructure
pub mod core;

// Tree topology and group view
pub mod topo;

// Namespace, value classes, in-flight tracking
pub mod ns;

// Protocol engines and wire shapes
pub mod proto;

// Transport seam and in-process cluster
pub mod transport;

// Per-rank runtime
pub mod node;

// Operations and observability
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error};
pub use ns::{class, inflight, registry, store};
pub use ops::metrics;
pub use proto::{fetch, sync, update, wire};
