//! Namespaces, value classes, and in-flight key tracking.

pub mod class;
pub mod inflight;
pub mod registry;
pub mod store;
