//! Operations and observability.

pub mod metrics;
