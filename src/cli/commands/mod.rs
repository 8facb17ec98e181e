//! CLI command implementations.

mod config;
mod simulate;

pub use config::{run_config, ConfigArgs};
pub use simulate::{run_simulate, SimulateArgs};
