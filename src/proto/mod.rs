//! Protocol engines and wire message shapes.

pub mod fetch;
pub mod sync;
pub mod update;
pub mod wire;
