//! CLI command implementations.

pub mod preview;
pub mod sync;
