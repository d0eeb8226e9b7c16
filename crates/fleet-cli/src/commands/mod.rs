//! CLI command implementations.

pub mod artifacts;
pub mod bucket;
pub mod charts;
pub mod lock;
