//! CLI command implementations.

pub mod feedback;
pub mod plan;
pub mod trace;
