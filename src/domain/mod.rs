//! Domain layer for the Rollout session core
//!
//! Models, port traits and the error taxonomy. Nothing in here performs I/O.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
