//! Sandbox provider implementations.

pub mod local;

pub use local::{HostLimits, LocalProcessSandbox, LocalProvider, CPU_FLOOR};
