//! Infrastructure layer module
//!
//! Adapters that satisfy the domain ports, plus the ambient plumbing:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Trace encoding (rows + parquet) and object-storage persistence
//! - Local-process sandbox provider
//! - Subprocess task-resolver plugins

pub mod config;
pub mod logging;
pub mod plugins;
pub mod sandbox;
pub mod trace_codec;
pub mod trace_store;

pub use config::{ConfigError, ConfigLoader};
pub use logging::{LogConfig, LoggerImpl};
pub use sandbox::LocalProvider;
pub use trace_store::{ObjectStoreTraceStore, StoreSpec};
