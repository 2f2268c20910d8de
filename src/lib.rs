//! Rollout - multi-turn coding-agent session core
//!
//! Drives an agent through repeated turns inside a sandbox, requests test
//! evaluations of its commits asynchronously, turns compiler and test output
//! into structured diagnostics and targeted feedback, and persists a
//! crash-resumable trace of everything that happened.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, port traits and the error taxonomy
//! - **Service Layer** (`services`): Evaluation state, diagnostics, feedback,
//!   param-space sampling and the session control loop
//! - **Infrastructure Layer** (`infrastructure`): Config, logging, trace
//!   codec and store, sandbox provider, resolver plugins
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use rollout::services::{SessionPorts, SessionRunner};
//!
//! let runner = SessionRunner::new("traj-1", prompt, context, ports, &config);
//! let report = runner.run(cancel_rx).await;
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    Config, Diagnostic, DiagnosticCluster, DiagnosticKind, EvalEvent, EvalStatus, EvaluationRecord,
    Part, Trace, TraceContext, TestOutcome, Turn,
};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{SessionRunner, SessionReport};
