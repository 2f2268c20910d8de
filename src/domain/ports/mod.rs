//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that infrastructure adapters must implement:
//! - Sandbox / SandboxProvider: isolated command execution
//! - AgentBackend: one agent turn
//! - Evaluator: test-suite runs against a commit
//! - TraceStore: snapshot persistence for resume
//! - TaskResolver: environment-defined task setup

pub mod agent;
pub mod evaluator;
pub mod resolver;
pub mod sandbox;
pub mod trace_store;

pub use agent::{AgentBackend, TurnOutcome, TurnRequest};
pub use evaluator::{EvalOutcome, EvalRequest, Evaluator};
pub use resolver::{ResolvedTask, TaskResolver};
pub use sandbox::{LineCallback, OutputCallbacks, Sandbox, SandboxProvider};
pub use trace_store::{SaveOutcome, TraceStore};
