//! Agent backend port - the language-model side of a turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::sandbox::Sandbox;
use crate::domain::errors::DomainResult;

/// Input for one agent turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub trajectory_id: String,
    pub turn: u32,
    pub prompt: String,
    /// Rendered feedback from the latest completed evaluation, if any.
    pub feedback: Option<String>,
}

/// What the agent produced in one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TurnOutcome {
    pub summary: String,
    /// Commit holding the agent's work, when it submitted some.
    pub git_commit: Option<String>,
    pub session_id: Option<String>,
    /// The agent considers the task finished.
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Trait for agent backends that edit code inside a sandbox.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn run_turn(&self, sandbox: &dyn Sandbox, request: TurnRequest) -> DomainResult<TurnOutcome>;
}
