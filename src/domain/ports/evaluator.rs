//! Evaluator port - runs the environment's test suites against a commit.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::errors::DomainResult;
use crate::domain::models::{SuiteResult, TestOutcome};

/// A request to evaluate one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalRequest {
    pub trajectory_id: String,
    pub eval_id: String,
    pub commit: String,
}

/// Raw results of a finished test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EvalOutcome {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    pub suite_results: BTreeMap<String, SuiteResult>,
    pub tests: Vec<TestOutcome>,
    /// Environment-specific extras.
    pub payload: Map<String, Value>,
    /// Set when the run itself broke (harness crash, missing build).
    pub error: Option<String>,
}

/// Trait for environment test harnesses.
///
/// Called from a background task, so implementations own what they need.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, request: EvalRequest) -> DomainResult<EvalOutcome>;
}
