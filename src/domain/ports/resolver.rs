//! Task resolver port - the plugin contract for environment-defined setup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::errors::DomainResult;
use crate::domain::models::SandboxRequest;

/// Concrete task derived from a parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolvedTask {
    pub prompt: String,
    #[serde(default)]
    pub sandbox: SandboxRequest,
    #[serde(default)]
    pub suites: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Entry point every resolver plugin implements.
///
/// Failures are configuration errors and are never ignored.
#[async_trait]
pub trait TaskResolver: Send + Sync {
    fn name(&self) -> &str;

    async fn resolve(&self, task_params: &Map<String, Value>) -> DomainResult<ResolvedTask>;
}
