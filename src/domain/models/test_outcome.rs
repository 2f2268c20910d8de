//! Per-test outcomes reported by an evaluation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status of a single test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
}

/// Outcome of one test in one suite.
///
/// `source` is attached after the fact from the environment's test-source
/// index. `rendered_diagnostic` and `cluster_key` are derived by the
/// diagnostics enrichment pass and recomputed on every run of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub suite: String,
    pub test_id: String,
    pub status: TestStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stderr_tail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_key: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TestOutcome {
    pub fn new(suite: impl Into<String>, test_id: impl Into<String>, status: TestStatus) -> Self {
        Self {
            suite: suite.into(),
            test_id: test_id.into(),
            status,
            message: String::new(),
            stderr_tail: String::new(),
            source: None,
            rendered_diagnostic: None,
            cluster_key: None,
            extra: Map::new(),
        }
    }

    pub fn failed(suite: impl Into<String>, test_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::new(suite, test_id, TestStatus::Failed)
        }
    }

    #[must_use]
    pub fn with_stderr(mut self, stderr_tail: impl Into<String>) -> Self {
        self.stderr_tail = stderr_tail.into();
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// First slash-separated segment of the suite name.
    pub fn family(&self) -> &str {
        suite_family(&self.suite)
    }

    pub fn is_failed(&self) -> bool {
        self.status == TestStatus::Failed
    }
}

/// First slash-separated segment of a suite path (`"basics/arith"` -> `"basics"`).
pub fn suite_family(suite: &str) -> &str {
    suite.split('/').next().unwrap_or(suite)
}
