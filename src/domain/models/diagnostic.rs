//! Structured diagnostics extracted from failed-test text.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Broad class of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    CompileError,
    RuntimeError,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompileError => "compile_error",
            Self::RuntimeError => "runtime_error",
        }
    }
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `file:line:col` source position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

/// One normalized diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub code: Option<String>,
    pub primary: Option<Location>,
    pub message: String,
    /// Human-facing snippet shown to the agent.
    pub rendered: String,
    pub cluster_key: String,
}

/// Diagnostics sharing one cluster key across an evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticCluster {
    pub key: String,
    pub kind: DiagnosticKind,
    pub count: usize,
    pub suites: BTreeSet<String>,
    /// Example test ids, first-seen order, capped.
    pub sample_tests: Vec<String>,
}
