//! Sandbox request, resolution and command types.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum resources and features a task asks of a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SandboxRequest {
    /// Minimum CPU cores.
    #[serde(default)]
    pub cpu: Option<f64>,
    /// Minimum memory in MiB.
    #[serde(default)]
    pub memory_mb: Option<u64>,
    /// Minimum scratch disk in MiB.
    #[serde(default)]
    pub disk_mb: Option<u64>,
    #[serde(default)]
    pub gpu: Option<u32>,
    /// Network policy, e.g. `"none"` or `"egress"`.
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    /// Session lifetime ceiling in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Concrete values a provider will apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedSandboxConfig {
    pub cpu: f64,
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub timeout_secs: u64,
    pub image: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// Features a provider supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxCapabilities {
    pub streaming: bool,
    pub file_transfer: bool,
    pub gpu: bool,
    pub network_isolation: bool,
}

/// Outcome of resolving a [`SandboxRequest`] against one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSandboxConfig {
    pub provider: String,
    pub applied_config: AppliedSandboxConfig,
    pub capabilities: SandboxCapabilities,
    pub warnings: Vec<String>,
    pub ignored_fields: Vec<String>,
}

/// A command to run inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Shell command line, run through `sh -c`.
    pub cmd: String,
    pub timeout: Duration,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(cmd: impl Into<String>, timeout: Duration) -> Self {
        Self {
            cmd: cmd.into(),
            timeout,
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
