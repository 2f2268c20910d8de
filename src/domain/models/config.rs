use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration structure for Rollout
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Trace storage configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Session control-loop limits
    #[serde(default)]
    pub session: SessionConfig,

    /// Feedback selection and rendering
    #[serde(default)]
    pub feedback: FeedbackConfig,

    /// Diagnostics extraction and clustering
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation for file logs: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Trace storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// Store location: `memory://`, `file:///abs/path`, `s3://bucket/prefix`
    /// or a plain local directory
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Object name of the trace snapshot under each trajectory
    #[serde(default = "default_trace_filename")]
    pub trace_filename: String,

    /// Upper bound on retrying a transient write failure, in milliseconds
    #[serde(default = "default_max_retry_ms")]
    pub max_retry_ms: u64,
}

fn default_store_url() -> String {
    ".rollout/store".to_string()
}

fn default_trace_filename() -> String {
    "trace.parquet".to_string()
}

const fn default_max_retry_ms() -> u64 {
    10_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            trace_filename: default_trace_filename(),
            max_retry_ms: default_max_retry_ms(),
        }
    }
}

/// Session control-loop limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Maximum agent turns per trajectory
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Request an evaluation every N turns that produced a commit (0 disables)
    #[serde(default = "default_eval_every_turns")]
    pub eval_every_turns: u32,

    /// Per-turn timeout in seconds
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,

    /// Whole-session timeout in seconds
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// Budget for waiting on in-flight evaluations at shutdown, in seconds
    #[serde(default = "default_eval_drain_timeout_secs")]
    pub eval_drain_timeout_secs: u64,

    /// Budget for the final trace save, in seconds
    #[serde(default = "default_final_save_timeout_secs")]
    pub final_save_timeout_secs: u64,
}

const fn default_max_turns() -> u32 {
    20
}

const fn default_eval_every_turns() -> u32 {
    1
}

const fn default_turn_timeout_secs() -> u64 {
    1800
}

const fn default_session_timeout_secs() -> u64 {
    4 * 3600
}

const fn default_eval_drain_timeout_secs() -> u64 {
    60
}

const fn default_final_save_timeout_secs() -> u64 {
    30
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            eval_every_turns: default_eval_every_turns(),
            turn_timeout_secs: default_turn_timeout_secs(),
            session_timeout_secs: default_session_timeout_secs(),
            eval_drain_timeout_secs: default_eval_drain_timeout_secs(),
            final_save_timeout_secs: default_final_save_timeout_secs(),
        }
    }
}

/// Feedback selection and rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FeedbackConfig {
    /// Suite-family prefixes whose failures are deduplicated by test id
    #[serde(default)]
    pub priority: Vec<String>,

    /// Maximum failed tests surfaced per feedback section
    #[serde(default = "default_feedback_limit")]
    pub limit: usize,

    /// Maximum characters per rendered test block
    #[serde(default = "default_max_block_chars")]
    pub max_block_chars: usize,
}

const fn default_feedback_limit() -> usize {
    5
}

const fn default_max_block_chars() -> usize {
    2000
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            priority: Vec::new(),
            limit: default_feedback_limit(),
            max_block_chars: default_max_block_chars(),
        }
    }
}

/// Diagnostics extraction and clustering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DiagnosticsConfig {
    /// Example test ids kept per cluster
    #[serde(default = "default_sample_cap")]
    pub cluster_sample_cap: usize,

    /// Substrings that classify an unlocated message as a compile error
    #[serde(default = "default_compile_markers")]
    pub compile_markers: Vec<String>,
}

const fn default_sample_cap() -> usize {
    5
}

/// Markers used when no located diagnostic could be parsed.
pub fn default_compile_markers() -> Vec<String> {
    [
        "error:",
        "syntax error",
        "expected",
        "undeclared",
        "undefined reference",
        "cannot find",
        "mismatched types",
        "compilation failed",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            cluster_sample_cap: default_sample_cap(),
            compile_markers: default_compile_markers(),
        }
    }
}
