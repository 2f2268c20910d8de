use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::errors::DomainError;
use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Store url cannot be empty")]
    EmptyStoreUrl,

    #[error("Invalid trace filename: {0:?}. Must be a non-empty name without '/'")]
    InvalidTraceFilename(String),

    #[error("Invalid max_turns: {0}. Must be at least 1")]
    InvalidMaxTurns(u32),

    #[error("Invalid {0}: must be at least 1 second")]
    InvalidTimeout(&'static str),

    #[error("Invalid feedback limit: {0}. Must be at least 1")]
    InvalidFeedbackLimit(usize),

    #[error("Invalid max_block_chars: {0}. Must be at least 80")]
    InvalidBlockChars(usize),

    #[error("Invalid cluster_sample_cap: {0}. Must be at least 1")]
    InvalidSampleCap(usize),

    #[error("Resolver plugin error: {0}")]
    Plugin(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ConfigError> for DomainError {
    fn from(err: ConfigError) -> Self {
        DomainError::Configuration(err.to_string())
    }
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging from the working
    /// directory
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .rollout/config.yaml (project config)
    /// 3. .rollout/local.yaml (local overrides, optional)
    /// 4. Environment variables (ROLLOUT_* prefix, `__` nests)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(Path::new("."))
    }

    /// [`ConfigLoader::load`] rooted at `root` instead of the working
    /// directory.
    pub fn load_from_dir(root: &Path) -> Result<Config> {
        let project = root.join(".rollout");
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(project.join("config.yaml")))
            .merge(Yaml::file(project.join("local.yaml")))
            .merge(Env::prefixed("ROLLOUT_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.store.url.trim().is_empty() {
            return Err(ConfigError::EmptyStoreUrl);
        }

        let filename = &config.store.trace_filename;
        if filename.trim().is_empty() || filename.contains('/') {
            return Err(ConfigError::InvalidTraceFilename(filename.clone()));
        }

        let session = &config.session;
        if session.max_turns == 0 {
            return Err(ConfigError::InvalidMaxTurns(session.max_turns));
        }
        for (name, secs) in [
            ("turn_timeout_secs", session.turn_timeout_secs),
            ("session_timeout_secs", session.session_timeout_secs),
            ("final_save_timeout_secs", session.final_save_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::InvalidTimeout(name));
            }
        }

        if config.feedback.limit == 0 {
            return Err(ConfigError::InvalidFeedbackLimit(config.feedback.limit));
        }
        if config.feedback.max_block_chars < 80 {
            return Err(ConfigError::InvalidBlockChars(config.feedback.max_block_chars));
        }
        if config.feedback.priority.iter().any(|p| p.trim().is_empty() || p.contains('/')) {
            return Err(ConfigError::ValidationFailed(
                "feedback priority entries must be suite family names".to_string(),
            ));
        }

        if config.diagnostics.cluster_sample_cap == 0 {
            return Err(ConfigError::InvalidSampleCap(config.diagnostics.cluster_sample_cap));
        }
        if config.diagnostics.compile_markers.iter().any(|m| m.is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "compile markers cannot be empty strings".to_string(),
            ));
        }

        Ok(())
    }
}
