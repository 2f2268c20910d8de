//! Domain errors for the Rollout session core.

use thiserror::Error;

/// Domain-level errors that can occur while driving a session.
///
/// Evaluation failures reported by an environment are not errors: they are
/// recorded as `EvalEvent`s with `status = failed`. `Evaluation` here means
/// the evaluator could not be invoked at all.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Agent turn failed: {0}")]
    Agent(String),

    #[error("Evaluation could not be run: {0}")]
    Evaluation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Operation timed out after {0}s")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
