//! Error types for trace encoding and decoding.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while turning traces into rows or rows into files.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The file's columns do not match the row schema.
    #[error("schema mismatch: {0}")]
    Schema(String),

    /// A row could not be interpreted.
    #[error("invalid row seq={seq}: {reason}")]
    Row { seq: i64, reason: String },

    /// No rows to rebuild a trace from.
    #[error("no rows")]
    Empty,

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    pub(crate) fn row(seq: i64, reason: impl Into<String>) -> Self {
        Self::Row {
            seq,
            reason: reason.into(),
        }
    }
}
