//! Trace store port - durable snapshots for crash resume.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Trace, TraceContext};

/// What a save call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Snapshot written under `key`.
    Written { key: String },
    /// Nothing to write: empty trace and not forced.
    SkippedEmpty,
}

/// Repository interface for trace snapshots.
///
/// One snapshot per trajectory; repeated saves overwrite it.
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Persist `trace`. Skips an empty trace unless `force` is set.
    async fn save(&self, trace: &Trace, context: &TraceContext, force: bool) -> DomainResult<SaveOutcome>;

    /// Latest snapshot for `trajectory_id`.
    ///
    /// Never fails: a missing, unreadable or invalid snapshot is logged and
    /// reported as `None`.
    async fn load_snapshot(&self, trajectory_id: &str) -> Option<Trace>;

    /// Store a raw artifact next to the trace and return its URI.
    async fn put_artifact(&self, trajectory_id: &str, filename: &str, bytes: Bytes) -> DomainResult<String>;
}
