//! Object-storage persistence for trace snapshots.
//!
//! One parquet object per trajectory, overwritten on every save:
//!
//! ```text
//! {prefix}/trajectories/{trajectory_id}/trace.parquet
//! {prefix}/trajectories/{trajectory_id}/{artifact}
//! ```
//!
//! Backends come from `object_store`: S3 (and compatibles), the local
//! filesystem, and an in-memory store for tests.

pub mod error;
pub mod naming;
pub mod object_store_backend;

use std::path::Path;

pub use error::{StoreError, StoreResult};
pub use naming::KeyBuilder;
pub use object_store_backend::ObjectStoreTraceStore;

/// Parsed store location from config or the command line.
///
/// ```text
/// s3://my-bucket/rollout/runs?region=eu-west-1
/// file:///var/lib/rollout
/// memory://
/// .rollout/store            (plain directory, relative to the cwd)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    /// The scheme (s3, file, memory)
    pub scheme: String,
    /// Bucket name for s3
    pub bucket: Option<String>,
    /// Base prefix within the bucket, or the directory for file stores
    pub prefix: String,
    /// Optional region (for S3)
    pub region: Option<String>,
}

impl StoreSpec {
    /// Parse a store URL or plain directory path.
    pub fn parse(spec: &str) -> StoreResult<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(StoreError::InvalidSpec {
                spec: spec.to_string(),
                reason: "store location is empty".to_string(),
            });
        }

        if !trimmed.contains("://") {
            return Self::from_directory(Path::new(trimmed), spec);
        }

        let url = url::Url::parse(trimmed).map_err(|e| StoreError::InvalidSpec {
            spec: spec.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = url.scheme().to_string();
        match scheme.as_str() {
            "memory" | "file" | "s3" => {}
            other => {
                return Err(StoreError::InvalidSpec {
                    spec: spec.to_string(),
                    reason: format!("unsupported scheme: {other}"),
                })
            }
        }

        let bucket = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(ToString::to_string);
        let prefix = url.path().trim_start_matches('/').to_string();
        let region = url
            .query_pairs()
            .find(|(k, _)| k == "region")
            .map(|(_, v)| v.to_string());

        if scheme == "s3" && bucket.is_none() {
            return Err(StoreError::InvalidSpec {
                spec: spec.to_string(),
                reason: "S3 URL must include bucket name".to_string(),
            });
        }

        Ok(Self {
            scheme,
            bucket,
            prefix,
            region,
        })
    }

    fn from_directory(dir: &Path, spec: &str) -> StoreResult<Self> {
        let absolute = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| StoreError::InvalidSpec {
                    spec: spec.to_string(),
                    reason: format!("cannot resolve relative path: {e}"),
                })?
                .join(dir)
        };
        Ok(Self {
            scheme: "file".to_string(),
            bucket: None,
            prefix: absolute
                .to_string_lossy()
                .trim_start_matches('/')
                .to_string(),
            region: None,
        })
    }

    /// Check if this is a local file store.
    pub fn is_file(&self) -> bool {
        self.scheme == "file"
    }
}
