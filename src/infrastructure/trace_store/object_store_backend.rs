//! Object store implementation of [`TraceStore`].
//!
//! Supports S3 (and S3-compatible services), the local filesystem and an
//! in-memory backend via the `object_store` crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tokio::sync::Mutex;

use super::{KeyBuilder, StoreError, StoreResult, StoreSpec};
use crate::domain::errors::DomainResult;
use crate::domain::models::{StoreConfig, Trace, TraceContext};
use crate::domain::ports::{SaveOutcome, TraceStore};
use crate::infrastructure::trace_codec::{agent_trace_to_rows, read_rows, rows_to_trace, write_rows, TraceRow};

const DEFAULT_TRACE_FILENAME: &str = "trace.parquet";
const DEFAULT_MAX_RETRY: Duration = Duration::from_secs(10);

/// Trace store backed by `object_store`.
pub struct ObjectStoreTraceStore {
    inner: Arc<dyn ObjectStore>,
    keys: KeyBuilder,
    trace_filename: String,
    /// Scheme and root used to render artifact URIs.
    uri_base: String,
    /// Last key saved per trajectory; only decides whether to log.
    last_saved: Mutex<HashMap<String, String>>,
    max_retry: Duration,
}

impl ObjectStoreTraceStore {
    fn with_backend(inner: Arc<dyn ObjectStore>, keys: KeyBuilder, uri_base: String) -> Self {
        Self {
            inner,
            keys,
            trace_filename: DEFAULT_TRACE_FILENAME.to_string(),
            uri_base,
            last_saved: Mutex::new(HashMap::new()),
            max_retry: DEFAULT_MAX_RETRY,
        }
    }

    /// Create a store from a parsed spec.
    pub fn from_spec(spec: &StoreSpec) -> StoreResult<Self> {
        match spec.scheme.as_str() {
            "memory" => Ok(Self::with_backend(
                Arc::new(object_store::memory::InMemory::new()),
                KeyBuilder::new(&spec.prefix),
                "memory://".to_string(),
            )),
            "file" => {
                let path = match &spec.bucket {
                    Some(host) => format!("/{}/{}", host, spec.prefix),
                    None => format!("/{}", spec.prefix),
                };
                std::fs::create_dir_all(&path).map_err(|e| StoreError::Io {
                    message: format!("failed to create store directory {path}: {e}"),
                })?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&path).map_err(|e| {
                    StoreError::Io {
                        message: format!("failed to create local store at {path}: {e}"),
                    }
                })?;
                Ok(Self::with_backend(
                    Arc::new(fs),
                    KeyBuilder::new(""),
                    format!("file://{}", path.trim_end_matches('/')),
                ))
            }
            "s3" => {
                let bucket = spec.bucket.as_ref().ok_or_else(|| StoreError::InvalidSpec {
                    spec: format!("s3:///{}", spec.prefix),
                    reason: "S3 URL must include bucket name".to_string(),
                })?;

                let mut builder = object_store::aws::AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .with_allow_http(false);
                if let Some(region) = &spec.region {
                    builder = builder.with_region(region);
                }

                let client = builder.build().map_err(|e| StoreError::Io {
                    message: format!("failed to create S3 client: {e}"),
                })?;
                Ok(Self::with_backend(
                    Arc::new(client),
                    KeyBuilder::new(&spec.prefix),
                    format!("s3://{bucket}"),
                ))
            }
            scheme => Err(StoreError::InvalidSpec {
                spec: spec.scheme.clone(),
                reason: format!("unsupported scheme: {scheme}"),
            }),
        }
    }

    /// Create a store from a URL string or directory path.
    pub fn from_url(url: &str) -> StoreResult<Self> {
        let spec = StoreSpec::parse(url)?;
        Self::from_spec(&spec)
    }

    /// Create a store from the `store` config section.
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        let mut store = Self::from_url(&config.url)?;
        store.trace_filename.clone_from(&config.trace_filename);
        store.max_retry = Duration::from_millis(config.max_retry_ms);
        Ok(store)
    }

    /// Create an in-memory store for testing.
    pub fn memory() -> Self {
        Self::with_backend(
            Arc::new(object_store::memory::InMemory::new()),
            KeyBuilder::new(""),
            "memory://".to_string(),
        )
    }

    /// Object key of the trace snapshot for `trajectory_id`.
    pub fn trace_key(&self, trajectory_id: &str) -> StoreResult<ObjectPath> {
        self.keys.object_key(trajectory_id, &self.trace_filename)
    }

    /// URI of an object key as seen from outside the store.
    pub fn uri_for(&self, key: &ObjectPath) -> String {
        if self.uri_base.ends_with("://") {
            format!("{}{}", self.uri_base, key.as_ref())
        } else {
            format!("{}/{}", self.uri_base.trim_end_matches('/'), key.as_ref())
        }
    }

    /// Write bytes to `key`, retrying transient failures.
    async fn put_with_retry(&self, key: &ObjectPath, bytes: Bytes) -> StoreResult<()> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.max_retry),
            ..ExponentialBackoff::default()
        };

        backoff::future::retry(policy, || {
            let payload = PutPayload::from(bytes.clone());
            async move {
                self.inner
                    .put(key, payload)
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        let err = StoreError::from_object_store(e, key.as_ref());
                        if err.is_transient() {
                            tracing::debug!(key = %key, error = %err, "transient put failure, retrying");
                            backoff::Error::transient(err)
                        } else {
                            backoff::Error::permanent(err)
                        }
                    })
            }
        })
        .await
    }

    async fn get_bytes(&self, key: &ObjectPath) -> StoreResult<Bytes> {
        let result = self
            .inner
            .get(key)
            .await
            .map_err(|e| StoreError::from_object_store(e, key.as_ref()))?;
        result
            .bytes()
            .await
            .map_err(|e| StoreError::from_object_store(e, key.as_ref()))
    }

    /// Raw rows of the stored snapshot.
    pub async fn load_rows(&self, trajectory_id: &str) -> StoreResult<Vec<TraceRow>> {
        let key = self.trace_key(trajectory_id)?;
        let bytes = self.get_bytes(&key).await?;
        Ok(read_rows(bytes)?)
    }

    /// Stored snapshot with its session context.
    ///
    /// Unlike [`TraceStore::load_snapshot`] this reports why loading failed.
    pub async fn load_with_context(&self, trajectory_id: &str) -> StoreResult<(Trace, TraceContext)> {
        let rows = self.load_rows(trajectory_id).await?;
        let (trace, context) = rows_to_trace(&rows)?;
        if trace.trajectory_id != trajectory_id {
            return Err(StoreError::Io {
                message: format!(
                    "snapshot at {} belongs to trajectory {}",
                    self.trace_key(trajectory_id)?,
                    trace.trajectory_id
                ),
            });
        }
        Ok((trace, context))
    }

    /// Record `key` as the latest save; returns true when it changed.
    async fn remember_key(&self, trajectory_id: &str, key: &str) -> bool {
        let mut memo = self.last_saved.lock().await;
        match memo.get(trajectory_id) {
            Some(previous) if previous == key => false,
            _ => {
                memo.insert(trajectory_id.to_string(), key.to_string());
                true
            }
        }
    }
}

#[async_trait]
impl TraceStore for ObjectStoreTraceStore {
    async fn save(&self, trace: &Trace, context: &TraceContext, force: bool) -> DomainResult<SaveOutcome> {
        if trace.is_empty() && !force {
            tracing::debug!(
                trajectory_id = %trace.trajectory_id,
                "skipping save of empty trace"
            );
            return Ok(SaveOutcome::SkippedEmpty);
        }

        let rows = agent_trace_to_rows(trace, context).map_err(StoreError::from)?;
        let bytes = write_rows(&rows).map_err(StoreError::from)?;
        let key = self.trace_key(&trace.trajectory_id)?;
        self.put_with_retry(&key, bytes).await?;

        if self.remember_key(&trace.trajectory_id, key.as_ref()).await {
            tracing::info!(
                trajectory_id = %trace.trajectory_id,
                key = %key,
                parts = trace.parts.len(),
                turns = trace.turns.len(),
                "saved trace"
            );
        }

        Ok(SaveOutcome::Written {
            key: key.to_string(),
        })
    }

    async fn load_snapshot(&self, trajectory_id: &str) -> Option<Trace> {
        match self.load_with_context(trajectory_id).await {
            Ok((trace, _)) => Some(trace),
            Err(err) if err.is_not_found() => {
                tracing::debug!(trajectory_id, "no prior snapshot");
                None
            }
            Err(err) => {
                tracing::warn!(
                    trajectory_id,
                    error = %err,
                    "could not load snapshot, starting fresh"
                );
                None
            }
        }
    }

    async fn put_artifact(&self, trajectory_id: &str, filename: &str, bytes: Bytes) -> DomainResult<String> {
        let key = self.keys.object_key(trajectory_id, filename)?;
        self.put_with_retry(&key, bytes).await?;
        let uri = self.uri_for(&key);
        tracing::info!(trajectory_id, uri = %uri, "uploaded artifact");
        Ok(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Part, Turn};
    use chrono::Utc;

    fn turn(n: u32, part: u32) -> Turn {
        Turn {
            turn: n,
            part,
            timestamp: Utc::now(),
            agent: "scripted".to_string(),
            summary: format!("turn {n}"),
            git_commit: Some(format!("c{n}")),
            session_id: None,
            fields: serde_json::Map::new(),
        }
    }

    fn sample_trace(id: &str) -> Trace {
        let mut trace = Trace::new(id);
        trace.append_turn(turn(1, 1));
        trace.append_part(Part::new(1));
        trace
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let store = ObjectStoreTraceStore::memory();
        let trace = sample_trace("traj-1");

        let outcome = store.save(&trace, &TraceContext::default(), false).await.unwrap();
        assert_eq!(
            outcome,
            SaveOutcome::Written {
                key: "trajectories/traj-1/trace.parquet".to_string()
            }
        );

        let loaded = store.load_snapshot("traj-1").await.unwrap();
        assert_eq!(loaded.trajectory_id, "traj-1");
        assert_eq!(loaded.turns.len(), 1);
        assert_eq!(loaded.parts.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_trace_skipped_unless_forced() {
        let store = ObjectStoreTraceStore::memory();
        store
            .save(&sample_trace("traj-1"), &TraceContext::default(), false)
            .await
            .unwrap();

        let empty = Trace::new("traj-1");
        let outcome = store.save(&empty, &TraceContext::default(), false).await.unwrap();
        assert_eq!(outcome, SaveOutcome::SkippedEmpty);

        // The earlier snapshot survives.
        let loaded = store.load_snapshot("traj-1").await.unwrap();
        assert_eq!(loaded.turns.len(), 1);

        let forced = store.save(&empty, &TraceContext::default(), true).await.unwrap();
        assert!(matches!(forced, SaveOutcome::Written { .. }));
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_none() {
        let store = ObjectStoreTraceStore::memory();
        assert!(store.load_snapshot("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_none() {
        let store = ObjectStoreTraceStore::memory();
        let key = store.trace_key("traj-bad").unwrap();
        store
            .inner
            .put(&key, PutPayload::from(Bytes::from_static(b"not parquet")))
            .await
            .unwrap();
        assert!(store.load_snapshot("traj-bad").await.is_none());
    }

    #[tokio::test]
    async fn test_remember_key_reports_changes_only() {
        let store = ObjectStoreTraceStore::memory();
        assert!(store.remember_key("t", "k1").await);
        assert!(!store.remember_key("t", "k1").await);
        assert!(store.remember_key("t", "k2").await);
        assert!(store.remember_key("other", "k2").await);
    }

    #[tokio::test]
    async fn test_put_artifact_returns_uri() {
        let store = ObjectStoreTraceStore::memory();
        let uri = store
            .put_artifact("traj-1", "repo.bundle", Bytes::from_static(b"bundle"))
            .await
            .unwrap();
        assert_eq!(uri, "memory://trajectories/traj-1/repo.bundle");
    }

    #[test]
    fn test_uri_for_joins_with_one_separator() {
        let key = ObjectPath::from("trajectories/t/trace.parquet");
        let s3 = ObjectStoreTraceStore::with_backend(
            Arc::new(object_store::memory::InMemory::new()),
            KeyBuilder::new(""),
            "s3://bucket/".to_string(),
        );
        assert_eq!(s3.uri_for(&key), "s3://bucket/trajectories/t/trace.parquet");
        assert_eq!(
            ObjectStoreTraceStore::memory().uri_for(&key),
            "memory://trajectories/t/trace.parquet"
        );
    }

    #[tokio::test]
    async fn test_ids_differing_only_in_separators_do_not_collide() {
        let store = ObjectStoreTraceStore::memory();
        let context = TraceContext::default();
        store.save(&sample_trace("run/1"), &context, false).await.unwrap();
        store.save(&sample_trace("run_1"), &context, false).await.unwrap();

        let (slash, _) = store.load_with_context("run/1").await.unwrap();
        let (underscore, _) = store.load_with_context("run_1").await.unwrap();
        assert_eq!(slash.trajectory_id, "run/1");
        assert_eq!(underscore.trajectory_id, "run_1");
        assert_ne!(
            store.trace_key("run/1").unwrap(),
            store.trace_key("run_1").unwrap()
        );
    }

    #[tokio::test]
    async fn test_empty_trajectory_id_is_rejected() {
        let store = ObjectStoreTraceStore::memory();
        let err = store.load_rows("").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());

        let store = ObjectStoreTraceStore::from_url(&url).unwrap();
        store
            .save(&sample_trace("traj-9"), &TraceContext::default(), false)
            .await
            .unwrap();

        let reopened = ObjectStoreTraceStore::from_url(&url).unwrap();
        let loaded = reopened.load_snapshot("traj-9").await.unwrap();
        assert_eq!(loaded.turns[0].git_commit.as_deref(), Some("c1"));
        assert!(dir
            .path()
            .join("trajectories/traj-9/trace.parquet")
            .exists());
    }

    #[tokio::test]
    async fn test_from_config_uses_trace_filename() {
        let config = StoreConfig {
            url: "memory://".to_string(),
            trace_filename: "snapshot.parquet".to_string(),
            max_retry_ms: 100,
        };
        let store = ObjectStoreTraceStore::from_config(&config).unwrap();
        assert_eq!(
            store.trace_key("a").unwrap().as_ref(),
            "trajectories/a/snapshot.parquet"
        );
    }
}
