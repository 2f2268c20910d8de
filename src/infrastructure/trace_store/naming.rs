//! Key naming conventions for trace storage.
//!
//! ```text
//! {base_prefix}/trajectories/{trajectory_id}/{filename}
//! ```
//!
//! One object per `(trajectory_id, filename)`; saving again overwrites it.
//! Segments are percent-encoded by [`PathPart`], so distinct ids always map
//! to distinct keys (`run/1` becomes `run%2F1`, `run_1` stays as is).

use object_store::path::{Path, PathPart};

use super::error::{StoreError, StoreResult};

/// Builder for storage keys.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    /// Base prefix (e.g., "rollout/runs")
    base: Path,
}

impl KeyBuilder {
    /// Create a new key builder with the given base prefix.
    pub fn new(base_prefix: impl AsRef<str>) -> Self {
        let base = base_prefix
            .as_ref()
            .split('/')
            .filter(|part| !part.is_empty())
            .collect::<Path>();
        Self { base }
    }

    /// Key for one object of a trajectory.
    ///
    /// Returns: `{base}/trajectories/{trajectory_id}/{filename}`
    pub fn object_key(&self, trajectory_id: &str, filename: &str) -> StoreResult<Path> {
        Ok(self
            .base
            .child("trajectories")
            .child(Self::segment(trajectory_id)?)
            .child(Self::segment(filename)?))
    }

    /// Encode one user-supplied segment; empty names have no valid encoding.
    fn segment(raw: &str) -> StoreResult<PathPart<'_>> {
        if raw.is_empty() {
            return Err(StoreError::InvalidKey {
                segment: raw.to_string(),
                reason: "empty path segment".to_string(),
            });
        }
        Ok(PathPart::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        let kb = KeyBuilder::new("");
        assert_eq!(
            kb.object_key("traj-1", "trace.parquet").unwrap().as_ref(),
            "trajectories/traj-1/trace.parquet"
        );
    }

    #[test]
    fn test_object_key_with_prefix() {
        let kb = KeyBuilder::new("/rollout/runs/");
        assert_eq!(
            kb.object_key("traj-1", "repo.bundle").unwrap().as_ref(),
            "rollout/runs/trajectories/traj-1/repo.bundle"
        );
    }

    #[test]
    fn test_escapes_separators_and_dot_segments() {
        let kb = KeyBuilder::new("");
        let key = kb.object_key("a/b", "..").unwrap();
        assert_eq!(key.as_ref(), "trajectories/a%2Fb/%2E%2E");
        assert_eq!(key.parts().count(), 3);
    }

    #[test]
    fn test_similar_ids_get_distinct_keys() {
        let kb = KeyBuilder::new("");
        let ids = ["run/1", "run_1", "run%2F1", "run 1", "run:1"];
        let keys: std::collections::HashSet<String> = ids
            .iter()
            .map(|id| kb.object_key(id, "trace.parquet").unwrap().to_string())
            .collect();
        assert_eq!(keys.len(), ids.len());
    }

    #[test]
    fn test_rejects_empty_segments() {
        let kb = KeyBuilder::new("");
        assert!(matches!(
            kb.object_key("", "trace.parquet"),
            Err(StoreError::InvalidKey { .. })
        ));
        assert!(kb.object_key("traj", "").is_err());
    }
}
