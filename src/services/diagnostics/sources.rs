//! Post-hoc attachment of test input programs.
//!
//! Events carry test outcomes without their source text; the environment
//! keeps one copy per test here and it is attached only where it is needed
//! (diagnostic rendering and feedback).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::domain::models::TestOutcome;
use crate::domain::{DomainError, DomainResult};

/// Source text keyed by `(suite, test_id)`.
#[derive(Debug, Clone, Default)]
pub struct TestSourceIndex {
    sources: HashMap<(String, String), String>,
}

impl TestSourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, suite: impl Into<String>, test_id: impl Into<String>, source: impl Into<String>) {
        self.sources.insert((suite.into(), test_id.into()), source.into());
    }

    pub fn get(&self, suite: &str, test_id: &str) -> Option<&str> {
        self.sources
            .get(&(suite.to_string(), test_id.to_string()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Index a directory laid out as `<suite path>/<test_id>.<ext>`.
    ///
    /// The suite is the file's parent directory relative to `root`, joined
    /// with `/`; the test id is the file stem. Hidden entries are skipped.
    pub fn from_dir(root: &Path) -> DomainResult<Self> {
        let mut index = Self::new();
        index.scan(root, root)?;
        Ok(index)
    }

    fn scan(&mut self, root: &Path, dir: &Path) -> DomainResult<()> {
        let entries = fs::read_dir(dir).map_err(|e| {
            DomainError::Configuration(format!("cannot read test sources in {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| DomainError::Configuration(e.to_string()))?;
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden {
                continue;
            }

            if path.is_dir() {
                self.scan(root, &path)?;
                continue;
            }

            let Some(test_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let suite = path
                .parent()
                .and_then(|p| p.strip_prefix(root).ok())
                .map(|rel| {
                    rel.components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/")
                })
                .unwrap_or_default();
            let source = fs::read_to_string(&path).map_err(|e| {
                DomainError::Configuration(format!("cannot read test source {}: {e}", path.display()))
            })?;
            self.insert(suite, test_id, source);
        }
        Ok(())
    }
}

/// Fill `source` on payload test entries that lack it.
///
/// Returns how many entries were filled.
pub fn attach_test_sources(payload: &mut Map<String, Value>, index: &TestSourceIndex) -> usize {
    let Some(Value::Array(tests)) = payload.get_mut("tests") else {
        return 0;
    };

    let mut attached = 0;
    for test in tests.iter_mut().filter_map(Value::as_object_mut) {
        if test.get("source").is_some_and(|s| !s.is_null()) {
            continue;
        }
        let suite = test.get("suite").and_then(Value::as_str).unwrap_or_default();
        let test_id = test.get("test_id").and_then(Value::as_str).unwrap_or_default();
        if let Some(source) = index.get(suite, test_id) {
            let source = Value::String(source.to_string());
            test.insert("source".into(), source);
            attached += 1;
        }
    }
    attached
}

/// Typed counterpart of [`attach_test_sources`].
pub fn attach_sources_to_outcomes(tests: &mut [TestOutcome], index: &TestSourceIndex) -> usize {
    let mut attached = 0;
    for test in tests.iter_mut().filter(|t| t.source.is_none()) {
        if let Some(source) = index.get(&test.suite, &test.test_id) {
            test.source = Some(source.to_string());
            attached += 1;
        }
    }
    attached
}
