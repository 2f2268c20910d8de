//! Key-based grouping of diagnostics and evaluation payload enrichment.

use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value};
use tracing::debug;

use super::extractor::DiagnosticExtractor;
use crate::domain::models::{Diagnostic, DiagnosticCluster};

/// Default number of example test ids kept per cluster.
pub const DEFAULT_SAMPLE_CAP: usize = 5;

/// Separator between diagnostics rendered for the same test.
const RENDER_SEPARATOR: &str = "\n\n";

/// One diagnostic attributed to the test it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticOccurrence {
    pub suite: String,
    pub test_id: String,
    pub diagnostic: Diagnostic,
}

/// Group occurrences by cluster key.
///
/// Clusters are ordered by descending count; equal counts keep the order in
/// which their key was first seen. `sample_tests` holds distinct test ids in
/// first-seen order, at most `sample_cap` of them.
pub fn cluster(occurrences: &[DiagnosticOccurrence], sample_cap: usize) -> Vec<DiagnosticCluster> {
    let mut clusters: Vec<DiagnosticCluster> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for occurrence in occurrences {
        let key = occurrence.diagnostic.cluster_key.as_str();
        let slot = *index.entry(key).or_insert_with(|| {
            clusters.push(DiagnosticCluster {
                key: key.to_string(),
                kind: occurrence.diagnostic.kind,
                count: 0,
                suites: BTreeSet::new(),
                sample_tests: Vec::new(),
            });
            clusters.len() - 1
        });

        let entry = &mut clusters[slot];
        entry.count += 1;
        entry.suites.insert(occurrence.suite.clone());
        if entry.sample_tests.len() < sample_cap && !entry.sample_tests.contains(&occurrence.test_id) {
            entry.sample_tests.push(occurrence.test_id.clone());
        }
    }

    // `sort_by` is stable, so ties stay in first-seen order.
    clusters.sort_by(|a, b| b.count.cmp(&a.count));
    clusters
}

/// Recompute derived diagnostic fields on an evaluation payload.
///
/// For every failed entry of `payload["tests"]` this sets
/// `rendered_diagnostic` and `cluster_key` (or removes them when nothing
/// could be extracted), then replaces `payload["diagnostic_clusters"]`.
/// Entries that are not objects, or whose status is not `"failed"`, are left
/// untouched. Running it again on its own output changes nothing.
pub fn enrich_evaluation_payload(payload: &mut Map<String, Value>) {
    PayloadEnricher::default().enrich(payload);
}

/// [`enrich_evaluation_payload`] with an explicit extractor and sample cap.
#[derive(Debug, Clone)]
pub struct PayloadEnricher {
    extractor: DiagnosticExtractor,
    sample_cap: usize,
}

impl Default for PayloadEnricher {
    fn default() -> Self {
        Self {
            extractor: DiagnosticExtractor::default(),
            sample_cap: DEFAULT_SAMPLE_CAP,
        }
    }
}

impl PayloadEnricher {
    pub fn new(extractor: DiagnosticExtractor, sample_cap: usize) -> Self {
        Self { extractor, sample_cap }
    }

    pub fn enrich(&self, payload: &mut Map<String, Value>) {
        let mut occurrences = Vec::new();

        if let Some(Value::Array(tests)) = payload.get_mut("tests") {
            for test in tests.iter_mut().filter_map(Value::as_object_mut) {
                if str_field(test, "status") != "failed" {
                    continue;
                }

                let diagnostics = self.extractor.extract_text(
                    str_field(test, "message"),
                    str_field(test, "stderr_tail"),
                    test.get("source").and_then(Value::as_str),
                );

                match diagnostics.first() {
                    Some(first) => {
                        let rendered = diagnostics
                            .iter()
                            .map(|d| d.rendered.as_str())
                            .collect::<Vec<_>>()
                            .join(RENDER_SEPARATOR);
                        test.insert("cluster_key".into(), Value::String(first.cluster_key.clone()));
                        test.insert("rendered_diagnostic".into(), Value::String(rendered));
                    }
                    None => {
                        test.remove("cluster_key");
                        test.remove("rendered_diagnostic");
                    }
                }

                let suite = str_field(test, "suite").to_string();
                let test_id = str_field(test, "test_id").to_string();
                occurrences.extend(diagnostics.into_iter().map(|diagnostic| DiagnosticOccurrence {
                    suite: suite.clone(),
                    test_id: test_id.clone(),
                    diagnostic,
                }));
            }
        }

        let clusters = cluster(&occurrences, self.sample_cap);
        debug!(
            diagnostics = occurrences.len(),
            clusters = clusters.len(),
            "enriched evaluation payload"
        );
        payload.insert(
            "diagnostic_clusters".into(),
            serde_json::to_value(&clusters).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
    }
}

fn str_field<'a>(object: &'a Map<String, Value>, key: &str) -> &'a str {
    object.get(key).and_then(Value::as_str).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DiagnosticKind;
    use serde_json::json;

    fn occurrence(suite: &str, test_id: &str, key: &str) -> DiagnosticOccurrence {
        DiagnosticOccurrence {
            suite: suite.into(),
            test_id: test_id.into(),
            diagnostic: Diagnostic {
                kind: DiagnosticKind::CompileError,
                code: None,
                primary: None,
                message: key.into(),
                rendered: key.into(),
                cluster_key: key.into(),
            },
        }
    }

    #[test]
    fn clusters_order_by_count_then_first_seen() {
        let occurrences = vec![
            occurrence("a", "t1", "k1"),
            occurrence("a", "t2", "k2"),
            occurrence("b", "t3", "k3"),
            occurrence("b", "t4", "k2"),
            occurrence("c", "t5", "k3"),
        ];
        let clusters = cluster(&occurrences, DEFAULT_SAMPLE_CAP);
        let keys: Vec<&str> = clusters.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["k2", "k3", "k1"]);
        assert_eq!(clusters[0].count, 2);
        assert_eq!(clusters[0].suites, BTreeSet::from(["a".to_string(), "b".to_string()]));
        assert_eq!(clusters[0].sample_tests, vec!["t2", "t4"]);
    }

    #[test]
    fn sample_tests_are_capped_and_distinct() {
        let occurrences: Vec<_> = (0..8)
            .map(|i| occurrence("s", &format!("t{}", i % 6), "k"))
            .collect();
        let clusters = cluster(&occurrences, 5);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].count, 8);
        assert_eq!(clusters[0].sample_tests, vec!["t0", "t1", "t2", "t3", "t4"]);
    }

    fn sample_payload() -> Map<String, Value> {
        json!({
            "tests": [
                {"suite": "basics/c", "test_id": "t1", "status": "failed",
                 "message": "tmp/test.c:7:3: error: expected ';'"},
                {"suite": "basics/c", "test_id": "t2", "status": "failed",
                 "message": "tmp/other.c:2:9: error: expected ')'"},
                {"suite": "basics/c", "test_id": "t3", "status": "passed", "message": ""},
                {"suite": "extra", "test_id": "t4", "status": "failed", "message": ""},
                "not an object"
            ],
            "advisor": "keep going"
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn enrich_sets_derived_fields_and_clusters() {
        let mut payload = sample_payload();
        enrich_evaluation_payload(&mut payload);

        let tests = payload["tests"].as_array().unwrap();
        assert_eq!(tests[0]["cluster_key"], json!("compile_error|-|expected <q>"));
        assert_eq!(tests[1]["cluster_key"], tests[0]["cluster_key"]);
        assert!(tests[0]["rendered_diagnostic"].as_str().unwrap().contains("expected ';'"));
        assert!(tests[2].get("cluster_key").is_none());
        assert!(tests[3].get("rendered_diagnostic").is_none());
        assert_eq!(payload["advisor"], json!("keep going"));

        let clusters = payload["diagnostic_clusters"].as_array().unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0]["count"], json!(2));
        assert_eq!(clusters[0]["sample_tests"], json!(["t1", "t2"]));
    }

    #[test]
    fn enrich_is_idempotent() {
        let mut once = sample_payload();
        enrich_evaluation_payload(&mut once);
        let mut twice = once.clone();
        enrich_evaluation_payload(&mut twice);
        assert_eq!(once, twice);
        assert_eq!(once["diagnostic_clusters"], twice["diagnostic_clusters"]);
    }

    #[test]
    fn enrich_without_tests_attaches_empty_clusters() {
        let mut payload = Map::new();
        enrich_evaluation_payload(&mut payload);
        assert_eq!(payload["diagnostic_clusters"], json!([]));
    }
}
