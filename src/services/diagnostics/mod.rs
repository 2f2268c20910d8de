//! Failed-test diagnostics: extraction, normalization, clustering.

pub mod cluster;
pub mod extractor;
pub mod normalize;
pub mod sources;

pub use cluster::{cluster, enrich_evaluation_payload, DiagnosticOccurrence, PayloadEnricher};
pub use extractor::{extract_test_diagnostics, DiagnosticExtractor, FallbackClassifier};
pub use normalize::{cluster_key, normalize_message};
pub use sources::{attach_sources_to_outcomes, attach_test_sources, TestSourceIndex};
