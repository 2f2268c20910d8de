//! Feedback selection: which failed tests the agent sees next turn.
//!
//! The suite-family priority is an explicit value threaded through every
//! call, so concurrent trajectories with different priorities never
//! interfere.

use std::collections::HashSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::models::{FeedbackConfig, TestOutcome};
use crate::services::diagnostics::PayloadEnricher;

/// Appended to a block cut at the size bound.
pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// Ordered suite-family prefixes whose failures are deduplicated by test id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackPriority(Vec<String>);

impl FeedbackPriority {
    pub fn new<I, S>(families: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(families.into_iter().map(Into::into).collect())
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn families(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, family: &str) -> bool {
        self.0.iter().any(|f| f == family)
    }

    /// `"prioritized: a,b"`, or `"prioritized: none"` when empty.
    pub fn header(&self) -> String {
        if self.0.is_empty() {
            "prioritized: none".to_string()
        } else {
            format!("prioritized: {}", self.0.join(","))
        }
    }
}

/// Failed tests from `payload["tests"]`, in payload order.
///
/// Entries that are not well-formed test outcomes are skipped.
pub fn failed_tests(payload: &Map<String, Value>) -> Vec<TestOutcome> {
    let Some(Value::Array(tests)) = payload.get("tests") else {
        return Vec::new();
    };
    tests
        .iter()
        .filter_map(|raw| match serde_json::from_value::<TestOutcome>(raw.clone()) {
            Ok(test) => Some(test),
            Err(e) => {
                debug!(error = %e, "skipping malformed test entry");
                None
            }
        })
        .filter(TestOutcome::is_failed)
        .collect()
}

/// Choose at most `limit` failed tests to surface.
///
/// Within prioritized families a `test_id` is surfaced once, however many
/// prioritized suites repeat it. Tests from other families are never
/// deduplicated. Relative payload order is preserved.
pub fn select_failed_tests_for_feedback(
    payload: &Map<String, Value>,
    limit: usize,
    priority: &FeedbackPriority,
) -> Vec<TestOutcome> {
    let mut seen_prioritized: HashSet<String> = HashSet::new();
    failed_tests(payload)
        .into_iter()
        .filter(|test| {
            if priority.contains(test.family()) {
                seen_prioritized.insert(test.test_id.clone())
            } else {
                true
            }
        })
        .take(limit)
        .collect()
}

/// Render the feedback section for the next prompt.
///
/// Returns the text and the tests it shows.
pub fn build_failed_tests_feedback_section(
    payload: &Map<String, Value>,
    limit: usize,
    priority: &FeedbackPriority,
) -> (String, Vec<TestOutcome>) {
    FeedbackBuilder {
        priority: priority.clone(),
        limit,
        ..FeedbackBuilder::default()
    }
    .build(payload)
}

/// Feedback rendering with a per-block size bound.
///
/// Derived diagnostic fields are recomputed on a copy of the payload before
/// selection, so raw evaluator output renders the same as enriched output.
#[derive(Debug, Clone)]
pub struct FeedbackBuilder {
    pub priority: FeedbackPriority,
    pub limit: usize,
    pub max_block_chars: usize,
    enricher: PayloadEnricher,
}

impl Default for FeedbackBuilder {
    fn default() -> Self {
        Self::from_config(&FeedbackConfig::default())
    }
}

impl FeedbackBuilder {
    pub fn from_config(config: &FeedbackConfig) -> Self {
        Self {
            priority: FeedbackPriority::new(config.priority.iter().cloned()),
            limit: config.limit,
            max_block_chars: config.max_block_chars,
            enricher: PayloadEnricher::default(),
        }
    }

    /// Use `enricher` (configured markers and sample cap) instead of the defaults.
    #[must_use]
    pub fn with_enricher(mut self, enricher: PayloadEnricher) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn build(&self, payload: &Map<String, Value>) -> (String, Vec<TestOutcome>) {
        let mut payload = payload.clone();
        self.enricher.enrich(&mut payload);
        let payload = &payload;

        let total_failed = failed_tests(payload).len();
        let selected = select_failed_tests_for_feedback(payload, self.limit, &self.priority);

        let mut text = self.priority.header();
        for test in &selected {
            let body = test
                .rendered_diagnostic
                .as_deref()
                .filter(|r| !r.trim().is_empty())
                .or_else(|| Some(test.message.as_str()).filter(|m| !m.trim().is_empty()))
                .or_else(|| Some(test.stderr_tail.as_str()).filter(|s| !s.trim().is_empty()))
                .unwrap_or("(no output)");
            let _ = write!(
                text,
                "\n\n[{}] {}\n{}",
                test.suite,
                test.test_id,
                truncate_chars(body.trim_end(), self.max_block_chars)
            );
        }

        let omitted = total_failed.saturating_sub(selected.len());
        if omitted > 0 {
            let _ = write!(text, "\n\n({omitted} more failed tests not shown)");
        }
        (text, selected)
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..byte_idx]),
        None => text.to_string(),
    }
}
