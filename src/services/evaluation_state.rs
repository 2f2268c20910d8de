//! Evaluation state machine.
//!
//! Reduces the eval events recorded in a trace's parts into one
//! [`EvaluationRecord`] per target commit. The same reducer serves the live
//! session (one part at a time) and resume (one pass over the persisted
//! history); both must end in the same map.
//!
//! Reduction rules per event, applied in part order then list order:
//!
//! - `status` and `error` are overwritten.
//! - `passed`, `failed`, `total`, `suite_results`, `tests` are overwritten
//!   when the event carries them.
//! - `part` becomes the number of the part holding the event.
//! - The event's own `payload` is shallow-merged into the record's payload.
//! - Every non-canonical event field (`eval_id`, `kind`, `target_commit`,
//!   `trigger_part`, `trigger_turn` and anything ad hoc) is shallow-merged
//!   into the payload as well. Later events win per key.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::domain::models::{EvalEvent, EvaluationRecord, Part};

/// Incremental reducer over eval events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReducer {
    records: BTreeMap<String, EvaluationRecord>,
}

impl EvaluationReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue reducing on top of an existing map.
    pub fn from_records(records: BTreeMap<String, EvaluationRecord>) -> Self {
        Self { records }
    }

    pub fn apply_part(&mut self, part: &Part) {
        for event in &part.eval_events_delta {
            self.apply_event(part.part, event);
        }
    }

    pub fn apply_event(&mut self, part: u32, event: &EvalEvent) {
        let record = self.records.entry(event.target_commit.clone()).or_default();

        record.part = part;
        record.status = event.status;
        record.error.clone_from(&event.error);
        if let Some(passed) = event.passed {
            record.passed = passed;
        }
        if let Some(failed) = event.failed {
            record.failed = failed;
        }
        if let Some(total) = event.total {
            record.total = total;
        }
        if let Some(suite_results) = &event.suite_results {
            record.suite_results.clone_from(suite_results);
        }
        if let Some(tests) = &event.tests {
            record.tests.clone_from(tests);
        }

        merge_shallow(&mut record.payload, &event.payload);
        merge_shallow(&mut record.payload, &non_canonical_fields(event));
    }

    pub fn records(&self) -> &BTreeMap<String, EvaluationRecord> {
        &self.records
    }

    pub fn into_records(self) -> BTreeMap<String, EvaluationRecord> {
        self.records
    }
}

/// Rebuild the evaluation view from a full part history.
///
/// Parts are processed by ascending `part` number (stable for equal
/// numbers), events within a part in list order.
pub fn build_evaluations_from_parts(parts: &[Part]) -> BTreeMap<String, EvaluationRecord> {
    let mut ordered: Vec<&Part> = parts.iter().collect();
    ordered.sort_by_key(|p| p.part);

    let mut reducer = EvaluationReducer::new();
    for part in ordered {
        reducer.apply_part(part);
    }
    reducer.into_records()
}

/// Event fields that have no top-level slot on a record.
fn non_canonical_fields(event: &EvalEvent) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("eval_id".into(), Value::String(event.eval_id.clone()));
    fields.insert("kind".into(), Value::String(event.kind.clone()));
    fields.insert("target_commit".into(), Value::String(event.target_commit.clone()));
    fields.insert("trigger_part".into(), Value::from(event.trigger_part));
    fields.insert("trigger_turn".into(), Value::from(event.trigger_turn));
    for (key, value) in &event.extra {
        // `part` is taken from the containing part, never from the event.
        if EvaluationRecord::is_canonical(key) {
            continue;
        }
        fields.insert(key.clone(), value.clone());
    }
    fields
}

fn merge_shallow(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}
