//! Trace model: the append-only record of one trajectory.
//!
//! A [`Trace`] is owned by the session runner for the lifetime of a
//! trajectory. Parts and turns are only ever appended; the evaluation map is
//! derived from the eval events carried by parts and is rebuilt on resume.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::test_outcome::TestOutcome;
use crate::services::evaluation_state::EvaluationReducer;

// ---------------------------------------------------------------------------
// EvalStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of an asynchronous evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvalStatus {
    /// Requested, result not yet available.
    #[default]
    Pending,
    /// The test run finished (tests may still have failed).
    Completed,
    /// The evaluation itself could not be carried out.
    Failed,
}

impl EvalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further update is expected for this evaluation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for EvalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pass counts for a single suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SuiteResult {
    pub passed: u32,
    pub total: u32,
}

// ---------------------------------------------------------------------------
// EvalEvent
// ---------------------------------------------------------------------------

/// One asynchronous evaluation request or update.
///
/// Count fields are optional so that a partial update (for example an
/// advisor comment attached after completion) does not erase earlier
/// counts. Fields an environment adds ad hoc land in `extra` and are folded
/// into the record's `payload` by the reducer, never promoted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalEvent {
    pub eval_id: String,
    #[serde(default = "default_eval_kind")]
    pub kind: String,
    pub target_commit: String,
    pub trigger_part: u32,
    pub trigger_turn: u32,
    #[serde(default)]
    pub status: EvalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite_results: Option<BTreeMap<String, SuiteResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<Vec<TestOutcome>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_eval_kind() -> String {
    "commit_async".to_string()
}

impl EvalEvent {
    /// A fresh pending request for `target_commit`.
    pub fn pending(
        eval_id: impl Into<String>,
        target_commit: impl Into<String>,
        trigger_part: u32,
        trigger_turn: u32,
    ) -> Self {
        Self {
            eval_id: eval_id.into(),
            kind: default_eval_kind(),
            target_commit: target_commit.into(),
            trigger_part,
            trigger_turn,
            status: EvalStatus::Pending,
            passed: None,
            failed: None,
            total: None,
            suite_results: None,
            tests: None,
            payload: Map::new(),
            error: None,
            extra: Map::new(),
        }
    }

    /// Derive a follow-up event for the same request with a new status.
    pub fn update(&self, status: EvalStatus) -> Self {
        Self {
            status,
            passed: None,
            failed: None,
            total: None,
            suite_results: None,
            tests: None,
            payload: Map::new(),
            error: None,
            extra: Map::new(),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// EvaluationRecord
// ---------------------------------------------------------------------------

/// Reduced view of every event seen for one commit.
///
/// Only the canonical fields live at the top level; everything else an event
/// carried is nested in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EvaluationRecord {
    pub part: u32,
    pub status: EvalStatus,
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    pub suite_results: BTreeMap<String, SuiteResult>,
    pub tests: Vec<TestOutcome>,
    pub error: Option<String>,
    pub payload: Map<String, Value>,
}

impl EvaluationRecord {
    /// Names of the top-level fields a record may carry.
    pub const CANONICAL_FIELDS: [&'static str; 9] = [
        "part",
        "status",
        "passed",
        "failed",
        "total",
        "suite_results",
        "tests",
        "error",
        "payload",
    ];

    pub fn is_canonical(field: &str) -> bool {
        Self::CANONICAL_FIELDS.contains(&field)
    }

    /// The record as a payload object suitable for diagnostics enrichment
    /// and feedback selection: the payload map plus the `tests` list.
    pub fn feedback_payload(&self) -> Map<String, Value> {
        let mut payload = self.payload.clone();
        payload.insert(
            "tests".to_string(),
            serde_json::to_value(&self.tests).unwrap_or(Value::Array(Vec::new())),
        );
        payload
    }
}

// ---------------------------------------------------------------------------
// Part / Turn / SessionEnd
// ---------------------------------------------------------------------------

/// One increment of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub part: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub eval_events_delta: Vec<EvalEvent>,
}

impl Part {
    pub fn new(part: u32) -> Self {
        Self {
            part,
            timestamp: Utc::now(),
            eval_events_delta: Vec::new(),
        }
    }
}

/// One agent turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub turn: u32,
    pub part: u32,
    pub timestamp: DateTime<Utc>,
    /// Agent backend that produced the turn.
    pub agent: String,
    /// Short human-readable summary of what the agent did.
    pub summary: String,
    #[serde(default)]
    pub git_commit: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

/// Why and when a session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnd {
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Session-level context persisted alongside a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TraceContext {
    pub environment: String,
    #[serde(default)]
    pub task_params: Map<String, Value>,
    #[serde(default)]
    pub suites: Vec<String>,
    #[serde(default)]
    pub bundle_uri: Option<String>,
}

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

/// The full append-only history of one trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub trajectory_id: String,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub evaluations: BTreeMap<String, EvaluationRecord>,
    #[serde(default)]
    pub session_end: Option<SessionEnd>,
}

impl Trace {
    pub fn new(trajectory_id: impl Into<String>) -> Self {
        Self {
            trajectory_id: trajectory_id.into(),
            parts: Vec::new(),
            turns: Vec::new(),
            evaluations: BTreeMap::new(),
            session_end: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty() && self.turns.is_empty()
    }

    /// Number the next part should carry.
    pub fn next_part_number(&self) -> u32 {
        self.parts.last().map_or(1, |p| p.part + 1)
    }

    /// Number the next turn should carry.
    pub fn next_turn_number(&self) -> u32 {
        self.turns.last().map_or(1, |t| t.turn + 1)
    }

    /// Append a closed part and fold its eval events into `evaluations`.
    pub fn append_part(&mut self, part: Part) {
        let mut reducer = EvaluationReducer::from_records(std::mem::take(&mut self.evaluations));
        reducer.apply_part(&part);
        self.evaluations = reducer.into_records();
        self.parts.push(part);
    }

    pub fn append_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Recompute `evaluations` from the persisted part history.
    pub fn rebuild_evaluations(&mut self) {
        self.evaluations =
            crate::services::evaluation_state::build_evaluations_from_parts(&self.parts);
    }

    pub fn end(&mut self, reason: impl Into<String>) {
        self.session_end = Some(SessionEnd {
            reason: reason.into(),
            timestamp: Utc::now(),
        });
    }
}
