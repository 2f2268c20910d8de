//! Flattening a trace into fixed-schema rows and back.
//!
//! Row kinds, by `event`:
//!
//! | event           | component    | carries                                   |
//! |-----------------|--------------|-------------------------------------------|
//! | `session`       | `session`    | environment, task params, suites, bundle  |
//! | `turn`          | `agent`      | one [`Turn`]                              |
//! | `part`          | `session`    | one [`Part`] header                       |
//! | `eval_event`    | `evaluation` | one [`EvalEvent`] of the preceding part   |
//! | `evaluation`    | `evaluation` | reduced record, analytics only            |
//! | `session_end`   | `session`    | [`SessionEnd`]                            |
//!
//! Decoding skips `evaluation` rows (they are rebuilt from events) and any
//! event name it does not know, so new row kinds can be added freely.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::error::{CodecError, CodecResult};
use crate::domain::models::{
    EvalEvent, EvalStatus, Part, SessionEnd, Trace, TraceContext, Turn,
};

pub const EVENT_SESSION: &str = "session";
pub const EVENT_TURN: &str = "turn";
pub const EVENT_PART: &str = "part";
pub const EVENT_EVAL: &str = "eval_event";
pub const EVENT_EVALUATION: &str = "evaluation";
pub const EVENT_SESSION_END: &str = "session_end";

/// One row of the columnar trace file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRow {
    pub trajectory_id: String,
    /// 1-based position, assigned at serialization time.
    pub seq: i64,
    pub ts: String,
    pub component: String,
    pub event: String,
    pub level: String,
    pub message: String,
    pub turn: Option<i64>,
    pub part: Option<i64>,
    pub git_commit: Option<String>,
    pub session_id: Option<String>,
    pub source: Option<String>,
    /// JSON-encoded catch-all; `None` when there is nothing to carry.
    pub fields: Option<String>,
}

impl TraceRow {
    fn new(trajectory_id: &str, ts: &DateTime<Utc>, component: &str, event: &str) -> Self {
        Self {
            trajectory_id: trajectory_id.to_string(),
            seq: 0,
            ts: format_ts(ts),
            component: component.to_string(),
            event: event.to_string(),
            level: "info".to_string(),
            message: String::new(),
            turn: None,
            part: None,
            git_commit: None,
            session_id: None,
            source: None,
            fields: None,
        }
    }

    fn fields_map(&self) -> CodecResult<Map<String, Value>> {
        match &self.fields {
            None => Ok(Map::new()),
            Some(raw) => match serde_json::from_str(raw)? {
                Value::Object(map) => Ok(map),
                Value::Null => Ok(Map::new()),
                other => Err(CodecError::row(self.seq, format!("fields is not an object: {other}"))),
            },
        }
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_ts(row: &TraceRow) -> CodecResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&row.ts)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| CodecError::row(row.seq, format!("bad timestamp {:?}: {e}", row.ts)))
}

fn encode_fields(map: Map<String, Value>) -> CodecResult<Option<String>> {
    if map.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(&Value::Object(map))?))
    }
}

fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Flatten `trace` and its session context into rows, numbered from 1.
///
/// Turns are emitted ahead of the part they belong to, each part is
/// followed by its eval events.
pub fn agent_trace_to_rows(trace: &Trace, context: &TraceContext) -> CodecResult<Vec<TraceRow>> {
    let id = trace.trajectory_id.as_str();
    let started = trace
        .parts
        .first()
        .map(|p| p.timestamp)
        .or_else(|| trace.turns.first().map(|t| t.timestamp))
        .unwrap_or_else(Utc::now);

    let mut rows = Vec::new();

    let mut session = TraceRow::new(id, &started, "session", EVENT_SESSION);
    session.message = context.environment.clone();
    session.source = context.bundle_uri.clone();
    session.fields = encode_fields(as_map(serde_json::to_value(context)?))?;
    rows.push(session);

    let mut turns_by_part: HashMap<u32, Vec<&Turn>> = HashMap::new();
    for turn in &trace.turns {
        turns_by_part.entry(turn.part).or_default().push(turn);
    }

    for part in &trace.parts {
        for turn in turns_by_part.remove(&part.part).unwrap_or_default() {
            rows.push(turn_row(id, turn)?);
        }

        let mut row = TraceRow::new(id, &part.timestamp, "session", EVENT_PART);
        row.part = Some(i64::from(part.part));
        row.message = format!("{} eval events", part.eval_events_delta.len());
        rows.push(row);

        for event in &part.eval_events_delta {
            rows.push(eval_event_row(id, part, event)?);
        }
    }

    // Turns whose part was never closed.
    let mut orphans: Vec<&Turn> = turns_by_part.into_values().flatten().collect();
    orphans.sort_by_key(|t| t.turn);
    for turn in orphans {
        rows.push(turn_row(id, turn)?);
    }

    for (commit, record) in &trace.evaluations {
        let ts = trace
            .parts
            .iter()
            .find(|p| p.part == record.part)
            .map_or(started, |p| p.timestamp);
        let mut row = TraceRow::new(id, &ts, "evaluation", EVENT_EVALUATION);
        row.level = level_for(record.status, record.error.is_some()).to_string();
        row.message = format!("{} {}/{}", record.status, record.passed, record.total);
        row.part = Some(i64::from(record.part));
        row.git_commit = Some(commit.clone());
        row.fields = encode_fields(as_map(serde_json::to_value(record)?))?;
        rows.push(row);
    }

    if let Some(end) = &trace.session_end {
        let mut row = TraceRow::new(id, &end.timestamp, "session", EVENT_SESSION_END);
        row.message = end.reason.clone();
        rows.push(row);
    }

    for (i, row) in rows.iter_mut().enumerate() {
        row.seq = i64::try_from(i + 1).unwrap_or(i64::MAX);
    }
    Ok(rows)
}

fn level_for(status: EvalStatus, has_error: bool) -> &'static str {
    if status == EvalStatus::Failed || has_error {
        "warn"
    } else {
        "info"
    }
}

fn turn_row(id: &str, turn: &Turn) -> CodecResult<TraceRow> {
    let mut row = TraceRow::new(id, &turn.timestamp, "agent", EVENT_TURN);
    row.message = turn.summary.clone();
    row.turn = Some(i64::from(turn.turn));
    row.part = Some(i64::from(turn.part));
    row.git_commit = turn.git_commit.clone();
    row.session_id = turn.session_id.clone();
    row.source = Some(turn.agent.clone());
    row.fields = encode_fields(turn.fields.clone())?;
    Ok(row)
}

fn eval_event_row(id: &str, part: &Part, event: &EvalEvent) -> CodecResult<TraceRow> {
    let mut row = TraceRow::new(id, &part.timestamp, "evaluation", EVENT_EVAL);
    row.level = level_for(event.status, event.error.is_some()).to_string();
    row.message = event.status.to_string();
    row.turn = Some(i64::from(event.trigger_turn));
    row.part = Some(i64::from(part.part));
    row.git_commit = Some(event.target_commit.clone());
    row.source = Some(event.kind.clone());
    row.fields = encode_fields(as_map(serde_json::to_value(event)?))?;
    Ok(row)
}

fn u32_column(row: &TraceRow, value: Option<i64>, column: &str) -> CodecResult<u32> {
    value
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| CodecError::row(row.seq, format!("missing or invalid {column}")))
}

/// Rebuild a trace and its session context from rows.
///
/// Rows are processed in `seq` order. The evaluation view is recomputed
/// from the decoded parts.
pub fn rows_to_trace(rows: &[TraceRow]) -> CodecResult<(Trace, TraceContext)> {
    let first = rows.first().ok_or(CodecError::Empty)?;
    let mut ordered: Vec<&TraceRow> = rows.iter().collect();
    ordered.sort_by_key(|r| r.seq);

    let mut trace = Trace::new(first.trajectory_id.clone());
    let mut context = TraceContext::default();
    let mut part_index: HashMap<u32, usize> = HashMap::new();

    for row in ordered {
        if row.trajectory_id != trace.trajectory_id {
            return Err(CodecError::row(
                row.seq,
                format!("trajectory_id {:?} differs from {:?}", row.trajectory_id, trace.trajectory_id),
            ));
        }

        match row.event.as_str() {
            EVENT_SESSION => {
                context = serde_json::from_value(Value::Object(row.fields_map()?))
                    .map_err(|e| CodecError::row(row.seq, e.to_string()))?;
            }
            EVENT_TURN => {
                trace.append_turn(Turn {
                    turn: u32_column(row, row.turn, "turn")?,
                    part: u32_column(row, row.part, "part")?,
                    timestamp: parse_ts(row)?,
                    agent: row.source.clone().unwrap_or_default(),
                    summary: row.message.clone(),
                    git_commit: row.git_commit.clone(),
                    session_id: row.session_id.clone(),
                    fields: row.fields_map()?,
                });
            }
            EVENT_PART => {
                let number = u32_column(row, row.part, "part")?;
                part_index.insert(number, trace.parts.len());
                trace.parts.push(Part {
                    part: number,
                    timestamp: parse_ts(row)?,
                    eval_events_delta: Vec::new(),
                });
            }
            EVENT_EVAL => {
                let number = u32_column(row, row.part, "part")?;
                let index = *part_index
                    .get(&number)
                    .ok_or_else(|| CodecError::row(row.seq, format!("eval event for unknown part {number}")))?;
                let event: EvalEvent = serde_json::from_value(Value::Object(row.fields_map()?))
                    .map_err(|e| CodecError::row(row.seq, e.to_string()))?;
                trace.parts[index].eval_events_delta.push(event);
            }
            EVENT_SESSION_END => {
                trace.session_end = Some(SessionEnd {
                    reason: row.message.clone(),
                    timestamp: parse_ts(row)?,
                });
            }
            // Derived rows and kinds added after this reader was written.
            _ => {}
        }
    }

    trace.rebuild_evaluations();
    Ok((trace, context))
}

/// Row counts per kind, for listing tools.
pub fn summarize(rows: &[TraceRow]) -> Value {
    let count = |event: &str| rows.iter().filter(|r| r.event == event).count();
    json!({
        "rows": rows.len(),
        "turns": count(EVENT_TURN),
        "parts": count(EVENT_PART),
        "eval_events": count(EVENT_EVAL),
        "ended": count(EVENT_SESSION_END) > 0,
    })
}
