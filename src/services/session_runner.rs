//! SessionRunner - the per-trajectory control loop
//!
//! One cooperative loop per trajectory:
//! - resume from the latest snapshot and rebuild the evaluation view
//! - agent turn, then an optional asynchronous evaluation of its commit
//! - fold finished evaluations into the current part, close it, save
//! - turn the newest finished evaluation into feedback for the next turn
//!
//! Every stop path (max turns, agent done, cancel, timeout, agent or sandbox
//! failure) ends with a bounded drain of in-flight evaluations, one forced
//! save carrying the `SessionEnd`, and sandbox termination.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::{
    Config, EvalEvent, EvalStatus, EvaluationRecord, Part, SessionConfig, Trace, TraceContext, Turn,
};
use crate::domain::ports::{
    AgentBackend, EvalOutcome, EvalRequest, Evaluator, Sandbox, SaveOutcome, TraceStore, TurnOutcome,
    TurnRequest,
};
use crate::domain::{DomainError, DomainResult};
use crate::services::diagnostics::{
    attach_sources_to_outcomes, DiagnosticExtractor, FallbackClassifier, PayloadEnricher, TestSourceIndex,
};
use crate::services::feedback::FeedbackBuilder;

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    MaxTurns,
    AgentDone,
    Cancelled,
    SessionTimeout,
    TurnTimeout,
    AgentFailed(String),
    SandboxFailed(String),
    /// The snapshot already carried a `SessionEnd`.
    AlreadyEnded(String),
}

impl EndReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::MaxTurns => "max_turns",
            Self::AgentDone => "agent_done",
            Self::Cancelled => "cancelled",
            Self::SessionTimeout => "session_timeout",
            Self::TurnTimeout => "turn_timeout",
            Self::AgentFailed(_) => "agent_error",
            Self::SandboxFailed(_) => "sandbox_error",
            Self::AlreadyEnded(reason) => reason,
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub trajectory_id: String,
    pub end_reason: EndReason,
    pub turns: usize,
    pub parts: usize,
    pub evaluations: usize,
    /// Whether the final snapshot reached the store.
    pub final_saved: bool,
    pub trace: Trace,
}

/// Collaborators a session drives.
#[derive(Clone)]
pub struct SessionPorts {
    pub sandbox: Arc<dyn Sandbox>,
    pub agent: Arc<dyn AgentBackend>,
    pub evaluator: Arc<dyn Evaluator>,
    pub store: Arc<dyn TraceStore>,
}

type EvalCompletion = (EvalEvent, DomainResult<EvalOutcome>);

/// Drives one trajectory.
pub struct SessionRunner {
    trajectory_id: String,
    prompt: String,
    context: TraceContext,
    ports: SessionPorts,
    limits: SessionConfig,
    feedback: FeedbackBuilder,
    enricher: PayloadEnricher,
    sources: Arc<TestSourceIndex>,
}

impl SessionRunner {
    pub fn new(
        trajectory_id: impl Into<String>,
        prompt: impl Into<String>,
        context: TraceContext,
        ports: SessionPorts,
        config: &Config,
    ) -> Self {
        let extractor = DiagnosticExtractor::new(FallbackClassifier::new(
            config.diagnostics.compile_markers.clone(),
        ));
        let enricher = PayloadEnricher::new(extractor, config.diagnostics.cluster_sample_cap);
        Self {
            trajectory_id: trajectory_id.into(),
            prompt: prompt.into(),
            context,
            ports,
            limits: config.session.clone(),
            feedback: FeedbackBuilder::from_config(&config.feedback).with_enricher(enricher.clone()),
            enricher,
            sources: Arc::new(TestSourceIndex::new()),
        }
    }

    /// Attach test inputs to evaluation results before enrichment.
    #[must_use]
    pub fn with_test_sources(mut self, sources: TestSourceIndex) -> Self {
        self.sources = Arc::new(sources);
        self
    }

    /// Run until a stop condition; flipping `cancel` to `true` stops the
    /// session at the next await point.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> SessionReport {
        let trajectory_id = self.trajectory_id.as_str();
        let deadline = Instant::now() + Duration::from_secs(self.limits.session_timeout_secs);

        let mut trace = match self.ports.store.load_snapshot(trajectory_id).await {
            Some(mut trace) => {
                trace.rebuild_evaluations();
                info!(
                    trajectory_id,
                    parts = trace.parts.len(),
                    turns = trace.turns.len(),
                    evaluations = trace.evaluations.len(),
                    "Resuming from snapshot"
                );
                trace
            }
            None => Trace::new(trajectory_id),
        };

        if let Some(end) = &trace.session_end {
            info!(trajectory_id, reason = %end.reason, "Snapshot already ended, nothing to do");
            let reason = EndReason::AlreadyEnded(end.reason.clone());
            self.terminate_sandbox().await;
            return self.report(trace, reason, true);
        }

        let (eval_tx, mut eval_rx) = mpsc::unbounded_channel::<EvalCompletion>();
        let mut in_flight = 0usize;

        // Evaluations that were pending when the previous process died.
        for (commit, record) in &trace.evaluations {
            if record.status == EvalStatus::Pending {
                let request = resumed_request(commit, record);
                info!(trajectory_id, commit = %commit, "Re-dispatching pending evaluation");
                self.spawn_evaluation(request, eval_tx.clone());
                in_flight += 1;
            }
        }

        let mut surfaced: HashSet<String> = trace
            .evaluations
            .iter()
            .filter(|(_, r)| r.status.is_terminal())
            .map(|(commit, _)| commit.clone())
            .collect();
        let mut feedback: Option<String> = None;
        let mut commits_since_eval = 0u32;

        let end_reason = loop {
            if *cancel.borrow() {
                break EndReason::Cancelled;
            }
            if Instant::now() >= deadline {
                break EndReason::SessionTimeout;
            }
            let turn_number = trace.next_turn_number();
            if turn_number > self.limits.max_turns {
                break EndReason::MaxTurns;
            }

            let mut part = Part::new(trace.next_part_number());
            let request = TurnRequest {
                trajectory_id: trajectory_id.to_string(),
                turn: turn_number,
                prompt: self.prompt.clone(),
                feedback: feedback.take(),
            };
            debug!(trajectory_id, part = part.part, turn = turn_number, "Starting turn");

            let turn_timeout = Duration::from_secs(self.limits.turn_timeout_secs);
            let outcome: Result<TurnOutcome, EndReason> = select! {
                result = timeout(turn_timeout, self.ports.agent.run_turn(self.ports.sandbox.as_ref(), request)) => {
                    match result {
                        Ok(Ok(outcome)) => Ok(outcome),
                        Ok(Err(DomainError::Sandbox(msg))) => Err(EndReason::SandboxFailed(msg)),
                        Ok(Err(DomainError::Cancelled)) => Err(EndReason::Cancelled),
                        Ok(Err(e)) => Err(EndReason::AgentFailed(e.to_string())),
                        Err(_) => Err(EndReason::TurnTimeout),
                    }
                }
                () = cancelled(&mut cancel) => Err(EndReason::Cancelled),
                () = sleep_until(deadline) => Err(EndReason::SessionTimeout),
            };

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(reason) => {
                    warn!(trajectory_id, turn = turn_number, reason = reason.as_str(), "Turn did not complete");
                    // Keep whatever evaluations finished meanwhile.
                    self.drain_ready(&mut eval_rx, &mut in_flight, &mut part);
                    if !part.eval_events_delta.is_empty() {
                        trace.append_part(part);
                    }
                    break reason;
                }
            };

            trace.append_turn(Turn {
                turn: turn_number,
                part: part.part,
                timestamp: Utc::now(),
                agent: self.ports.agent.name().to_string(),
                summary: outcome.summary.clone(),
                git_commit: outcome.git_commit.clone(),
                session_id: outcome.session_id.clone(),
                fields: outcome.fields.clone(),
            });

            if let Some(commit) = &outcome.git_commit {
                commits_since_eval += 1;
                let every = self.limits.eval_every_turns;
                let already_known = trace.evaluations.contains_key(commit);
                if every > 0 && commits_since_eval >= every && !already_known {
                    commits_since_eval = 0;
                    let request = EvalEvent::pending(Uuid::new_v4().to_string(), commit, part.part, turn_number);
                    info!(trajectory_id, commit = %commit, eval_id = %request.eval_id, "Requesting evaluation");
                    part.eval_events_delta.push(request.clone());
                    self.spawn_evaluation(request, eval_tx.clone());
                    in_flight += 1;
                }
            }

            self.drain_ready(&mut eval_rx, &mut in_flight, &mut part);
            trace.append_part(part);
            self.save(&trace, false).await;

            if let Some((commit, text)) = self.next_feedback(&trace, &surfaced) {
                debug!(trajectory_id, commit = %commit, "Feedback prepared for next turn");
                surfaced.insert(commit);
                feedback = Some(text);
            }

            if outcome.done {
                break EndReason::AgentDone;
            }
        };

        info!(trajectory_id, reason = end_reason.as_str(), "Session stopping");
        self.drain_in_flight(&mut trace, &mut eval_rx, in_flight).await;
        trace.end(end_reason.as_str());

        let final_saved = self.final_save(&trace).await;
        self.terminate_sandbox().await;
        self.report(trace, end_reason, final_saved)
    }

    async fn terminate_sandbox(&self) {
        if let Err(e) = self.ports.sandbox.terminate().await {
            warn!(trajectory_id = %self.trajectory_id, error = %e, "Sandbox termination failed");
        }
    }

    fn spawn_evaluation(&self, request: EvalEvent, tx: mpsc::UnboundedSender<EvalCompletion>) {
        let evaluator = Arc::clone(&self.ports.evaluator);
        let eval_request = EvalRequest {
            trajectory_id: self.trajectory_id.clone(),
            eval_id: request.eval_id.clone(),
            commit: request.target_commit.clone(),
        };
        tokio::spawn(async move {
            let result = evaluator.evaluate(eval_request).await;
            // Receiver gone means the session already finished.
            let _ = tx.send((request, result));
        });
    }

    /// Fold every already-finished evaluation into `part`.
    fn drain_ready(
        &self,
        rx: &mut mpsc::UnboundedReceiver<EvalCompletion>,
        in_flight: &mut usize,
        part: &mut Part,
    ) {
        while let Ok((request, result)) = rx.try_recv() {
            *in_flight = in_flight.saturating_sub(1);
            part.eval_events_delta.push(self.completion_event(&request, result));
        }
    }

    /// Wait a bounded time for outstanding evaluations and record them in a
    /// final part.
    async fn drain_in_flight(
        &self,
        trace: &mut Trace,
        rx: &mut mpsc::UnboundedReceiver<EvalCompletion>,
        mut in_flight: usize,
    ) {
        let mut part = Part::new(trace.next_part_number());
        self.drain_ready(rx, &mut in_flight, &mut part);

        if in_flight > 0 {
            let budget = Duration::from_secs(self.limits.eval_drain_timeout_secs);
            let waited = timeout(budget, async {
                while in_flight > 0 {
                    match rx.recv().await {
                        Some((request, result)) => {
                            in_flight -= 1;
                            part.eval_events_delta.push(self.completion_event(&request, result));
                        }
                        None => break,
                    }
                }
            })
            .await;
            if waited.is_err() {
                warn!(
                    trajectory_id = %self.trajectory_id,
                    outstanding = in_flight,
                    "Evaluations still running at shutdown, leaving them pending"
                );
            }
        }

        if !part.eval_events_delta.is_empty() {
            trace.append_part(part);
        }
    }

    /// Completed/failed follow-up for a finished evaluation request.
    fn completion_event(&self, request: &EvalEvent, result: DomainResult<EvalOutcome>) -> EvalEvent {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    trajectory_id = %self.trajectory_id,
                    commit = %request.target_commit,
                    error = %e,
                    "Evaluation could not be run"
                );
                let mut event = request.update(EvalStatus::Failed);
                event.error = Some(e.to_string());
                return event;
            }
        };

        let status = if outcome.error.is_some() {
            EvalStatus::Failed
        } else {
            EvalStatus::Completed
        };
        let mut event = request.update(status);

        let mut tests = outcome.tests;
        attach_sources_to_outcomes(&mut tests, &self.sources);
        let mut payload = outcome.payload;
        payload.insert(
            "tests".into(),
            serde_json::to_value(&tests).unwrap_or_else(|_| serde_json::Value::Array(Vec::new())),
        );
        self.enricher.enrich(&mut payload);
        if let Some(enriched) = payload
            .remove("tests")
            .and_then(|v| serde_json::from_value::<Vec<crate::domain::models::TestOutcome>>(v).ok())
        {
            tests = enriched;
        }
        // Sources live in the index, not in every persisted event.
        for test in &mut tests {
            test.source = None;
        }

        info!(
            trajectory_id = %self.trajectory_id,
            commit = %request.target_commit,
            passed = outcome.passed,
            total = outcome.total,
            status = %status,
            "Evaluation finished"
        );

        event.passed = Some(outcome.passed);
        event.failed = Some(outcome.failed);
        event.total = Some(outcome.total);
        event.suite_results = Some(outcome.suite_results);
        event.tests = Some(tests);
        event.payload = payload;
        event.error = outcome.error;
        event
    }

    /// Feedback from the newest finished evaluation not yet shown.
    fn next_feedback(&self, trace: &Trace, surfaced: &HashSet<String>) -> Option<(String, String)> {
        let (commit, record) = trace
            .evaluations
            .iter()
            .filter(|(commit, r)| r.status.is_terminal() && !surfaced.contains(*commit))
            .max_by_key(|(_, r)| r.part)?;

        let mut text = format!(
            "evaluation of {commit}: {} ({}/{} passed)",
            record.status, record.passed, record.total
        );
        if let Some(error) = &record.error {
            text.push_str("\nerror: ");
            text.push_str(error);
        }
        let (section, _) = self.feedback.build(&record.feedback_payload());
        text.push('\n');
        text.push_str(&section);
        Some((commit.clone(), text))
    }

    async fn save(&self, trace: &Trace, force: bool) -> bool {
        match self.ports.store.save(trace, &self.context, force).await {
            Ok(SaveOutcome::Written { .. }) => true,
            Ok(SaveOutcome::SkippedEmpty) => false,
            Err(e) => {
                warn!(
                    trajectory_id = %self.trajectory_id,
                    error = %e,
                    "Trace save failed; will retry at next part boundary"
                );
                false
            }
        }
    }

    async fn final_save(&self, trace: &Trace) -> bool {
        let budget = Duration::from_secs(self.limits.final_save_timeout_secs);
        match timeout(budget, self.save(trace, true)).await {
            Ok(saved) => saved,
            Err(_) => {
                warn!(
                    trajectory_id = %self.trajectory_id,
                    timeout_secs = self.limits.final_save_timeout_secs,
                    "Final trace save timed out"
                );
                false
            }
        }
    }

    fn report(&self, trace: Trace, end_reason: EndReason, final_saved: bool) -> SessionReport {
        SessionReport {
            trajectory_id: self.trajectory_id.clone(),
            end_reason,
            turns: trace.turns.len(),
            parts: trace.parts.len(),
            evaluations: trace.evaluations.len(),
            final_saved,
            trace,
        }
    }
}

/// Pending request rebuilt from a record's payload after resume.
fn resumed_request(commit: &str, record: &EvaluationRecord) -> EvalEvent {
    let field = |key: &str| record.payload.get(key).and_then(serde_json::Value::as_u64);
    let eval_id = record
        .payload
        .get("eval_id")
        .and_then(serde_json::Value::as_str)
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
    let mut request = EvalEvent::pending(
        eval_id,
        commit,
        field("trigger_part").and_then(|v| u32::try_from(v).ok()).unwrap_or(record.part),
        field("trigger_turn").and_then(|v| u32::try_from(v).ok()).unwrap_or(0),
    );
    if let Some(kind) = record.payload.get("kind").and_then(serde_json::Value::as_str) {
        request.kind = kind.to_string();
    }
    request
}

/// Resolves once `cancel` reads `true`; never resolves if the sender is
/// dropped without cancelling.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
