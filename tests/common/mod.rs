//! Common test utilities for integration tests
//!
//! Scripted agent, canned evaluator and an in-process sandbox double used
//! across the session-runner and store tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::Map;

use rollout::domain::models::{
    CommandOutput, CommandSpec, Config, EvalEvent, EvalStatus, Part, TestOutcome, Trace, Turn,
};
use rollout::domain::ports::{
    AgentBackend, EvalOutcome, EvalRequest, Evaluator, OutputCallbacks, Sandbox,
    TurnOutcome, TurnRequest,
};
use rollout::domain::{DomainError, DomainResult};

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Config with short limits suitable for tests.
pub fn test_config(max_turns: u32) -> Config {
    let mut config = Config::default();
    config.session.max_turns = max_turns;
    config.session.eval_every_turns = 1;
    config.session.turn_timeout_secs = 5;
    config.session.session_timeout_secs = 30;
    config.session.eval_drain_timeout_secs = 5;
    config.session.final_save_timeout_secs = 5;
    config
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// One scripted turn.
#[derive(Debug, Clone)]
pub enum Step {
    /// Return this outcome after `delay`.
    Reply(TurnOutcome, Duration),
    /// Fail the turn with this error.
    Fail(DomainErrorKind),
    /// Never finish.
    Hang,
}

/// Cloneable stand-in for the `DomainError` a scripted turn returns.
#[derive(Debug, Clone, Copy)]
pub enum DomainErrorKind {
    Agent,
    Sandbox,
}

/// Agent that replays a script and records every request it saw.
pub struct ScriptedAgent {
    steps: Mutex<VecDeque<Step>>,
    pub requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedAgent {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A turn that commits `commit` after a short pause.
    pub fn commit(commit: &str) -> Step {
        Step::Reply(
            TurnOutcome {
                summary: format!("committed {commit}"),
                git_commit: Some(commit.to_string()),
                ..TurnOutcome::default()
            },
            Duration::from_millis(30),
        )
    }

    /// A final turn that commits `commit` and reports done.
    pub fn finish(commit: &str) -> Step {
        Step::Reply(
            TurnOutcome {
                summary: "done".to_string(),
                git_commit: Some(commit.to_string()),
                done: true,
                ..TurnOutcome::default()
            },
            Duration::from_millis(30),
        )
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentBackend for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run_turn(&self, _sandbox: &dyn Sandbox, request: TurnRequest) -> DomainResult<TurnOutcome> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(outcome, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(outcome)
            }
            Some(Step::Fail(DomainErrorKind::Agent)) => {
                Err(DomainError::Agent("model refused".to_string()))
            }
            Some(Step::Fail(DomainErrorKind::Sandbox)) => {
                Err(DomainError::Sandbox("container died".to_string()))
            }
            Some(Step::Hang) => Ok(std::future::pending::<TurnOutcome>().await),
            None => Ok(TurnOutcome {
                summary: format!("idle turn {}", request.turn),
                ..TurnOutcome::default()
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Evaluator returning canned outcomes per commit.
pub struct CannedEvaluator {
    outcomes: Mutex<HashMap<String, EvalOutcome>>,
    delay: Duration,
    pub calls: Mutex<Vec<EvalRequest>>,
}

impl CannedEvaluator {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(HashMap::new()),
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set(&self, commit: &str, outcome: EvalOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(commit.to_string(), outcome);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn commits(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.commit.clone())
            .collect()
    }
}

#[async_trait]
impl Evaluator for CannedEvaluator {
    async fn evaluate(&self, request: EvalRequest) -> DomainResult<EvalOutcome> {
        self.calls.lock().unwrap().push(request.clone());
        tokio::time::sleep(self.delay).await;
        let canned = self.outcomes.lock().unwrap().get(&request.commit).cloned();
        Ok(canned.unwrap_or(EvalOutcome {
            passed: 1,
            failed: 0,
            total: 1,
            ..EvalOutcome::default()
        }))
    }
}

/// Outcome with one failing compile-error test in `suite`.
pub fn failing_outcome(suite: &str, test_id: &str) -> EvalOutcome {
    EvalOutcome {
        passed: 1,
        failed: 1,
        total: 2,
        tests: vec![TestOutcome::failed(
            suite,
            test_id,
            "main.c:3:5: error: expected ';' before '}' token",
        )],
        ..EvalOutcome::default()
    }
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

/// Sandbox that runs nothing and counts terminations.
#[derive(Default)]
pub struct NullSandbox {
    pub terminations: AtomicUsize,
}

impl NullSandbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn terminate_count(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sandbox for NullSandbox {
    fn provider(&self) -> &str {
        "null"
    }

    async fn run(&self, _spec: CommandSpec, _callbacks: OutputCallbacks) -> DomainResult<CommandOutput> {
        Ok(CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        })
    }

    async fn write_file(&self, _path: &str, _content: &[u8]) -> DomainResult<()> {
        Ok(())
    }

    async fn read_file(&self, path: &str) -> DomainResult<String> {
        Err(DomainError::Sandbox(format!("{path} not found")))
    }

    async fn read_file_bytes(&self, path: &str) -> DomainResult<Bytes> {
        Err(DomainError::Sandbox(format!("{path} not found")))
    }

    async fn terminate(&self) -> DomainResult<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Trace fixtures
// ---------------------------------------------------------------------------

pub fn turn(number: u32, part: u32, commit: Option<&str>) -> Turn {
    Turn {
        turn: number,
        part,
        timestamp: Utc::now(),
        agent: "scripted".to_string(),
        summary: format!("turn {number}"),
        git_commit: commit.map(str::to_string),
        session_id: None,
        fields: Map::new(),
    }
}

/// Trace of `turns` committing turns, each with an evaluation request and
/// every request except the last one completed.
pub fn interrupted_trace(id: &str, turns: u32) -> Trace {
    let mut trace = Trace::new(id);
    for n in 1..=turns {
        let commit = format!("c{n}");
        trace.append_turn(turn(n, n, Some(&commit)));
        let mut part = Part::new(n);
        part.eval_events_delta
            .push(EvalEvent::pending(format!("e{n}"), &commit, n, n));
        if n > 1 {
            let previous = format!("c{}", n - 1);
            let mut done = EvalEvent::pending(format!("e{}", n - 1), &previous, n - 1, n - 1)
                .update(EvalStatus::Completed);
            done.passed = Some(1);
            done.total = Some(1);
            part.eval_events_delta.push(done);
        }
        trace.append_part(part);
    }
    trace
}
