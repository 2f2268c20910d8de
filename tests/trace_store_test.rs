//! File-backed trace store: persistence across store instances and a full
//! session resumed from disk.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::watch;

use common::{interrupted_trace, setup_test_logging, test_config, CannedEvaluator, NullSandbox, ScriptedAgent};
use rollout::domain::models::{EvalStatus, TraceContext};
use rollout::domain::ports::{SaveOutcome, TraceStore};
use rollout::infrastructure::trace_codec::rows_to_trace;
use rollout::infrastructure::trace_store::ObjectStoreTraceStore;
use rollout::services::{EndReason, SessionPorts, SessionRunner};

fn file_store(dir: &TempDir) -> Arc<ObjectStoreTraceStore> {
    let url = format!("file://{}", dir.path().display());
    Arc::new(ObjectStoreTraceStore::from_url(&url).unwrap())
}

fn context() -> TraceContext {
    TraceContext {
        environment: "c-compiler".to_string(),
        suites: vec!["basics".to_string(), "structs".to_string()],
        ..TraceContext::default()
    }
}

fn ports(store: Arc<ObjectStoreTraceStore>, agent: Arc<ScriptedAgent>) -> SessionPorts {
    SessionPorts {
        sandbox: NullSandbox::new(),
        agent,
        evaluator: CannedEvaluator::new(Duration::from_millis(5)),
        store,
    }
}

fn running() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    std::mem::forget(tx);
    rx
}

#[tokio::test]
async fn test_snapshot_is_visible_to_a_new_store_instance() {
    setup_test_logging();
    let dir = TempDir::new().unwrap();
    let trace = interrupted_trace("traj-disk", 3);

    let outcome = file_store(&dir).save(&trace, &context(), false).await.unwrap();
    let key = match outcome {
        SaveOutcome::Written { key } => key,
        other => panic!("expected a write, got {other:?}"),
    };
    assert!(key.ends_with("trajectories/traj-disk/trace.parquet"));

    let reopened = file_store(&dir);
    let loaded = reopened.load_snapshot("traj-disk").await.unwrap();
    assert_eq!(loaded.parts.len(), 3);
    assert_eq!(loaded.evaluations, trace.evaluations);

    let rows = reopened.load_rows("traj-disk").await.unwrap();
    let (_, decoded_context) = rows_to_trace(&rows).unwrap();
    assert_eq!(decoded_context, context());
}

#[tokio::test]
async fn test_artifacts_land_next_to_the_trace() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir);

    let uri = store
        .put_artifact("traj-art", "repo.bundle", Bytes::from_static(b"bundle"))
        .await
        .unwrap();
    assert!(uri.starts_with("file:///"));
    assert!(uri.ends_with("trajectories/traj-art/repo.bundle"));

    let on_disk = dir.path().join("trajectories/traj-art/repo.bundle");
    assert_eq!(std::fs::read(on_disk).unwrap(), b"bundle");
}

#[tokio::test]
async fn test_session_resumes_from_disk_after_restart() {
    setup_test_logging();
    let dir = TempDir::new().unwrap();
    let config = test_config(2);

    // First process: two turns, then the session ends on max_turns.
    let first_agent = ScriptedAgent::new(vec![ScriptedAgent::commit("c1"), ScriptedAgent::commit("c2")]);
    let first = SessionRunner::new("traj-restart", "p", context(), ports(file_store(&dir), first_agent), &config)
        .run(running())
        .await;
    assert_eq!(first.end_reason, EndReason::MaxTurns);
    assert!(first.final_saved);

    // Second process with a higher turn limit sees the ended snapshot.
    let second_agent = ScriptedAgent::new(vec![ScriptedAgent::commit("c3")]);
    let second = SessionRunner::new(
        "traj-restart",
        "p",
        context(),
        ports(file_store(&dir), second_agent.clone()),
        &test_config(5),
    )
    .run(running())
    .await;
    assert_eq!(second.end_reason, EndReason::AlreadyEnded("max_turns".to_string()));
    assert!(second_agent.requests().is_empty());
    let statuses = |evals: &std::collections::BTreeMap<String, rollout::EvaluationRecord>| {
        evals.iter().map(|(c, r)| (c.clone(), r.status)).collect::<Vec<_>>()
    };
    assert_eq!(statuses(&second.trace.evaluations), statuses(&first.trace.evaluations));
}

#[tokio::test]
async fn test_interrupted_session_continues_from_disk() {
    setup_test_logging();
    let dir = TempDir::new().unwrap();
    file_store(&dir)
        .save(&interrupted_trace("traj-crash", 2), &context(), false)
        .await
        .unwrap();

    let agent = ScriptedAgent::new(vec![ScriptedAgent::commit("c3"), ScriptedAgent::finish("c4")]);
    let report = SessionRunner::new("traj-crash", "p", context(), ports(file_store(&dir), agent.clone()), &test_config(10))
        .run(running())
        .await;

    assert_eq!(report.end_reason, EndReason::AgentDone);
    let turns: Vec<u32> = agent.requests().iter().map(|r| r.turn).collect();
    assert_eq!(turns, vec![3, 4]);

    let stored = file_store(&dir).load_snapshot("traj-crash").await.unwrap();
    assert_eq!(stored.turns.len(), 4);
    assert!(stored
        .evaluations
        .values()
        .all(|r| r.status == EvalStatus::Completed));
    assert_eq!(stored.session_end.unwrap().reason, "agent_done");
}
