//! Live reduction, rebuild-from-parts and the columnar round trip must all
//! agree on the evaluation view.

mod common;

use proptest::prelude::*;
use serde_json::json;

use rollout::domain::models::{EvalEvent, EvalStatus, Part, Trace, TraceContext};
use rollout::infrastructure::trace_codec::{agent_trace_to_rows, read_rows, rows_to_trace, write_rows};
use rollout::services::build_evaluations_from_parts;

#[derive(Debug, Clone)]
struct EventSeed {
    commit: usize,
    status: EvalStatus,
    counts: Option<(u32, u32)>,
    error: bool,
    tag: Option<u8>,
}

fn status_strategy() -> impl Strategy<Value = EvalStatus> {
    prop_oneof![
        Just(EvalStatus::Pending),
        Just(EvalStatus::Completed),
        Just(EvalStatus::Failed),
    ]
}

fn event_strategy() -> impl Strategy<Value = EventSeed> {
    (
        0usize..3,
        status_strategy(),
        prop::option::of((0u32..20, 0u32..20)),
        any::<bool>(),
        prop::option::of(any::<u8>()),
    )
        .prop_map(|(commit, status, counts, error, tag)| EventSeed {
            commit,
            status,
            counts,
            error,
            tag,
        })
}

fn parts_strategy() -> impl Strategy<Value = Vec<Vec<EventSeed>>> {
    prop::collection::vec(prop::collection::vec(event_strategy(), 0..4), 1..6)
}

fn build_parts(seeds: &[Vec<EventSeed>]) -> Vec<Part> {
    seeds
        .iter()
        .enumerate()
        .map(|(i, events)| {
            let number = u32::try_from(i + 1).unwrap();
            let mut part = Part::new(number);
            for seed in events {
                let commit = format!("c{}", seed.commit);
                let mut event = EvalEvent::pending(format!("e{}", seed.commit), &commit, number, number);
                event.status = seed.status;
                if let Some((passed, failed)) = seed.counts {
                    event.passed = Some(passed);
                    event.failed = Some(failed);
                    event.total = Some(passed + failed);
                }
                if seed.error {
                    event.error = Some(format!("runner crashed in part {number}"));
                }
                if let Some(tag) = seed.tag {
                    event.extra.insert("attempt".to_string(), json!(tag));
                }
                part.eval_events_delta.push(event);
            }
            part
        })
        .collect()
}

fn live_trace(id: &str, parts: &[Part]) -> Trace {
    let mut trace = Trace::new(id);
    for (i, part) in parts.iter().enumerate() {
        let number = u32::try_from(i + 1).unwrap();
        trace.append_turn(common::turn(number, part.part, Some(&format!("c{}", i % 3))));
        trace.append_part(part.clone());
    }
    trace
}

proptest! {
    /// Property: folding parts one at a time equals one pass over the history
    #[test]
    fn prop_incremental_equals_rebuild(seeds in parts_strategy()) {
        let parts = build_parts(&seeds);
        let trace = live_trace("traj-prop", &parts);
        prop_assert_eq!(&trace.evaluations, &build_evaluations_from_parts(&parts));

        let mut rebuilt = trace.clone();
        rebuilt.rebuild_evaluations();
        prop_assert_eq!(rebuilt.evaluations, trace.evaluations);
    }

    /// Property: a persisted trace decodes to the same evaluation view
    #[test]
    fn prop_columnar_roundtrip_preserves_evaluations(seeds in parts_strategy()) {
        let parts = build_parts(&seeds);
        let trace = live_trace("traj-codec", &parts);
        let context = TraceContext {
            environment: "c-compiler".to_string(),
            ..TraceContext::default()
        };

        let rows = agent_trace_to_rows(&trace, &context).unwrap();
        let bytes = write_rows(&rows).unwrap();
        let (decoded, decoded_context) = rows_to_trace(&read_rows(bytes).unwrap()).unwrap();

        prop_assert_eq!(decoded.parts.len(), trace.parts.len());
        prop_assert_eq!(decoded.turns.len(), trace.turns.len());
        prop_assert_eq!(&decoded.evaluations, &trace.evaluations);
        prop_assert_eq!(decoded_context.environment, "c-compiler");
        prop_assert_eq!(decoded.next_part_number(), trace.next_part_number());
    }
}

#[test]
fn test_counts_survive_a_later_status_only_update() {
    let mut first = Part::new(1);
    let mut done = EvalEvent::pending("e1", "c1", 1, 1).update(EvalStatus::Completed);
    done.passed = Some(3);
    done.total = Some(4);
    first.eval_events_delta.push(done.clone());

    let mut second = Part::new(2);
    second.eval_events_delta.push(done.update(EvalStatus::Failed));

    let evaluations = build_evaluations_from_parts(&[first, second]);
    let record = &evaluations["c1"];
    assert_eq!(record.status, EvalStatus::Failed);
    assert_eq!(record.part, 2);
    assert_eq!((record.passed, record.total), (3, 4));
}
