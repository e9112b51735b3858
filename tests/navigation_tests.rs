mod common;

use common::{new_log, tracer_harness, tracer_step, Tracer, StepPlan, Then};
use manifest_builder::errors::WizardError;
use manifest_builder::prompt::ScriptedAnswer;
use manifest_builder::wizard::{
    Frame, MemoryStore, RunOutcome, MSG_BACK_ON_INITIAL, MSG_CANCELLED, MSG_FATAL,
};
use serde_json::json;

#[tokio::test]
async fn forward_run_keeps_one_frame_per_step() {
    let log = new_log();
    let tracer = Tracer::new(log.clone())
        .plan("a", StepPlan::ask(Then::Next("b")))
        .plan("b", StepPlan::silent(Then::Next("c")))
        .plan("c", StepPlan::ask(Then::Finish));
    let mut harness = tracer_harness(
        tracer,
        vec![ScriptedAnswer::Ok, ScriptedAnswer::Ok],
        MemoryStore::new(),
    );

    let report = harness.navigator.run(tracer_step("a")).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(report.succeeded());
    assert_eq!(
        harness.navigator.stack(),
        &[
            Frame::Step(tracer_step("a")),
            Frame::Step(tracer_step("b")),
            Frame::Step(tracer_step("c")),
            Frame::Terminal,
        ]
    );
    assert_eq!(harness.navigator.committed_states().len(), 3);
    assert!(harness.navigator.committed(&tracer_step("a")).unwrap().interacted());
    assert!(!harness.navigator.committed(&tracer_step("b")).unwrap().interacted());

    let log = log.lock().unwrap();
    assert_eq!(log.count("forward:a"), 1);
    assert_eq!(log.count("forward:c"), 1);
    assert_eq!(log.count("registered:1"), 2, "each step registers one successor");
    assert!(log.events.iter().all(|event| !event.starts_with("registered:") || event == "registered:1"));
    assert!(log.faults.is_empty());
}

#[tokio::test]
async fn back_over_silent_first_step_backs_out() {
    let log = new_log();
    let tracer = Tracer::new(log.clone())
        .plan("a", StepPlan::silent(Then::Next("b")))
        .plan("b", StepPlan::ask(Then::Finish));
    let mut harness = tracer_harness(tracer, vec![ScriptedAnswer::Back], MemoryStore::new());

    let report = harness.navigator.run(tracer_step("a")).await;

    assert_eq!(report.outcome, RunOutcome::BackedOut);
    assert_eq!(report.messages, vec![MSG_BACK_ON_INITIAL.to_string()]);
    assert!(harness.navigator.committed_states().is_empty());
    assert!(harness.navigator.stack().is_empty());

    let log = log.lock().unwrap();
    assert_eq!(log.count("back:a"), 1);
    assert_eq!(log.count("run:a"), 1);
    assert!(log.faults.is_empty(), "back must never look like a failure");
}

#[tokio::test]
async fn back_skips_steps_without_a_screen() {
    let log = new_log();
    let tracer = Tracer::new(log.clone())
        .plan("a", StepPlan::ask(Then::Next("b")))
        .plan("b", StepPlan::silent(Then::Next("c")).writing("endpoint", "x"))
        .plan("c", StepPlan::ask(Then::Finish));
    let mut harness = tracer_harness(
        tracer,
        vec![
            ScriptedAnswer::Ok,
            ScriptedAnswer::Back,
            ScriptedAnswer::Ok,
            ScriptedAnswer::Ok,
        ],
        MemoryStore::new(),
    );

    let report = harness.navigator.run(tracer_step("a")).await;
    assert_eq!(report.outcome, RunOutcome::Completed);

    let log = log.lock().unwrap();
    assert_eq!(log.count("run:a"), 2, "back lands on the last screen shown");
    assert_eq!(log.count("back:b"), 1);
    assert_eq!(log.count("back:a"), 1);
    assert_eq!(log.count("back:c"), 0, "the step that asked for Back is not unwound");
    let silent = log
        .backs
        .iter()
        .find(|state| state.get_str("tracer_step") == Some("b"))
        .unwrap();
    assert_eq!(silent.get("endpoint"), Some(&json!("x")));
    assert!(!silent.interacted());
}

#[tokio::test]
async fn missing_info_is_restored_on_back() {
    let log = new_log();
    let tracer = Tracer::new(log.clone())
        .plan("a", StepPlan::ask(Then::Next("b")).writing("endpoint", "http://prom"))
        .plan("b", StepPlan::ask(Then::Finish));
    let mut harness = tracer_harness(
        tracer,
        vec![ScriptedAnswer::Ok, ScriptedAnswer::Back, ScriptedAnswer::Back],
        MemoryStore::new(),
    );

    let report = harness.navigator.run(tracer_step("a")).await;

    assert_eq!(report.outcome, RunOutcome::BackedOut);
    let log = log.lock().unwrap();
    assert_eq!(log.count("forward:a"), 1);
    assert_eq!(log.count("back:a"), 1);
    assert_eq!(log.missing, vec!["endpoint".to_string()]);
}

#[tokio::test]
async fn forward_without_successor_is_fatal() {
    let log = new_log();
    let tracer = Tracer::new(log).plan("a", StepPlan::silent(Then::Stall));
    let mut harness = tracer_harness(tracer, Vec::new(), MemoryStore::new());

    let report = harness.navigator.run(tracer_step("a")).await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(matches!(report.fault, Some(WizardError::NoSuccessor(ref key)) if key == "tracer::a"));
    assert!(report.messages.contains(&MSG_FATAL.to_string()));
}

#[tokio::test]
async fn failure_routes_to_the_recovery_step() {
    let log = new_log();
    let tracer = Tracer::new(log.clone())
        .plan("a", StepPlan::ask(Then::Next("b")))
        .plan("b", StepPlan::silent(Then::Fail("prometheus unreachable")))
        .plan("recover", StepPlan::ask(Then::Finish));
    let mut harness = tracer_harness(
        tracer,
        vec![ScriptedAnswer::Ok, ScriptedAnswer::Ok],
        MemoryStore::new(),
    );

    let report = harness.navigator.run(tracer_step("a")).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(harness.prompts.served(), vec!["a", "recover"]);
    assert_eq!(
        harness.navigator.stack().last(),
        Some(&Frame::Terminal),
    );
    assert!(harness
        .navigator
        .stack()
        .contains(&Frame::Recovery(tracer_step("recover"))));

    let failed = harness.navigator.committed(&tracer_step("b")).unwrap();
    assert!(failed.errored());
    assert!(failed.error_text().unwrap().contains("prometheus unreachable"));

    let log = log.lock().unwrap();
    assert_eq!(log.count("error:b"), 1);
    assert_eq!(log.count("forward:b"), 0);
}

#[tokio::test]
async fn failing_recovery_step_ends_the_run() {
    let log = new_log();
    let tracer = Tracer::new(log)
        .plan("a", StepPlan::silent(Then::Fail("first")))
        .plan("recover", StepPlan::silent(Then::Fail("second")));
    let mut harness = tracer_harness(tracer, Vec::new(), MemoryStore::new());

    let report = harness.navigator.run(tracer_step("a")).await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    match report.fault {
        Some(WizardError::RecoveryFailed { step, fault }) => {
            assert_eq!(step, "tracer::recover");
            assert!(fault.contains("second"));
        }
        other => panic!("unexpected fault: {other:?}"),
    }
    let saved = harness.store.document().unwrap();
    assert!(saved.error.unwrap().contains("second"));
}

#[tokio::test]
async fn panicking_step_is_treated_as_a_failure() {
    let log = new_log();
    let tracer = Tracer::new(log.clone())
        .plan("a", StepPlan::silent(Then::Panic("tracer exploded")))
        .plan("recover", StepPlan::ask(Then::Finish));
    let mut harness = tracer_harness(tracer, vec![ScriptedAnswer::Ok], MemoryStore::new());

    let report = harness.navigator.run(tracer_step("a")).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    let log = log.lock().unwrap();
    assert_eq!(log.count("error:a"), 1);
    assert!(log.faults[0].contains("tracer exploded"));
}

#[tokio::test]
async fn escape_cancels_the_run() {
    let log = new_log();
    let tracer = Tracer::new(log.clone())
        .plan("a", StepPlan::ask(Then::Next("b")))
        .plan("b", StepPlan::ask(Then::Finish));
    let mut harness = tracer_harness(
        tracer,
        vec![ScriptedAnswer::Ok, ScriptedAnswer::Escape],
        MemoryStore::new(),
    );

    let report = harness.navigator.run(tracer_step("a")).await;

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.messages, vec![MSG_CANCELLED.to_string()]);
    assert!(report.fault.is_none());
    assert!(harness.cancel.is_cancelled());
    assert!(log.lock().unwrap().faults.is_empty());

    let saved = harness.store.document().unwrap();
    assert!(saved.state.contains_key("tracer::a"));
    assert!(!saved.state.contains_key("tracer::b"));
}

#[tokio::test]
async fn store_is_written_after_every_committed_step() {
    let log = new_log();
    let tracer = Tracer::new(log)
        .plan("a", StepPlan::silent(Then::Next("b")))
        .plan("b", StepPlan::silent(Then::Next("c")))
        .plan("c", StepPlan::silent(Then::Finish));
    let store = MemoryStore::new();
    let mut harness = tracer_harness(tracer, Vec::new(), store.clone());

    harness.navigator.run(tracer_step("a")).await;

    // Three commits plus the final write on the way out.
    assert_eq!(store.save_count(), 4);
    let saved = store.document().unwrap();
    assert_eq!(saved.state.len(), 3);
    assert!(saved.session_id.is_some());
    assert!(saved.error.is_none());
}
