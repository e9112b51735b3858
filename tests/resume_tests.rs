mod common;

use common::{
    discovery_rig, envoy_metrics, new_log, tracer_harness, tracer_step, FakeCluster, Tracer,
    StepPlan, Then,
};
use manifest_builder::config::BuilderConfig;
use manifest_builder::prompt::ScriptedAnswer;
use manifest_builder::wizard::navigator::RESUME_TITLE;
use manifest_builder::wizard::{
    MemoryStore, ResumeDecision, ResumeDocument, RunOutcome, StepState, MSG_BACK_ON_RESUME,
};

fn three_screens(log: common::SharedLog) -> Tracer {
    Tracer::new(log)
        .plan("a", StepPlan::ask(Then::Next("b")).writing("endpoint", "http://prom"))
        .plan("b", StepPlan::ask(Then::Next("c")))
        .plan("c", StepPlan::ask(Then::Finish))
}

fn saved_progress() -> ResumeDocument {
    let mut state = StepState::new();
    state.set_interacted(true);
    state.insert("tracer_step", "a");
    let mut document = ResumeDocument::default();
    document.state.insert(tracer_step("a").key(), state);
    document
}

#[tokio::test]
async fn resumed_run_replays_answered_steps_silently() {
    let store = MemoryStore::new();
    let mut first = tracer_harness(
        three_screens(new_log()),
        vec![ScriptedAnswer::Ok, ScriptedAnswer::Ok, ScriptedAnswer::Escape],
        store.clone(),
    );
    let report = first.navigator.run(tracer_step("a")).await;
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    let interrupted = store.document().unwrap();
    assert_eq!(interrupted.state.len(), 2);

    let log = new_log();
    let mut second = tracer_harness(
        three_screens(log.clone()),
        vec![ScriptedAnswer::Yes, ScriptedAnswer::Ok],
        store.clone(),
    );
    assert_eq!(
        second.navigator.offer_resume().await.unwrap(),
        ResumeDecision::Resume
    );
    let report = second.navigator.run(tracer_step("a")).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(second.prompts.served(), vec![RESUME_TITLE, "c"]);
    assert_eq!(
        store.document().unwrap().session_id,
        interrupted.session_id,
        "a resumed run keeps its session"
    );
    let log = log.lock().unwrap();
    assert_eq!(log.count("run:a"), 1);
    assert_eq!(log.count("forward:a"), 1);
    assert!(log.missing.is_empty());
}

#[tokio::test]
async fn recorded_fault_is_replayed_without_rerunning_the_step() {
    let plan = |log| {
        Tracer::new(log)
            .plan("a", StepPlan::ask(Then::Next("b")))
            .plan("b", StepPlan::silent(Then::Fail("boom")))
            .plan("recover", StepPlan::ask(Then::Finish))
    };
    let store = MemoryStore::new();
    let first_log = new_log();
    let mut first = tracer_harness(
        plan(first_log.clone()),
        vec![ScriptedAnswer::Ok, ScriptedAnswer::Escape],
        store.clone(),
    );
    assert_eq!(
        first.navigator.run(tracer_step("a")).await.outcome,
        RunOutcome::Cancelled
    );
    assert_eq!(first_log.lock().unwrap().count("run:b"), 1);

    let log = new_log();
    let mut second = tracer_harness(
        plan(log.clone()),
        vec![ScriptedAnswer::Yes, ScriptedAnswer::Ok],
        store,
    );
    second.navigator.offer_resume().await.unwrap();
    let report = second.navigator.run(tracer_step("a")).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(second.prompts.served(), vec![RESUME_TITLE, "recover"]);
    let log = log.lock().unwrap();
    assert_eq!(log.count("run:b"), 0);
    assert_eq!(log.count("error:b"), 1);
    assert_eq!(
        log.faults,
        first_log.lock().unwrap().faults,
        "the replayed fault is the recorded one"
    );
}

#[tokio::test]
async fn declining_resume_discards_saved_progress() {
    let store = MemoryStore::with_document(saved_progress());
    let log = new_log();
    let mut harness = tracer_harness(
        three_screens(log.clone()),
        vec![
            ScriptedAnswer::No,
            ScriptedAnswer::Ok,
            ScriptedAnswer::Ok,
            ScriptedAnswer::Ok,
        ],
        store.clone(),
    );

    assert_eq!(
        harness.navigator.offer_resume().await.unwrap(),
        ResumeDecision::StartFresh
    );
    assert!(store.document().is_none());

    let report = harness.navigator.run(tracer_step("a")).await;
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(harness.prompts.served(), vec![RESUME_TITLE, "a", "b", "c"]);
}

#[tokio::test]
async fn back_on_resume_prompt_ends_the_session() {
    let store = MemoryStore::with_document(saved_progress());
    let mut harness = tracer_harness(three_screens(new_log()), vec![ScriptedAnswer::Back], store.clone());

    assert_eq!(
        harness.navigator.offer_resume().await.unwrap(),
        ResumeDecision::BackedOut
    );
    assert_eq!(
        harness.navigator.session().messages,
        vec![MSG_BACK_ON_RESUME.to_string()]
    );
    assert_eq!(store.document(), Some(saved_progress()), "saved progress is kept");
}

#[tokio::test]
async fn escape_on_resume_prompt_cancels() {
    let store = MemoryStore::with_document(saved_progress());
    let mut harness = tracer_harness(three_screens(new_log()), vec![ScriptedAnswer::Escape], store);

    assert_eq!(
        harness.navigator.offer_resume().await.unwrap(),
        ResumeDecision::Cancelled
    );
    assert!(harness.cancel.is_cancelled());
}

#[tokio::test]
async fn nothing_is_asked_without_saved_progress() {
    let mut harness = tracer_harness(three_screens(new_log()), Vec::new(), MemoryStore::new());

    assert_eq!(
        harness.navigator.offer_resume().await.unwrap(),
        ResumeDecision::NothingSaved
    );
    assert!(harness.prompts.served().is_empty());
}

fn configured() -> BuilderConfig {
    BuilderConfig {
        account: Some("acme.com".into()),
        app: Some("shop".into()),
        token: Some("s3cret".into()),
        ..BuilderConfig::default()
    }
}

fn discovery_answers() -> Vec<ScriptedAnswer> {
    vec![
        ScriptedAnswer::select(0),
        ScriptedAnswer::Keep,
        ScriptedAnswer::Keep,
        ScriptedAnswer::select(0),
        ScriptedAnswer::Keep,
        ScriptedAnswer::Ok,
    ]
}

#[tokio::test]
async fn interrupted_discovery_resumes_to_the_same_manifests() {
    let mut straight = discovery_rig(
        configured(),
        FakeCluster::shop(),
        envoy_metrics(),
        discovery_answers(),
        MemoryStore::new(),
    );
    let report = straight.harness.navigator.run(straight.initial.clone()).await;
    assert_eq!(report.outcome, RunOutcome::Completed, "{:?}", report.fault);
    let expected = straight.emitter.last().unwrap();

    for cut in 1..discovery_answers().len() {
        let store = MemoryStore::new();
        let mut answers: Vec<ScriptedAnswer> = discovery_answers().into_iter().take(cut).collect();
        answers.push(ScriptedAnswer::Escape);
        let mut first = discovery_rig(
            configured(),
            FakeCluster::shop(),
            envoy_metrics(),
            answers,
            store.clone(),
        );
        let report = first.harness.navigator.run(first.initial.clone()).await;
        assert_eq!(report.outcome, RunOutcome::Cancelled, "cut after {cut} answers");

        let mut answers = vec![ScriptedAnswer::Yes];
        answers.extend(discovery_answers().into_iter().skip(cut));
        let mut second = discovery_rig(
            configured(),
            FakeCluster::shop(),
            envoy_metrics(),
            answers,
            store,
        );
        assert_eq!(
            second.harness.navigator.offer_resume().await.unwrap(),
            ResumeDecision::Resume
        );
        let report = second.harness.navigator.run(second.initial.clone()).await;
        assert_eq!(report.outcome, RunOutcome::Completed, "cut after {cut} answers");
        assert_eq!(second.harness.prompts.remaining(), 0, "cut after {cut} answers");

        let resumed = second.emitter.last().unwrap();
        assert_eq!(resumed.servo_config, expected.servo_config, "cut after {cut} answers");
        assert_eq!(resumed.override_doc, expected.override_doc, "cut after {cut} answers");
        assert_eq!(resumed.servo, expected.servo, "cut after {cut} answers");
    }
}
