//! Test: a step that keeps failing is recorded and the pipeline carries on

use crate::helpers::*;
use autofix_pipeline::core::{ExecutionStatus, FailureKind, StepEntry};
use autofix_pipeline::execution::ExecutionEvent;
use autofix_pipeline::registry::{ConfigurationStore, Origin};
use serde_json::json;

#[tokio::test]
async fn test_exhausted_step_is_recorded_as_failure() {
    let store = seeded_store(&["eval"]).await;
    let corrector = ScriptedCorrector::new();
    let log = call_log();
    let work = ScriptedWork::always_failing("AssertionError: forecast length mismatch", &log);

    let mut engine = engine(store.clone(), corrector.clone(), 3);
    engine.register("eval", work.clone());
    let events = record_events(&mut engine);

    let state = engine.run(&["eval"]).await.unwrap();

    assert_eq!(work.calls(), 3);
    // The third failure reaches the bound and is not corrected
    assert_eq!(corrector.calls().len(), 2);
    let history = store.history("eval").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.origin == Origin::AutoFix));

    assert_eq!(state.status, ExecutionStatus::CompletedWithFailures);
    assert_eq!(state.failed_steps(), vec!["eval".to_string()]);
    match state.get("eval") {
        Some(StepEntry::Failed(marker)) => {
            assert_eq!(marker.error, "AssertionError: forecast length mismatch");
            assert_eq!(marker.kind, FailureKind::Step);
            assert_eq!(marker.attempts, 3);
            assert_eq!(marker.revisions, 2);
            assert_eq!(marker.last_revision, Some(history[1].version));
        }
        other => panic!("expected failure marker, got {:?}", other),
    }
    assert_eq!(state.failed_step.as_deref(), Some("eval"));
    assert_eq!(
        state.error_message.as_deref(),
        Some("AssertionError: forecast length mismatch")
    );

    let events = events.lock().unwrap();
    assert!(events.contains(&ExecutionEvent::StepExhausted {
        step_id: "eval".to_string(),
        attempts: 3,
        kind: FailureKind::Step,
        error: "AssertionError: forecast length mismatch".to_string(),
    }));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::PipelineCompleted {
            status: ExecutionStatus::CompletedWithFailures,
            ..
        })
    ));
}

#[tokio::test]
async fn test_later_steps_run_after_a_failure() {
    let store = seeded_store(&["eda", "model", "eval"]).await;
    let log = call_log();
    let eda = ScriptedWork::succeeding(json!("eda ok"), &log);
    let model = ScriptedWork::always_failing("model diverged", &log);
    let eval = ScriptedWork::succeeding(json!("eval ok"), &log);

    let mut engine = engine(store, ScriptedCorrector::new(), 2);
    engine.register("eda", eda.clone());
    engine.register("model", model.clone());
    engine.register("eval", eval.clone());

    let state = engine.run(&["eda", "model", "eval"]).await.unwrap();

    assert_eq!(model.calls(), 2);
    assert_eq!(eval.calls(), 1);
    assert_eq!(state.len(), 3);
    assert_eq!(state.value("eda"), Some(&json!("eda ok")));
    assert!(state.get("model").unwrap().is_failed());
    assert_eq!(state.value("eval"), Some(&json!("eval ok")));

    // The later step saw the failure context
    let seen = eval.seen();
    assert_eq!(seen[0].failed_step.as_deref(), Some("model"));
    assert_eq!(seen[0].error_message.as_deref(), Some("model diverged"));
}

#[tokio::test]
async fn test_single_attempt_policy_never_corrects() {
    let store = seeded_store(&["eda"]).await;
    let corrector = ScriptedCorrector::new();
    let log = call_log();
    let work = ScriptedWork::always_failing("boom", &log);

    let mut engine = engine(store.clone(), corrector.clone(), 0);
    engine.register("eda", work.clone());

    let state = engine.run(&["eda"]).await.unwrap();

    assert_eq!(work.calls(), 1);
    assert!(corrector.calls().is_empty());
    assert!(store.history("eda").await.unwrap().is_empty());
    assert_eq!(state.get("eda").unwrap().attempts(), 1);
    assert!(state.get("eda").unwrap().failure().unwrap().last_revision.is_none());
}

#[tokio::test]
async fn test_marker_names_the_version_the_attempt_used() {
    let store = seeded_store(&["eda"]).await;
    store
        .write("eda", "Plot the residuals.", Origin::Manual, None)
        .await
        .unwrap();
    store
        .write("eda", "Plot the residuals by month.", Origin::Manual, None)
        .await
        .unwrap();
    let log = call_log();
    let work = ScriptedWork::always_failing("empty figure", &log);

    let mut engine = engine(store.clone(), ScriptedCorrector::new(), 1);
    engine.register("eda", work.clone());
    let state = engine.run(&["eda"]).await.unwrap();

    let marker = state.get("eda").unwrap().failure().unwrap();
    assert_eq!(marker.attempts, 1);
    assert_eq!(marker.revisions, 0);
    assert_eq!(marker.last_revision, Some(2));
    assert_eq!(work.seen()[0].content, "Plot the residuals by month.");
}
