//! Test: a failing step is repaired and succeeds on a later attempt

use crate::helpers::*;
use autofix_pipeline::core::{ExecutionStatus, FailureKind};
use autofix_pipeline::execution::ExecutionEvent;
use autofix_pipeline::registry::{ConfigurationStore, Origin};
use serde_json::json;

#[tokio::test]
async fn test_fails_twice_then_succeeds() {
    let store = seeded_store(&["model"]).await;
    let corrector = ScriptedCorrector::new();
    let log = call_log();
    let work = ScriptedWork::new(
        vec![
            Scripted::Fail("KeyError: 'Close'"),
            Scripted::Fail("ValueError: could not convert string to float"),
            Scripted::Succeed(json!({"rmse": 1.92})),
        ],
        &log,
    );

    let mut engine = engine(store.clone(), corrector.clone(), 3);
    engine.register("model", work.clone());
    let events = record_events(&mut engine);

    let state = engine.run(&["model"]).await.unwrap();

    assert_eq!(work.calls(), 3);
    assert_eq!(state.status, ExecutionStatus::Completed);
    assert_eq!(state.value("model"), Some(&json!({"rmse": 1.92})));
    assert_eq!(state.get("model").unwrap().attempts(), 3);
    assert_eq!(state.get("model").unwrap().revisions(), 2);

    // Failure context reflects the last failure before success
    assert_eq!(state.failed_step.as_deref(), Some("model"));
    assert_eq!(
        state.error_message.as_deref(),
        Some("ValueError: could not convert string to float")
    );

    let history = store.history("model").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.origin == Origin::AutoFix));
    assert_eq!(history[0].error.as_deref(), Some("KeyError: 'Close'"));
    assert_eq!(
        history[1].error.as_deref(),
        Some("ValueError: could not convert string to float")
    );

    assert_eq!(
        corrector.calls(),
        vec![
            ("model".to_string(), "KeyError: 'Close'".to_string()),
            (
                "model".to_string(),
                "ValueError: could not convert string to float".to_string()
            ),
        ]
    );

    let events = events.lock().unwrap();
    let corrected: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StepCorrected { version, .. } => Some(*version),
            _ => None,
        })
        .collect();
    assert_eq!(corrected, vec![1, 2]);
}

#[tokio::test]
async fn test_each_attempt_sees_the_latest_revision() {
    let store = seeded_store(&["features"]).await;
    let log = call_log();
    let work = ScriptedWork::new(
        vec![
            Scripted::Fail("missing lag features"),
            Scripted::Succeed(json!("features ready")),
        ],
        &log,
    );

    let mut engine = engine(store.clone(), ScriptedCorrector::new(), 3);
    engine.register("features", work.clone());
    engine.run(&["features"]).await.unwrap();

    let seen = work.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].version, None);
    assert_eq!(seen[0].error_message, None);
    assert_eq!(seen[1].version, Some(1));
    assert_eq!(
        seen[1].content,
        "You are features. Do your task.\n# fix 1: missing lag features"
    );
    assert_eq!(seen[1].failed_step.as_deref(), Some("features"));
    assert_eq!(seen[1].error_message.as_deref(), Some("missing lag features"));

    let current = store.read("features").await.unwrap();
    assert_eq!(current.content, seen[1].content);
    assert_eq!(current.version, Some(1));
}

#[tokio::test]
async fn test_legacy_error_sentinel_triggers_correction() {
    let store = seeded_store(&["eda"]).await;
    let log = call_log();
    let work = ScriptedWork::new(
        vec![
            Scripted::Sentinel("train.csv not found"),
            Scripted::Succeed(json!("summary")),
        ],
        &log,
    );

    let mut engine = engine(store.clone(), ScriptedCorrector::new(), 3);
    engine.register("eda", work.clone());
    let events = record_events(&mut engine);

    let state = engine.run(&["eda"]).await.unwrap();

    assert_eq!(work.calls(), 2);
    assert_eq!(state.value("eda"), Some(&json!("summary")));
    let history = store.history("eda").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].error.as_deref(), Some("train.csv not found"));

    assert!(events.lock().unwrap().contains(&ExecutionEvent::StepAttemptFailed {
        step_id: "eda".to_string(),
        attempt: 1,
        kind: FailureKind::Step,
        error: "train.csv not found".to_string(),
    }));
}

#[tokio::test]
async fn test_sentinel_is_a_value_when_disabled() {
    let store = seeded_store(&["eda"]).await;
    let log = call_log();
    let work = ScriptedWork::new(vec![Scripted::Sentinel("not really")], &log);

    let mut engine = engine(store, ScriptedCorrector::new(), 3).with_legacy_sentinel(false);
    engine.register("eda", work.clone());

    let state = engine.run(&["eda"]).await.unwrap();
    assert_eq!(work.calls(), 1);
    assert_eq!(state.value("eda"), Some(&json!("ERROR: not really")));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_attempt_is_corrected() {
    let store = seeded_store(&["eval"]).await;
    let log = call_log();
    let work = ScriptedWork::new(vec![Scripted::Hang, Scripted::Succeed(json!(0.93))], &log);

    let mut engine = engine(store.clone(), ScriptedCorrector::new(), 3);
    let mut step_policy = policy(3);
    step_policy.step_timeout = std::time::Duration::from_secs(30);
    engine.register_with_policy("eval", work.clone(), step_policy);

    let state = engine.run(&["eval"]).await.unwrap();

    assert_eq!(work.calls(), 2);
    assert_eq!(state.value("eval"), Some(&json!(0.93)));
    let history = store.history("eval").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].error.as_deref(), Some("Timeout after 30 seconds"));
}
