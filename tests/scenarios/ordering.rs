//! Test: steps run strictly in order and thread state forward

use crate::helpers::*;
use autofix_pipeline::core::ExecutionStatus;
use autofix_pipeline::PipelineError;
use serde_json::json;

#[tokio::test]
async fn test_steps_run_in_given_order() {
    let steps = ["eda_agent", "feature_engineering_agent", "modeling_agent", "evaluation_agent"];
    let store = seeded_store(&steps).await;
    let log = call_log();

    let mut engine = engine(store, ScriptedCorrector::new(), 3);
    let mut works = Vec::new();
    for step in steps {
        let work = ScriptedWork::succeeding(json!(format!("{} output", step)), &log);
        engine.register(step, work.clone());
        works.push(work);
    }

    // Registration order does not matter, the run order does
    let order = ["eda_agent", "modeling_agent", "feature_engineering_agent", "evaluation_agent"];
    let state = engine.run(&order).await.unwrap();

    assert_eq!(state.status, ExecutionStatus::Completed);
    assert_eq!(*log.lock().unwrap(), order.to_vec());
    let recorded: Vec<&str> = state.entries().map(|(id, _)| id).collect();
    assert_eq!(recorded, order.to_vec());

    // Every step saw the outputs of the steps before it
    for (position, step) in order.iter().enumerate() {
        let index = steps.iter().position(|s| s == step).unwrap();
        assert_eq!(works[index].seen()[0].state_len, position);
    }
}

#[tokio::test]
async fn test_retries_finish_before_next_step_starts() {
    let store = seeded_store(&["a", "b", "c"]).await;
    let log = call_log();
    let a = ScriptedWork::succeeding(json!(1), &log);
    let b = ScriptedWork::new(
        vec![Scripted::Fail("first"), Scripted::Fail("second"), Scripted::Succeed(json!(2))],
        &log,
    );
    let c = ScriptedWork::succeeding(json!(3), &log);

    let mut engine = engine(store, ScriptedCorrector::new(), 3);
    engine.register("a", a);
    engine.register("b", b);
    engine.register("c", c);

    let state = engine.run(&["a", "b", "c"]).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "b", "b", "c"]);
    assert_eq!(state.value("b"), Some(&json!(2)));
}

#[tokio::test]
async fn test_earlier_entries_are_never_removed() {
    let store = seeded_store(&["a", "b"]).await;
    let log = call_log();
    let mut engine = engine(store, ScriptedCorrector::new(), 2);
    engine.register("a", ScriptedWork::succeeding(json!("kept"), &log));
    engine.register("b", ScriptedWork::always_failing("nope", &log));

    let state = engine.run(&["a", "b"]).await.unwrap();

    assert_eq!(state.value("a"), Some(&json!("kept")));
    assert!(state.get("b").unwrap().is_failed());
    assert_eq!(state.len(), 2);
}

#[tokio::test]
async fn test_missing_configuration_is_fatal_at_start() {
    let store = seeded_store(&["eda"]).await;
    let log = call_log();
    let eda = ScriptedWork::succeeding(json!("x"), &log);
    let model = ScriptedWork::succeeding(json!("y"), &log);

    let mut engine = engine(store, ScriptedCorrector::new(), 3);
    engine.register("eda", eda.clone());
    engine.register("model", model);

    let err = engine.run(&["eda", "model"]).await.unwrap_err();
    assert!(matches!(err, PipelineError::ConfigurationNotFound(ref id) if id == "model"));

    // Nothing ran
    assert_eq!(eda.calls(), 0);
    assert!(log.lock().unwrap().is_empty());
}
