//! Test: revision log properties across attempts and runs

use crate::helpers::*;
use autofix_pipeline::registry::{ConfigurationStore, Origin};
use serde_json::json;

#[tokio::test]
async fn test_success_on_attempt_k_writes_k_minus_one_revisions() {
    for k in 1..=4usize {
        let store = seeded_store(&["step"]).await;
        let log = call_log();
        let mut script = vec![Scripted::Fail("transient"); k - 1];
        script.push(Scripted::Succeed(json!(k)));
        let work = ScriptedWork::new(script, &log);

        let mut engine = engine(store.clone(), ScriptedCorrector::new(), 4);
        engine.register("step", work.clone());
        let state = engine.run(&["step"]).await.unwrap();

        assert_eq!(work.calls(), k, "attempts for k={}", k);
        assert_eq!(state.value("step"), Some(&json!(k)));
        assert_eq!(
            store.history("step").await.unwrap().len(),
            k - 1,
            "revisions for k={}",
            k
        );
    }
}

#[tokio::test]
async fn test_versions_increase_across_runs() {
    let store = seeded_store(&["model"]).await;
    let corrector = ScriptedCorrector::new();

    for _ in 0..3 {
        let log = call_log();
        let mut engine = engine(store.clone(), corrector.clone(), 3);
        engine.register("model", ScriptedWork::always_failing("diverged", &log));
        engine.run(&["model"]).await.unwrap();
    }

    let history = store.history("model").await.unwrap();
    assert_eq!(history.len(), 6);
    let versions: Vec<u64> = history.iter().map(|r| r.version).collect();
    assert!(versions.windows(2).all(|w| w[0] < w[1]), "{:?}", versions);
    assert_eq!(versions.first(), Some(&1));

    let latest = store.latest("model").await.unwrap().unwrap();
    assert_eq!(store.read("model").await.unwrap().version, Some(latest.version));
}

#[tokio::test]
async fn test_manual_revisions_share_the_sequence() {
    let store = seeded_store(&["eda"]).await;
    store
        .write("eda", "Hand-tuned EDA prompt", Origin::Manual, None)
        .await
        .unwrap();

    let log = call_log();
    let work = ScriptedWork::new(vec![Scripted::Fail("bad plot"), Scripted::Succeed(json!("ok"))], &log);
    let mut engine = engine(store.clone(), ScriptedCorrector::new(), 3);
    engine.register("eda", work.clone());
    engine.run(&["eda"]).await.unwrap();

    let history = store.history("eda").await.unwrap();
    let summary: Vec<(u64, Origin)> = history.iter().map(|r| (r.version, r.origin)).collect();
    assert_eq!(summary, vec![(1, Origin::Manual), (2, Origin::AutoFix)]);
    assert_eq!(work.seen()[0].content, "Hand-tuned EDA prompt");
}

#[tokio::test]
async fn test_log_interleaves_steps_in_commit_order() {
    let store = seeded_store(&["a", "b"]).await;
    let log = call_log();
    let mut engine = engine(store.clone(), ScriptedCorrector::new(), 2);
    engine.register("a", ScriptedWork::always_failing("a broke", &log));
    engine.register("b", ScriptedWork::always_failing("b broke", &log));
    engine.run(&["a", "b"]).await.unwrap();

    let all = store.log().await.unwrap();
    let steps: Vec<&str> = all.iter().map(|r| r.step_id.as_str()).collect();
    assert_eq!(steps, vec!["a", "b"]);
}
