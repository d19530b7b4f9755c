//! Test: the corrector itself fails

use crate::helpers::*;
use async_trait::async_trait;
use autofix_pipeline::core::{ExecutionStatus, FailureKind};
use autofix_pipeline::execution::{CorrectionError, Corrector};
use autofix_pipeline::registry::ConfigurationStore;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_correction_failure_is_terminal() {
    let store = seeded_store(&["model", "eval"]).await;
    let corrector = FailingCorrector::new();
    let log = call_log();
    let model = ScriptedWork::new(
        vec![Scripted::Fail("LinAlgError: singular matrix"), Scripted::Succeed(json!("fit"))],
        &log,
    );
    let eval = ScriptedWork::succeeding(json!("scored"), &log);

    let mut engine = engine(store.clone(), corrector.clone(), 3);
    engine.register("model", model.clone());
    engine.register("eval", eval.clone());

    let state = engine.run(&["model", "eval"]).await.unwrap();

    // No retry of the uncorrected configuration
    assert_eq!(model.calls(), 1);
    assert_eq!(corrector.calls(), 1);
    assert!(store.history("model").await.unwrap().is_empty());
    assert_eq!(store.read("model").await.unwrap().version, None);

    let marker = state.get("model").unwrap().failure().unwrap().clone();
    assert_eq!(marker.kind, FailureKind::CorrectionFailed);
    assert_eq!(marker.attempts, 1);
    assert_eq!(marker.revisions, 0);
    assert_eq!(marker.last_revision, None);
    assert!(marker.error.starts_with("LinAlgError: singular matrix; correction failed"));
    assert!(marker.error.contains("model unavailable"));

    // The pipeline still proceeds
    assert_eq!(eval.calls(), 1);
    assert_eq!(state.status, ExecutionStatus::CompletedWithFailures);
}

/// Corrects once, then its backend goes away
#[derive(Default)]
struct FlakyCorrector {
    calls: AtomicUsize,
}

#[async_trait]
impl Corrector for FlakyCorrector {
    async fn propose(&self, _: &str, current: &str, _: &str) -> Result<String, CorrectionError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(format!("{}\nUse the 'Adj Close' column.", current))
        } else {
            Err(CorrectionError::EmptyProposal)
        }
    }
}

#[tokio::test]
async fn test_correction_failure_after_a_committed_revision() {
    let store = seeded_store(&["model"]).await;
    let log = call_log();
    let work = ScriptedWork::always_failing("still failing", &log);

    let mut engine = engine(store.clone(), Arc::new(FlakyCorrector::default()), 5);
    engine.register("model", work.clone());
    let state = engine.run(&["model"]).await.unwrap();

    assert_eq!(work.calls(), 2);
    let marker = state.get("model").unwrap().failure().unwrap().clone();
    assert_eq!(marker.kind, FailureKind::CorrectionFailed);
    assert_eq!(marker.attempts, 2);
    assert_eq!(marker.revisions, 1);
    assert_eq!(marker.last_revision, Some(1));

    // The committed revision stays current
    let current = store.read("model").await.unwrap();
    assert_eq!(current.version, Some(1));
    assert!(current.content.ends_with("Use the 'Adj Close' column."));
}
