//! Test: concurrent runs on one engine take turns on a shared step

use crate::helpers::*;
use async_trait::async_trait;
use autofix_pipeline::core::PipelineState;
use autofix_pipeline::execution::StepWork;
use autofix_pipeline::registry::{Configuration, ConfigurationStore};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Always fails after a short pause, tracking overlapping attempts
#[derive(Default)]
struct SlowFailure {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    versions: Mutex<Vec<Option<u64>>>,
}

#[async_trait]
impl StepWork for SlowFailure {
    async fn perform(&self, _: &str, _: &PipelineState, config: &Configuration) -> anyhow::Result<Value> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.versions.lock().unwrap().push(config.version);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        anyhow::bail!("gradient exploded")
    }
}

#[tokio::test]
async fn test_concurrent_runs_do_not_interleave_a_step() {
    let store = seeded_store(&["model"]).await;
    let work = Arc::new(SlowFailure::default());

    let mut engine = engine(store.clone(), ScriptedCorrector::new(), 3);
    engine.register("model", work.clone());
    let engine = Arc::new(engine);

    let first = engine.clone();
    let second = engine.clone();
    let (a, b) = tokio::join!(first.run(&["model"]), second.run(&["model"]));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(work.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(a.get("model").unwrap().attempts(), 3);
    assert_eq!(b.get("model").unwrap().attempts(), 3);

    // The second loop starts from where the first one left the configuration
    assert_eq!(
        *work.versions.lock().unwrap(),
        vec![None, Some(1), Some(2), Some(2), Some(3), Some(4)]
    );
    let versions: Vec<u64> = store
        .history("model")
        .await
        .unwrap()
        .iter()
        .map(|r| r.version)
        .collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
}
