//! Step executor - runs one attempt of a step's work

use crate::core::{FailureKind, PipelineState, StepFailure, StepOutcome};
use crate::registry::{Configuration, ConfigurationStore, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The externally defined work of one step
///
/// Implementations receive a snapshot of the pipeline state and the step's
/// current configuration, and return the value to record for the step.
#[async_trait]
pub trait StepWork: Send + Sync {
    async fn perform(
        &self,
        step_id: &str,
        state: &PipelineState,
        config: &Configuration,
    ) -> anyhow::Result<Value>;
}

/// Parameters of one attempt
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    pub step_id: &'a str,

    /// 1-based attempt number
    pub number: usize,

    /// Revisions committed so far in this retry loop
    pub revisions: usize,

    pub timeout: Duration,

    pub cancel: &'a CancellationToken,
}

/// Executes a single attempt of a step
///
/// Never panics or returns an error: every fault of the work, the timeout,
/// cancellation, or the configuration store becomes a
/// [`StepOutcome::Failure`].
pub struct StepExecutor {
    store: Arc<dyn ConfigurationStore>,
    legacy_error_sentinel: bool,
}

impl StepExecutor {
    pub fn new(store: Arc<dyn ConfigurationStore>) -> Self {
        Self {
            store,
            legacy_error_sentinel: true,
        }
    }

    /// Whether string values starting with `ERROR:` count as failures
    pub fn with_legacy_sentinel(mut self, enabled: bool) -> Self {
        self.legacy_error_sentinel = enabled;
        self
    }

    /// Run one attempt, writing the value into `state` on success
    pub async fn execute(
        &self,
        work: &Arc<dyn StepWork>,
        attempt: &Attempt<'_>,
        state: &mut PipelineState,
    ) -> StepOutcome {
        self.execute_versioned(work, attempt, state).await.0
    }

    /// Like [`execute`](Self::execute), also returning the configuration
    /// version the attempt ran against
    ///
    /// The version is `None` for an unversioned seed or when the
    /// configuration could not be read.
    pub async fn execute_versioned(
        &self,
        work: &Arc<dyn StepWork>,
        attempt: &Attempt<'_>,
        state: &mut PipelineState,
    ) -> (StepOutcome, Option<u64>) {
        let step_id = attempt.step_id;
        info!("Executing step: {} (attempt {})", step_id, attempt.number);

        let config = match self.store.read(step_id).await {
            Ok(config) => config,
            Err(StoreError::NotFound(_)) => {
                error!("Step {} has no configuration", step_id);
                let failure = StepFailure::new(
                    FailureKind::ConfigurationNotFound,
                    format!("no configuration found for step '{}'", step_id),
                );
                return (StepOutcome::Failure(failure), None);
            }
            Err(e) => {
                error!("Failed to read configuration for step {}: {}", step_id, e);
                let failure = StepFailure::new(
                    FailureKind::Persistence,
                    format!("failed to read configuration: {}", e),
                );
                return (StepOutcome::Failure(failure), None);
            }
        };
        debug!(
            "Configuration for step {}: version {:?}, {} bytes",
            step_id,
            config.version,
            config.content.len()
        );

        let version = config.version;
        let outcome = self.run_work(work, attempt, state.clone(), config).await;
        let outcome = if self.legacy_error_sentinel {
            outcome.normalize_legacy()
        } else {
            outcome
        };

        let outcome = match outcome {
            StepOutcome::Success(value) => {
                info!("Step {} completed successfully", step_id);
                state.record_success(step_id, value.clone(), attempt.number, attempt.revisions);
                StepOutcome::Success(value)
            }
            StepOutcome::Failure(failure) => {
                warn!(
                    "Step {} attempt {} failed ({:?}): {}",
                    step_id, attempt.number, failure.kind, failure.message
                );
                StepOutcome::Failure(failure)
            }
        };
        (outcome, version)
    }

    /// Run the work on its own task, racing it against timeout and cancellation
    async fn run_work(
        &self,
        work: &Arc<dyn StepWork>,
        attempt: &Attempt<'_>,
        snapshot: PipelineState,
        config: Configuration,
    ) -> StepOutcome {
        let work = work.clone();
        let step_id = attempt.step_id.to_string();
        let mut handle = tokio::spawn(async move {
            work.perform(&step_id, &snapshot, &config).await
        });
        let abort = handle.abort_handle();

        tokio::select! {
            biased;
            _ = attempt.cancel.cancelled() => {
                abort.abort();
                StepOutcome::Failure(StepFailure::new(
                    FailureKind::Cancelled,
                    "cancelled while the step was running",
                ))
            }
            joined = tokio::time::timeout(attempt.timeout, &mut handle) => match joined {
                Err(_) => {
                    abort.abort();
                    StepOutcome::Failure(StepFailure::new(
                        FailureKind::Timeout,
                        format!("Timeout after {} seconds", attempt.timeout.as_secs()),
                    ))
                }
                Ok(Err(join_error)) if join_error.is_panic() => {
                    StepOutcome::Failure(StepFailure::new(
                        FailureKind::Panicked,
                        format!("step panicked: {}", panic_message(join_error.into_panic())),
                    ))
                }
                Ok(Err(join_error)) => StepOutcome::Failure(StepFailure::new(
                    FailureKind::Cancelled,
                    join_error.to_string(),
                )),
                Ok(Ok(Ok(value))) => StepOutcome::Success(value),
                Ok(Ok(Err(e))) => StepOutcome::Failure(StepFailure::step(format!("{:#}", e))),
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
