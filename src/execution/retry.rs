//! Retry controller - bounded retry loop with self-repair between attempts

use crate::core::{FailureKind, FailureMarker, PipelineState, StepFailure, StepOutcome};
use crate::execution::{
    Attempt, CorrectionError, Corrector, EventSink, ExecutionEvent, StepExecutor, StepWork,
};
use crate::registry::{ConfigurationStore, Origin, Revision};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_CORRECTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Retry bounds for one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_retries: usize,

    /// Time allowed for each attempt
    pub step_timeout: Duration,

    /// Time allowed for each call to the corrector
    pub correction_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            correction_timeout: DEFAULT_CORRECTION_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> usize {
        self.max_retries.max(1)
    }
}

/// One mutex per step id, held for the duration of a retry loop
#[derive(Default)]
pub struct StepLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StepLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, step_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(step_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// A registered step: its id, its work, and its retry policy
#[derive(Clone)]
pub struct PipelineStep {
    pub id: String,
    pub work: Arc<dyn StepWork>,
    pub policy: RetryPolicy,
}

/// How a step's retry loop ended
#[derive(Debug, Clone)]
pub enum StepResolution {
    Succeeded {
        attempts: usize,
        revisions: Vec<Revision>,
    },
    Exhausted {
        attempts: usize,
        revisions: Vec<Revision>,
        failure: StepFailure,
    },
}

impl StepResolution {
    pub fn is_success(&self) -> bool {
        matches!(self, StepResolution::Succeeded { .. })
    }

    pub fn attempts(&self) -> usize {
        match self {
            StepResolution::Succeeded { attempts, .. }
            | StepResolution::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Revisions committed during the loop, oldest first
    pub fn revisions(&self) -> &[Revision] {
        match self {
            StepResolution::Succeeded { revisions, .. }
            | StepResolution::Exhausted { revisions, .. } => revisions,
        }
    }
}

/// Wraps the step executor with the attempt / correct / commit loop
pub struct RetryController {
    executor: StepExecutor,
    store: Arc<dyn ConfigurationStore>,
    corrector: Arc<dyn Corrector>,
    locks: Arc<StepLocks>,
}

impl RetryController {
    pub fn new(
        executor: StepExecutor,
        store: Arc<dyn ConfigurationStore>,
        corrector: Arc<dyn Corrector>,
    ) -> Self {
        Self {
            executor,
            store,
            corrector,
            locks: Arc::new(StepLocks::new()),
        }
    }

    /// Share step locks with other controllers over the same store
    pub fn with_locks(mut self, locks: Arc<StepLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Run one step to `Succeeded` or `ExhaustedFailure`
    ///
    /// The terminal entry for the step is written into `state` either way.
    pub async fn run(
        &self,
        step: &PipelineStep,
        state: &mut PipelineState,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> StepResolution {
        let _guard = self.locks.acquire(&step.id).await;
        let max_attempts = step.policy.max_attempts();
        let mut revisions: Vec<Revision> = Vec::new();
        let mut number = 1;

        loop {
            events.emit(ExecutionEvent::StepStarted {
                step_id: step.id.clone(),
                attempt: number,
                max_attempts,
            });

            let attempt = Attempt {
                step_id: &step.id,
                number,
                revisions: revisions.len(),
                timeout: step.policy.step_timeout,
                cancel,
            };

            let (outcome, version) = self
                .executor
                .execute_versioned(&step.work, &attempt, state)
                .await;
            let failure = match outcome {
                StepOutcome::Success(_) => {
                    events.emit(ExecutionEvent::StepSucceeded {
                        step_id: step.id.clone(),
                        attempts: number,
                    });
                    return StepResolution::Succeeded {
                        attempts: number,
                        revisions,
                    };
                }
                StepOutcome::Failure(failure) => failure,
            };

            events.emit(ExecutionEvent::StepAttemptFailed {
                step_id: step.id.clone(),
                attempt: number,
                kind: failure.kind,
                error: failure.message.clone(),
            });

            if !failure.kind.is_recoverable() || number >= max_attempts {
                return self.exhaust(step, state, events, number, revisions, version, failure);
            }

            let revision = match self.correct(step, &failure, cancel).await {
                Ok(revision) => revision,
                Err(terminal) => {
                    return self.exhaust(step, state, events, number, revisions, version, terminal);
                }
            };

            info!(
                "Committed {} for step {} after attempt {}",
                revision.label(),
                step.id,
                number
            );
            events.emit(ExecutionEvent::StepCorrected {
                step_id: step.id.clone(),
                version: revision.version,
            });
            revisions.push(revision);
            state.note_failure(&step.id, &failure.message);
            number += 1;
        }
    }

    /// Ask the corrector for new content and commit it
    ///
    /// Any error here is terminal for the step.
    async fn correct(
        &self,
        step: &PipelineStep,
        failure: &StepFailure,
        cancel: &CancellationToken,
    ) -> Result<Revision, StepFailure> {
        let current = self.store.read(&step.id).await.map_err(|e| {
            StepFailure::new(
                FailureKind::Persistence,
                format!("{}; could not read configuration: {}", failure.message, e),
            )
        })?;

        let timeout = step.policy.correction_timeout;
        let proposal = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CorrectionError::Cancelled),
            result = tokio::time::timeout(
                timeout,
                self.corrector.propose(&step.id, &current.content, &failure.message),
            ) => result.unwrap_or(Err(CorrectionError::Timeout(timeout))),
        };

        let content = match proposal {
            Ok(content) => content,
            Err(CorrectionError::Cancelled) => {
                return Err(StepFailure::new(
                    FailureKind::Cancelled,
                    format!("{}; correction cancelled", failure.message),
                ));
            }
            Err(e) => {
                warn!("Correction for step {} failed: {}", step.id, e);
                return Err(StepFailure::new(
                    FailureKind::CorrectionFailed,
                    format!("{}; correction failed: {}", failure.message, e),
                ));
            }
        };

        self.store
            .write(&step.id, &content, Origin::AutoFix, Some(&failure.message))
            .await
            .map_err(|e| {
                error!("Could not commit revision for step {}: {}", step.id, e);
                StepFailure::new(
                    FailureKind::Persistence,
                    format!("{}; could not commit revision: {}", failure.message, e),
                )
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn exhaust(
        &self,
        step: &PipelineStep,
        state: &mut PipelineState,
        events: &EventSink,
        attempts: usize,
        revisions: Vec<Revision>,
        version: Option<u64>,
        failure: StepFailure,
    ) -> StepResolution {
        error!(
            "Step {} exhausted after {} attempt(s) ({:?}): {}",
            step.id, attempts, failure.kind, failure.message
        );

        state.record_failure(
            &step.id,
            FailureMarker {
                error: failure.message.clone(),
                kind: failure.kind,
                attempts,
                revisions: revisions.len(),
                last_revision: version,
                failed_at: Utc::now(),
            },
        );
        events.emit(ExecutionEvent::StepExhausted {
            step_id: step.id.clone(),
            attempts,
            kind: failure.kind,
            error: failure.message.clone(),
        });

        StepResolution::Exhausted {
            attempts,
            revisions,
            failure,
        }
    }
}
