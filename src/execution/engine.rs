//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    core::{FailureKind, PipelineState},
    error::PipelineError,
    execution::{
        Corrector, EventSink, ExecutionEvent, PipelineStep, RetryController, RetryPolicy,
        StepExecutor, StepLocks, StepResolution, StepWork,
    },
    registry::{ConfigurationStore, StoreError},
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Main pipeline execution engine
///
/// Steps run strictly in the order given to [`run`](Self::run). A step that
/// exhausts its retries is recorded in the state and the run moves on.
/// Concurrent runs on one engine never interleave retry loops of the same
/// step.
pub struct ExecutionEngine {
    store: Arc<dyn ConfigurationStore>,
    corrector: Arc<dyn Corrector>,
    policy: RetryPolicy,
    legacy_error_sentinel: bool,
    variables: HashMap<String, String>,
    steps: HashMap<String, PipelineStep>,
    events: EventSink,
    locks: Arc<StepLocks>,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn ConfigurationStore>,
        corrector: Arc<dyn Corrector>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            corrector,
            policy,
            legacy_error_sentinel: true,
            variables: HashMap::new(),
            steps: HashMap::new(),
            events: EventSink::new(),
            locks: Arc::new(StepLocks::new()),
        }
    }

    pub fn with_legacy_sentinel(mut self, enabled: bool) -> Self {
        self.legacy_error_sentinel = enabled;
        self
    }

    /// Variables copied into every new run's state
    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Register the work for a step, using the engine's default policy
    pub fn register(&mut self, step_id: impl Into<String>, work: Arc<dyn StepWork>) {
        let policy = self.policy;
        self.register_with_policy(step_id, work, policy);
    }

    pub fn register_with_policy(
        &mut self,
        step_id: impl Into<String>,
        work: Arc<dyn StepWork>,
        policy: RetryPolicy,
    ) {
        let id = step_id.into();
        self.steps.insert(
            id.clone(),
            PipelineStep { id, work, policy },
        );
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.add(handler);
    }

    /// Run the steps in order
    pub async fn run<S: AsRef<str>>(&self, steps: &[S]) -> Result<PipelineState, PipelineError> {
        self.run_with_cancel(steps, CancellationToken::new()).await
    }

    /// Run the steps in order, stopping early if `cancel` fires
    pub async fn run_with_cancel<S: AsRef<str>>(
        &self,
        steps: &[S],
        cancel: CancellationToken,
    ) -> Result<PipelineState, PipelineError> {
        let plan = self.prepare(steps).await?;

        let controller = RetryController::new(
            StepExecutor::new(self.store.clone()).with_legacy_sentinel(self.legacy_error_sentinel),
            self.store.clone(),
            self.corrector.clone(),
        )
        .with_locks(self.locks.clone());

        let mut state = PipelineState::with_variables(self.variables.clone());
        state.start();
        info!("Starting pipeline run {} ({} steps)", state.run_id, plan.len());
        self.events.emit(ExecutionEvent::PipelineStarted {
            run_id: state.run_id,
            steps: plan.iter().map(|s| s.id.clone()).collect(),
        });

        let mut stopped = false;
        for step in plan {
            if cancel.is_cancelled() {
                stopped = true;
                break;
            }

            let resolution = controller.run(step, &mut state, &cancel, &self.events).await;
            if let StepResolution::Exhausted { ref failure, .. } = resolution {
                if failure.kind == FailureKind::Cancelled {
                    stopped = true;
                    break;
                }
            }
        }

        // A cancel that arrives after the last step finished changes nothing
        if stopped {
            warn!("Pipeline run {} cancelled", state.run_id);
            state.cancel();
        } else {
            state.finish();
            info!(
                "Pipeline run {} finished: {} step(s), {} failed",
                state.run_id,
                state.len(),
                state.failed_steps().len()
            );
        }

        self.events.emit(ExecutionEvent::PipelineCompleted {
            run_id: state.run_id,
            status: state.status,
        });
        Ok(state)
    }

    /// Resolve step ids and check every step can start
    async fn prepare<S: AsRef<str>>(&self, steps: &[S]) -> Result<Vec<&PipelineStep>, PipelineError> {
        if steps.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }

        let mut seen = HashSet::new();
        let mut plan = Vec::with_capacity(steps.len());
        for id in steps {
            let id = id.as_ref();
            if !seen.insert(id) {
                return Err(PipelineError::DuplicateStep(id.to_string()));
            }
            let step = self
                .steps
                .get(id)
                .ok_or_else(|| PipelineError::UnknownStep(id.to_string()))?;
            plan.push(step);
        }

        for step in &plan {
            match self.store.read(&step.id).await {
                Ok(_) => {}
                Err(StoreError::NotFound(_)) => {
                    return Err(PipelineError::ConfigurationNotFound(step.id.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(plan)
    }
}
