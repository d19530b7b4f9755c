//! Events emitted while a pipeline runs

use crate::core::{ExecutionStatus, FailureKind};
use std::sync::Arc;
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    PipelineStarted {
        run_id: Uuid,
        steps: Vec<String>,
    },
    StepStarted {
        step_id: String,
        attempt: usize,
        max_attempts: usize,
    },
    StepAttemptFailed {
        step_id: String,
        attempt: usize,
        kind: FailureKind,
        error: String,
    },
    /// A corrected configuration was committed before the next attempt
    StepCorrected {
        step_id: String,
        version: u64,
    },
    StepSucceeded {
        step_id: String,
        attempts: usize,
    },
    StepExhausted {
        step_id: String,
        attempts: usize,
        kind: FailureKind,
        error: String,
    },
    PipelineCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Fan-out of events to registered handlers
#[derive(Clone, Default)]
pub struct EventSink {
    handlers: Vec<EventHandler>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    pub fn emit(&self, event: ExecutionEvent) {
        for handler in &self.handlers {
            handler(&event);
        }
    }
}
