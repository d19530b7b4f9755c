//! Pipeline state threaded through every step of a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every step succeeded
    Completed,
    /// The run reached the end but at least one step recorded a failure
    CompletedWithFailures,
    /// The run was cancelled before the last step finished
    Cancelled,
}

/// Category of a step failure
///
/// Only [`FailureKind::is_recoverable`] kinds are handed to the corrector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The step's work returned an error
    Step,
    /// The step's work did not finish within its timeout
    Timeout,
    /// The step's work panicked
    Panicked,
    /// The run was cancelled while the step was in progress
    Cancelled,
    /// The step has no configuration in the store
    ConfigurationNotFound,
    /// The configuration store failed to read or write
    Persistence,
    /// The corrective function failed to produce a new configuration
    CorrectionFailed,
}

impl FailureKind {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FailureKind::Step | FailureKind::Timeout | FailureKind::Panicked
        )
    }
}

/// Failure recorded for a step that exhausted its retry loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureMarker {
    /// The last error seen for the step
    pub error: String,

    /// What ended the retry loop
    pub kind: FailureKind,

    /// Number of times the step's work was invoked
    pub attempts: usize,

    /// Revisions committed during the retry loop
    pub revisions: usize,

    /// Configuration version the last attempt ran against
    ///
    /// `None` when that attempt used an unversioned seed or could not read
    /// its configuration.
    pub last_revision: Option<u64>,

    pub failed_at: DateTime<Utc>,
}

/// Terminal record of one step in [`PipelineState`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepEntry {
    Succeeded {
        value: Value,
        attempts: usize,
        revisions: usize,
        completed_at: DateTime<Utc>,
    },
    Failed(FailureMarker),
}

impl StepEntry {
    /// The success value, if the step succeeded
    pub fn value(&self) -> Option<&Value> {
        match self {
            StepEntry::Succeeded { value, .. } => Some(value),
            StepEntry::Failed(_) => None,
        }
    }

    /// The failure marker, if the step failed
    pub fn failure(&self) -> Option<&FailureMarker> {
        match self {
            StepEntry::Succeeded { .. } => None,
            StepEntry::Failed(marker) => Some(marker),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepEntry::Failed(_))
    }

    pub fn attempts(&self) -> usize {
        match self {
            StepEntry::Succeeded { attempts, .. } => *attempts,
            StepEntry::Failed(marker) => marker.attempts,
        }
    }

    pub fn revisions(&self) -> usize {
        match self {
            StepEntry::Succeeded { revisions, .. } => *revisions,
            StepEntry::Failed(marker) => marker.revisions,
        }
    }
}

/// Shared state of one pipeline run
///
/// Maps step ids to their terminal [`StepEntry`] and carries the context of
/// the most recent failure. Entries are only ever inserted or replaced,
/// never removed, so later steps can always read what earlier steps wrote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique run ID
    pub run_id: Uuid,

    pub status: ExecutionStatus,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Step that failed most recently
    pub failed_step: Option<String>,

    /// Error of the most recent failure
    pub error_message: Option<String>,

    /// Pipeline variables available to step work
    #[serde(default)]
    pub variables: HashMap<String, String>,

    entries: HashMap<String, StepEntry>,

    /// Step ids in the order their entries were first written
    order: Vec<String>,
}

impl PipelineState {
    /// Create a new, empty state
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            failed_step: None,
            error_message: None,
            variables: HashMap::new(),
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Create a new state seeded with pipeline variables
    pub fn with_variables(variables: HashMap<String, String>) -> Self {
        Self {
            variables,
            ..Self::new()
        }
    }

    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the run finished, deriving the status from the recorded entries
    pub fn finish(&mut self) {
        self.status = if self.has_failures() {
            ExecutionStatus::CompletedWithFailures
        } else {
            ExecutionStatus::Completed
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Write the entry for a step, keeping its original position in the order
    pub fn insert(&mut self, step_id: &str, entry: StepEntry) {
        if self.entries.insert(step_id.to_string(), entry).is_none() {
            self.order.push(step_id.to_string());
        }
    }

    /// Record a successful step
    pub fn record_success(&mut self, step_id: &str, value: Value, attempts: usize, revisions: usize) {
        self.insert(
            step_id,
            StepEntry::Succeeded {
                value,
                attempts,
                revisions,
                completed_at: Utc::now(),
            },
        );
    }

    /// Record a step that reached `ExhaustedFailure`
    pub fn record_failure(&mut self, step_id: &str, marker: FailureMarker) {
        self.note_failure(step_id, &marker.error);
        self.insert(step_id, StepEntry::Failed(marker));
    }

    /// Remember the most recent failure for steps that need it
    pub fn note_failure(&mut self, step_id: &str, error: &str) {
        self.failed_step = Some(step_id.to_string());
        self.error_message = Some(error.to_string());
    }

    pub fn get(&self, step_id: &str) -> Option<&StepEntry> {
        self.entries.get(step_id)
    }

    /// Success value of a step
    pub fn value(&self, step_id: &str) -> Option<&Value> {
        self.entries.get(step_id).and_then(StepEntry::value)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.entries.contains_key(step_id)
    }

    /// Entries in the order they were first written
    pub fn entries(&self) -> impl Iterator<Item = (&str, &StepEntry)> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|entry| (id.as_str(), entry)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        self.entries.values().any(StepEntry::is_failed)
    }

    /// Ids of failed steps, in run order
    pub fn failed_steps(&self) -> Vec<String> {
        self.entries()
            .filter(|(_, entry)| entry.is_failed())
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// Variables available for `{{ key }}` placeholder rendering
    ///
    /// Includes pipeline variables, `steps.<id>.output` for every
    /// successful step, and the failure context when present.
    pub fn rendering_variables(&self) -> HashMap<String, String> {
        let mut vars = self.variables.clone();

        for (step_id, entry) in self.entries() {
            if let Some(value) = entry.value() {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                vars.insert(format!("steps.{}.output", step_id), rendered);
            }
        }

        if let Some(ref step) = self.failed_step {
            vars.insert("failed_step".to_string(), step.clone());
        }
        if let Some(ref error) = self.error_message {
            vars.insert("error_message".to_string(), error.clone());
        }

        vars
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
