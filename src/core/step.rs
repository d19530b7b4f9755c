//! Outcome of a single step attempt

use crate::core::state::FailureKind;
use serde_json::Value;
use std::fmt;

/// Prefix some step implementations use to report failure inside a string value
pub const ERROR_SENTINEL: &str = "ERROR:";

/// A failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A failure of the step's own work
    pub fn step(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Step, message)
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Tagged result of one execution attempt
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success(Value),
    Failure(StepFailure),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success(_))
    }

    /// Convert a success value carrying the `ERROR:` sentinel into a failure
    ///
    /// Everything after the prefix (trimmed) becomes the failure message.
    pub fn normalize_legacy(self) -> Self {
        match self {
            StepOutcome::Success(Value::String(ref s)) if s.starts_with(ERROR_SENTINEL) => {
                let message = s[ERROR_SENTINEL.len()..].trim();
                StepOutcome::Failure(StepFailure::step(message))
            }
            other => other,
        }
    }
}
