//! Errors returned by [`ExecutionEngine::run`](crate::execution::ExecutionEngine::run)
//!
//! Only setup problems found before the first step starts are errors.
//! Step failures are recorded in the returned
//! [`PipelineState`](crate::core::PipelineState) instead.

use crate::registry::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline has no steps")]
    EmptyPipeline,

    #[error("step '{0}' appears more than once in the pipeline")]
    DuplicateStep(String),

    #[error("no work registered for step '{0}'")]
    UnknownStep(String),

    #[error("no configuration found for step '{0}'; seed it before running")]
    ConfigurationNotFound(String),

    #[error("configuration store error: {0}")]
    Store(#[from] StoreError),
}
