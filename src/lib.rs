//! autofix-pipeline - a sequential agent pipeline that repairs failing step prompts

pub mod agent;
pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod registry;

// Re-export commonly used types
pub use crate::agent::{AgentError, AgentExecutor, AgentResponse, CommandAgentClient};
pub use crate::core::{ExecutionStatus, FailureKind, PipelineConfig, PipelineState, StepOutcome};
pub use crate::error::PipelineError;
pub use crate::execution::{
    AgentCorrector, AgentStep, Corrector, ExecutionEngine, ExecutionEvent, RetryPolicy, StepWork,
};
pub use crate::registry::{ConfigurationStore, FileStore, InMemoryStore, Origin, Revision};
