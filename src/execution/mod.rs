//! Pipeline execution engine

pub mod agent_step;
pub mod corrector;
pub mod engine;
pub mod events;
pub mod executor;
pub mod retry;

pub use agent_step::AgentStep;
pub use corrector::{AgentCorrector, CorrectionError, Corrector};
pub use engine::ExecutionEngine;
pub use events::{EventHandler, EventSink, ExecutionEvent};
pub use executor::{Attempt, StepExecutor, StepWork};
pub use retry::{PipelineStep, RetryController, RetryPolicy, StepLocks, StepResolution};
