//! Model backend used by steps and by the corrector

pub mod command;
pub mod response;

use async_trait::async_trait;
pub use command::CommandAgentClient;
pub use response::{AgentError, AgentResponse};
use std::sync::Arc;

/// Trait for agent execution - allows for different implementations
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Send a prompt and wait for the full response
    async fn execute(&self, prompt: &str) -> Result<AgentResponse, AgentError>;
}

#[async_trait]
impl<T: AgentExecutor + ?Sized> AgentExecutor for Arc<T> {
    async fn execute(&self, prompt: &str) -> Result<AgentResponse, AgentError> {
        (**self).execute(prompt).await
    }
}
