//! Corrective function - proposes a replacement configuration for a failing step

use crate::agent::{AgentError, AgentExecutor};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CorrectionError {
    #[error("corrector backend failed: {0}")]
    Agent(#[from] AgentError),

    #[error("corrector failed: {0}")]
    Backend(String),

    #[error("corrector returned an empty configuration")]
    EmptyProposal,

    #[error("corrector timed out after {0:?}")]
    Timeout(Duration),

    #[error("correction cancelled")]
    Cancelled,
}

/// Produces a replacement configuration given the current one and an error
///
/// Calls may be slow. The retry loop bounds them with a timeout and the
/// run's cancellation token.
#[async_trait]
pub trait Corrector: Send + Sync {
    async fn propose(
        &self,
        step_id: &str,
        current_content: &str,
        error_message: &str,
    ) -> Result<String, CorrectionError>;
}

const SYSTEM_INSTRUCTION: &str = "You are a helpful prompt engineer. Improve the prompt below so the agent does not fail. \
You will be given the previous prompt and an error message. Provide only the revised prompt.";

/// Corrector that asks a model to rewrite the failing prompt
pub struct AgentCorrector<A> {
    agent: A,
}

impl<A: AgentExecutor> AgentCorrector<A> {
    pub fn new(agent: A) -> Self {
        Self { agent }
    }

    /// Request sent to the model
    pub fn build_request(step_id: &str, current_content: &str, error_message: &str) -> String {
        format!(
            "{}\n\nAGENT: {}\n\nPREVIOUS PROMPT:\n{}\n\nERROR:\n{}\n\nRevised Prompt:\n",
            SYSTEM_INSTRUCTION, step_id, current_content, error_message
        )
    }
}

#[async_trait]
impl<A: AgentExecutor> Corrector for AgentCorrector<A> {
    async fn propose(
        &self,
        step_id: &str,
        current_content: &str,
        error_message: &str,
    ) -> Result<String, CorrectionError> {
        let request = Self::build_request(step_id, current_content, error_message);
        debug!("Correction request for {}: {} bytes", step_id, request.len());

        let response = self.agent.execute(&request).await?;
        let revised = response.trimmed();
        if revised.is_empty() {
            return Err(CorrectionError::EmptyProposal);
        }
        Ok(revised.to_string())
    }
}
