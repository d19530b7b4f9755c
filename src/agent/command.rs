//! Command-line model client - runs a model CLI in print mode

use crate::agent::{AgentError, AgentExecutor, AgentResponse};
use crate::core::config::AgentConfig;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Client that sends each prompt to a model CLI as a subprocess
///
/// The prompt is passed as the last argument and stdout is the response.
#[derive(Debug, Clone)]
pub struct CommandAgentClient {
    /// Executable to run
    program: String,

    /// Arguments placed before the prompt
    args: Vec<String>,

    /// Timeout for command execution in seconds
    timeout_secs: u64,
}

impl CommandAgentClient {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            args,
            timeout_secs,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone(), config.timeout_secs)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the command with `prompt` and capture stdout
    ///
    /// # Errors
    /// Returns `AgentError` if:
    /// - The executable cannot be spawned
    /// - It exits with a non-zero status
    /// - The output is not valid UTF-8
    /// - The command times out
    pub async fn run(&self, prompt: &str) -> Result<String, AgentError> {
        debug!(
            "Spawning {} with prompt length: {}",
            self.program,
            prompt.len()
        );

        let result = timeout(
            Duration::from_secs(self.timeout_secs),
            Command::new(&self.program)
                .args(&self.args)
                .arg(prompt)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| AgentError::Timeout(self.timeout_secs))?;

        let output = result.map_err(|e| {
            AgentError::Internal(format!("Failed to execute {}: {}", self.program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!("{} exited with code {}: {}", self.program, exit_code, stderr.trim());
            return Err(AgentError::Api(format!(
                "{} exited with code {}: {}",
                self.program,
                exit_code,
                stderr.trim()
            )));
        }

        let content = String::from_utf8(output.stdout).map_err(|e| {
            AgentError::Internal(format!("Failed to decode {} output: {}", self.program, e))
        })?;

        debug!("{} returned {} bytes of output", self.program, content.len());

        Ok(content)
    }
}

#[async_trait]
impl AgentExecutor for CommandAgentClient {
    async fn execute(&self, prompt: &str) -> Result<AgentResponse, AgentError> {
        let content = self.run(prompt).await?;
        Ok(AgentResponse::new(content))
    }
}
