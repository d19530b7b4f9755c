//! Step work backed by an agent

use crate::agent::AgentExecutor;
use crate::core::PipelineState;
use crate::execution::StepWork;
use crate::registry::Configuration;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Sends the step's rendered configuration, followed by its task, to an agent
pub struct AgentStep<A> {
    agent: A,
    task: Option<String>,
}

impl<A: AgentExecutor> AgentStep<A> {
    pub fn new(agent: A) -> Self {
        Self { agent, task: None }
    }

    pub fn with_task(mut self, task: Option<String>) -> Self {
        self.task = task;
        self
    }

    /// Build the prompt for one attempt
    pub fn build_prompt(&self, state: &PipelineState, config: &Configuration) -> String {
        let variables = state.rendering_variables();
        let mut prompt = render(&config.content, &variables);
        if let Some(ref task) = self.task {
            prompt.push_str("\n\n");
            prompt.push_str(&render(task, &variables));
        }
        prompt
    }
}

/// Replace `{{ key }}` and `{{key}}` placeholders
pub fn render(template: &str, variables: &HashMap<String, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in variables {
        rendered = rendered
            .replace(&format!("{{{{ {} }}}}", key), value)
            .replace(&format!("{{{{{}}}}}", key), value);
    }
    rendered
}

#[async_trait]
impl<A: AgentExecutor> StepWork for AgentStep<A> {
    async fn perform(
        &self,
        step_id: &str,
        state: &PipelineState,
        config: &Configuration,
    ) -> anyhow::Result<Value> {
        let prompt = self.build_prompt(state, config);
        debug!("Prompt for {}: {} bytes", step_id, prompt.len());

        let response = self.agent.execute(&prompt).await?;
        debug!("Response from {}: {} bytes", step_id, response.content.len());

        Ok(Value::String(response.trimmed().to_string()))
    }
}
