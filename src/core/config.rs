//! Pipeline configuration from YAML

use crate::execution::retry::{
    RetryPolicy, DEFAULT_CORRECTION_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_STEP_TIMEOUT,
};
use crate::registry::file::REGISTRY_FILE;
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 10800;

/// Whether `id` can be used as a step identifier
///
/// Step ids double as directory names in the file store, so the name of
/// its registry file is reserved.
pub fn is_valid_step_id(id: &str) -> bool {
    static STEP_ID: OnceLock<Regex> = OnceLock::new();
    STEP_ID
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid step id regex"))
        .is_match(id)
        && id != REGISTRY_FILE
}

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Maximum attempts per step (global default)
    #[serde(default)]
    pub max_retries: Option<usize>,

    /// Timeout for one attempt of a step (in seconds)
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,

    /// Timeout for one call to the corrector (in seconds)
    #[serde(default)]
    pub correction_timeout_secs: Option<u64>,

    /// Treat string values starting with `ERROR:` as failures
    #[serde(default = "default_true")]
    pub legacy_error_sentinel: bool,

    /// Where step configurations and revisions are kept
    #[serde(default)]
    pub store: StoreConfig,

    /// Backend used by the steps
    #[serde(default)]
    pub agent: AgentConfig,

    /// Backend used to correct failing configurations (defaults to `agent`)
    #[serde(default)]
    pub corrector: Option<AgentConfig>,

    /// Variables available to every step's configuration
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// Pipeline steps, in execution order
    pub steps: Vec<StepConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step identifier
    pub id: String,

    /// Task message sent along with the step's configuration
    #[serde(default)]
    pub task: Option<String>,

    /// Initial prompt, seeded only if the store has none for this step
    #[serde(default)]
    pub prompt: Option<String>,

    /// Maximum attempts for this step (overrides global)
    #[serde(default)]
    pub max_retries: Option<usize>,

    /// Timeout for this step (overrides global)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Configuration store selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,

    /// Directory (file store) or database file (sqlite store)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    File,
    Sqlite,
    Memory,
}

/// Command-line model backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Executable to run
    #[serde(default = "default_agent_command")]
    pub command: String,

    /// Arguments placed before the prompt
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,

    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: default_agent_args(),
            timeout_secs: default_agent_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_agent_command() -> String {
    "pi".to_string()
}

fn default_agent_args() -> Vec<String> {
    ["--mode", "text", "--print", "--no-session"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_agent_timeout() -> u64 {
    DEFAULT_AGENT_TIMEOUT_SECS
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            anyhow::bail!("Pipeline '{}' has no steps", self.name);
        }

        let mut seen_ids = HashSet::new();
        for step in &self.steps {
            if !is_valid_step_id(&step.id) {
                anyhow::bail!(
                    "Invalid step ID '{}': use letters, digits, '_', '-' or '.'",
                    step.id
                );
            }
            if !seen_ids.insert(&step.id) {
                anyhow::bail!("Duplicate step ID: {}", step.id);
            }
            if step.timeout_secs == Some(0) {
                anyhow::bail!("Step '{}' has a zero timeout", step.id);
            }
        }

        if self.step_timeout_secs == Some(0) || self.correction_timeout_secs == Some(0) {
            anyhow::bail!("Timeouts must be greater than zero");
        }

        Ok(())
    }

    /// Step ids in execution order
    pub fn step_ids(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    pub fn step(&self, id: &str) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Retry policy applied to steps without overrides
    pub fn default_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            step_timeout: self
                .step_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_STEP_TIMEOUT),
            correction_timeout: self
                .correction_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CORRECTION_TIMEOUT),
        }
    }

    /// Retry policy for one step, applying its overrides
    pub fn policy_for(&self, step: &StepConfig) -> RetryPolicy {
        let mut policy = self.default_policy();
        if let Some(max_retries) = step.max_retries {
            policy.max_retries = max_retries;
        }
        if let Some(timeout_secs) = step.timeout_secs {
            policy.step_timeout = Duration::from_secs(timeout_secs);
        }
        policy
    }

    /// Backend used for corrections
    pub fn corrector_agent(&self) -> &AgentConfig {
        self.corrector.as_ref().unwrap_or(&self.agent)
    }

    /// Store location, defaulting to the local data directory
    pub fn store_path(&self) -> PathBuf {
        if let Some(ref path) = self.store.path {
            return path.clone();
        }
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("autofix");
        match self.store.kind {
            StoreKind::Sqlite => base.join("registry.db"),
            StoreKind::File | StoreKind::Memory => base.join("prompts"),
        }
    }
}
