//! Versioned configuration registry
//!
//! Every step's configuration (its prompt) lives in a [`ConfigurationStore`].
//! The store keeps exactly one current configuration per step and an
//! append-only log of [`Revision`]s recording where every change came from.

pub mod error;
pub mod file;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{Result, StoreError};
pub use file::FileStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::core::config::is_valid_step_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;

/// Where a revision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Written by a person (including the initial seed)
    Manual,
    /// Written by the retry loop after a failed attempt
    AutoFix,
    /// Written by an explicit fixer run outside the retry loop
    FixByAgent,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Manual => "manual",
            Origin::AutoFix => "auto_fix",
            Origin::FixByAgent => "fix_by_agent",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(Origin::Manual),
            "auto_fix" => Ok(Origin::AutoFix),
            "fix_by_agent" => Ok(Origin::FixByAgent),
            other => Err(StoreError::Corrupt(format!("unknown origin '{}'", other))),
        }
    }
}

/// The current configuration of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub step_id: String,

    pub content: String,

    /// Version of the revision this configuration came from
    ///
    /// `None` when the step was seeded and never revised.
    pub version: Option<u64>,
}

/// An immutable, versioned snapshot of a configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub step_id: String,

    /// Strictly increasing per step, starting at 1
    pub version: u64,

    pub timestamp: DateTime<Utc>,

    pub origin: Origin,

    /// Optional quality score attached by whoever wrote the revision
    pub score: Option<f64>,

    /// Error that triggered the revision, if any
    pub error: Option<String>,

    pub content: String,
}

impl Revision {
    /// Version label, e.g. `v3`
    pub fn label(&self) -> String {
        format!("v{}", self.version)
    }
}

/// Everything the caller supplies for a new revision
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionDraft {
    pub content: String,
    pub origin: Origin,
    pub error: Option<String>,
    pub score: Option<f64>,
}

impl RevisionDraft {
    pub fn new(content: impl Into<String>, origin: Origin) -> Self {
        Self {
            content: content.into(),
            origin,
            error: None,
            score: None,
        }
    }

    pub fn with_error(mut self, error: Option<&str>) -> Self {
        self.error = error.map(str::to_string);
        self
    }

    pub fn with_score(mut self, score: Option<f64>) -> Self {
        self.score = score;
        self
    }

    /// Stamp the draft into a revision
    pub(crate) fn into_revision(self, step_id: &str, version: u64) -> Revision {
        Revision {
            step_id: step_id.to_string(),
            version,
            timestamp: Utc::now(),
            origin: self.origin,
            score: self.score,
            error: self.error,
            content: self.content,
        }
    }
}

pub(crate) fn check_step_id(step_id: &str) -> Result<()> {
    if is_valid_step_id(step_id) {
        Ok(())
    } else {
        Err(StoreError::InvalidStepId(step_id.to_string()))
    }
}

/// Storage contract for step configurations and their revision log
///
/// `append` must be safe to call concurrently for different steps. Calls for
/// the same step are serialized by the caller.
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Current configuration of a step
    ///
    /// Fails with [`StoreError::NotFound`] if the step was never configured.
    async fn read(&self, step_id: &str) -> Result<Configuration>;

    /// Append a revision and make it the step's current configuration
    async fn append(&self, step_id: &str, draft: RevisionDraft) -> Result<Revision>;

    /// Revisions of one step, oldest first
    async fn history(&self, step_id: &str) -> Result<Vec<Revision>>;

    /// Every revision in the store, in append order
    async fn log(&self) -> Result<Vec<Revision>>;

    /// Set the initial configuration of a step
    ///
    /// Does nothing and returns `false` if the step is already configured.
    /// Seeding does not append a revision.
    async fn seed(&self, step_id: &str, content: &str) -> Result<bool>;

    /// Ids of all configured steps, sorted
    async fn steps(&self) -> Result<Vec<String>>;

    /// Append a revision without a score
    async fn write(
        &self,
        step_id: &str,
        content: &str,
        origin: Origin,
        error: Option<&str>,
    ) -> Result<Revision> {
        self.append(step_id, RevisionDraft::new(content, origin).with_error(error))
            .await
    }

    /// Most recent revision of a step
    async fn latest(&self, step_id: &str) -> Result<Option<Revision>> {
        Ok(self.history(step_id).await?.pop())
    }
}

/// In-memory store (for testing or ephemeral use)
pub struct InMemoryStore {
    current: RwLock<HashMap<String, Configuration>>,
    log: RwLock<Vec<Revision>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(HashMap::new()),
            log: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigurationStore for InMemoryStore {
    async fn read(&self, step_id: &str) -> Result<Configuration> {
        let current = self.current.read().await;
        current
            .get(step_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(step_id.to_string()))
    }

    async fn append(&self, step_id: &str, draft: RevisionDraft) -> Result<Revision> {
        check_step_id(step_id)?;

        // Lock order: current, then log
        let mut current = self.current.write().await;
        let mut log = self.log.write().await;

        let version = current
            .get(step_id)
            .and_then(|c| c.version)
            .unwrap_or(0)
            + 1;
        let revision = draft.into_revision(step_id, version);

        log.push(revision.clone());
        current.insert(
            step_id.to_string(),
            Configuration {
                step_id: step_id.to_string(),
                content: revision.content.clone(),
                version: Some(version),
            },
        );

        Ok(revision)
    }

    async fn history(&self, step_id: &str) -> Result<Vec<Revision>> {
        let log = self.log.read().await;
        Ok(log.iter().filter(|r| r.step_id == step_id).cloned().collect())
    }

    async fn log(&self) -> Result<Vec<Revision>> {
        Ok(self.log.read().await.clone())
    }

    async fn seed(&self, step_id: &str, content: &str) -> Result<bool> {
        check_step_id(step_id)?;

        let mut current = self.current.write().await;
        if current.contains_key(step_id) {
            return Ok(false);
        }
        current.insert(
            step_id.to_string(),
            Configuration {
                step_id: step_id.to_string(),
                content: content.to_string(),
                version: None,
            },
        );
        Ok(true)
    }

    async fn steps(&self) -> Result<Vec<String>> {
        let current = self.current.read().await;
        let mut steps: Vec<String> = current.keys().cloned().collect();
        steps.sort();
        Ok(steps)
    }
}
