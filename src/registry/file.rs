//! File-backed configuration store
//!
//! Layout under the root directory:
//!
//! ```text
//! prompt_registry.json        every revision's metadata, in append order
//! <step>/prompt.txt           current configuration of <step>
//! <step>/prompt_v0003.txt     content of revision 3 of <step>
//! ```
//!
//! Files are replaced atomically (temp file, fsync, rename). A revision is
//! committed once its registry entry is on disk; `read` resolves the current
//! configuration from the registry, so `prompt.txt` is a convenience copy.

use crate::registry::{
    check_step_id, Configuration, ConfigurationStore, Origin, Result, Revision, RevisionDraft,
    StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Name of the revision log at the store root, never a valid step id
pub const REGISTRY_FILE: &str = "prompt_registry.json";
const CURRENT_FILE: &str = "prompt.txt";

/// One entry of `prompt_registry.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryRecord {
    step: String,
    version: u64,
    timestamp: DateTime<Utc>,
    origin: Origin,
    score: Option<f64>,
    error: Option<String>,
}

/// Store keeping configurations as text files next to a JSON registry
pub struct FileStore {
    root: PathBuf,
    /// Serializes registry read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn step_dir(&self, step_id: &str) -> PathBuf {
        self.root.join(step_id)
    }

    fn current_path(&self, step_id: &str) -> PathBuf {
        self.step_dir(step_id).join(CURRENT_FILE)
    }

    fn revision_path(&self, step_id: &str, version: u64) -> PathBuf {
        self.step_dir(step_id)
            .join(format!("prompt_v{:04}.txt", version))
    }

    fn registry_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    async fn load_registry(&self) -> Result<Vec<RegistryRecord>> {
        match fs::read(self.registry_path()).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_revision(&self, record: RegistryRecord) -> Result<Revision> {
        let path = self.revision_path(&record.step, record.version);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Corrupt(format!(
                    "revision v{} of '{}' is registered but {} is missing",
                    record.version,
                    record.step,
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Revision {
            step_id: record.step,
            version: record.version,
            timestamp: record.timestamp,
            origin: record.origin,
            score: record.score,
            error: record.error,
            content,
        })
    }

    /// Current configuration, or `None` if the step was never configured
    async fn try_read(&self, step_id: &str) -> Result<Option<Configuration>> {
        check_step_id(step_id)?;

        let latest = self
            .load_registry()
            .await?
            .into_iter()
            .filter(|r| r.step == step_id)
            .last();

        if let Some(record) = latest {
            let revision = self.load_revision(record).await?;
            return Ok(Some(Configuration {
                step_id: step_id.to_string(),
                content: revision.content,
                version: Some(revision.version),
            }));
        }

        match fs::read_to_string(self.current_path(step_id)).await {
            Ok(content) => Ok(Some(Configuration {
                step_id: step_id.to_string(),
                content,
                version: None,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Replace `path` with `bytes` so readers see either the old or the new file
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StoreError::Corrupt(format!("bad path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl ConfigurationStore for FileStore {
    async fn read(&self, step_id: &str) -> Result<Configuration> {
        self.try_read(step_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(step_id.to_string()))
    }

    async fn append(&self, step_id: &str, draft: RevisionDraft) -> Result<Revision> {
        check_step_id(step_id)?;
        let _guard = self.write_lock.lock().await;

        let mut registry = self.load_registry().await?;
        let version = registry
            .iter()
            .filter(|r| r.step == step_id)
            .map(|r| r.version)
            .max()
            .unwrap_or(0)
            + 1;
        let revision = draft.into_revision(step_id, version);

        // Content first, then the registry entry that commits it
        write_atomic(
            &self.revision_path(step_id, version),
            revision.content.as_bytes(),
        )
        .await?;

        registry.push(RegistryRecord {
            step: revision.step_id.clone(),
            version: revision.version,
            timestamp: revision.timestamp,
            origin: revision.origin,
            score: revision.score,
            error: revision.error.clone(),
        });
        let bytes = serde_json::to_vec_pretty(&registry)?;
        write_atomic(&self.registry_path(), &bytes).await?;

        write_atomic(&self.current_path(step_id), revision.content.as_bytes()).await?;

        debug!(
            "Committed {} of {} ({}) to {}",
            revision.label(),
            step_id,
            revision.origin,
            self.root.display()
        );
        Ok(revision)
    }

    async fn history(&self, step_id: &str) -> Result<Vec<Revision>> {
        check_step_id(step_id)?;

        let mut revisions = Vec::new();
        for record in self.load_registry().await? {
            if record.step == step_id {
                revisions.push(self.load_revision(record).await?);
            }
        }
        Ok(revisions)
    }

    async fn log(&self) -> Result<Vec<Revision>> {
        let mut revisions = Vec::new();
        for record in self.load_registry().await? {
            revisions.push(self.load_revision(record).await?);
        }
        Ok(revisions)
    }

    async fn seed(&self, step_id: &str, content: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        if self.try_read(step_id).await?.is_some() {
            return Ok(false);
        }
        write_atomic(&self.current_path(step_id), content.as_bytes()).await?;
        Ok(true)
    }

    async fn steps(&self) -> Result<Vec<String>> {
        let mut steps: Vec<String> = self
            .load_registry()
            .await?
            .into_iter()
            .map(|r| r.step)
            .collect();

        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let has_prompt = fs::try_exists(entry.path().join(CURRENT_FILE))
                .await
                .unwrap_or(false);
            if has_prompt {
                if let Some(name) = entry.file_name().to_str() {
                    steps.push(name.to_string());
                }
            }
        }

        steps.sort();
        steps.dedup();
        Ok(steps)
    }
}
