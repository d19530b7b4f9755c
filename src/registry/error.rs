//! Configuration store error types

use thiserror::Error;

/// Errors produced by [`ConfigurationStore`](crate::registry::ConfigurationStore) operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The step has never been configured
    #[error("no configuration found for step '{0}'")]
    NotFound(String),

    #[error("invalid step id '{0}'")]
    InvalidStepId(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data does not match what the store itself wrote
    #[error("corrupt registry: {0}")]
    Corrupt(String),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Convenience alias used throughout the registry
pub type Result<T> = std::result::Result<T, StoreError>;
