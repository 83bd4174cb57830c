//! Error taxonomy shared by the storage, recording and sync layers.

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed metadata or an invalid participant code reached a write path.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("unsupported database schema: {0}")]
    Schema(String),

    #[error("no network connection available")]
    Offline,

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("remote service error: {0}")]
    Remote(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("recorder error: {0}")]
    Recorder(String),

    #[error("cannot {action} while recorder is {phase}")]
    InvalidState {
        action: &'static str,
        phase: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("Failed to {action} {}", path.display()), source)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        Self::Remote(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
