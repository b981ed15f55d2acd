//! Error types for stowaway.
//!
//! Nothing here is fatal to the worker as a whole: callers log and degrade
//! (skip a manifest entry, keep a stale store, serve the offline page).

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors raised by a cache store or the store directory.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open cache store {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache entry at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while talking to the network.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Network error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Network unreachable: {0}")]
    Unreachable(String),
}

/// Top-level error for the worker and its event handlers.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Retry queue error: {0}")]
    Queue(String),
}
