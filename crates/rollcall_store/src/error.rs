//! Error types for repository operations.

use std::io;
use thiserror::Error;

/// Result type for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in a repository.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backing file could not be parsed or written.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// A record violates a repository invariant.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The repository is unavailable.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
