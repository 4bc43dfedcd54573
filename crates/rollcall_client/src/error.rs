//! Error types for the client agent.

use rollcall_protocol::{Action, ProtocolError};
use rollcall_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client agent.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Frame or envelope problem.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The local repository rejected a change.
    #[error("repository error: {0}")]
    Store(#[from] StoreError),

    /// A multi-record action stopped part way.
    #[error("{action} applied {applied} of {total} records before failing: {source}")]
    PartialApply {
        /// Action being applied.
        action: Action,
        /// Records applied before the failure.
        applied: usize,
        /// Records in the envelope, or in the repository for `DELETE_ALL`.
        total: usize,
        /// The failure.
        #[source]
        source: StoreError,
    },

    /// The server did not accept the connection in time.
    #[error("connect to server timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Returns true if the agent may try connecting again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectTimeout(_) | ClientError::Io(_) | ClientError::Protocol(ProtocolError::Io(_))
        )
    }
}
