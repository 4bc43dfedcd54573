//! Error types for the server.

use rollcall_protocol::{Action, ProtocolError};
use rollcall_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors returned to the caller of a server operation.
///
/// Per-recipient problems during fan-out are not errors of the call; they
/// are reported as [`DeliveryFailure`]s inside a
/// [`DispatchReport`](crate::DispatchReport).
#[derive(Error, Debug)]
pub enum ServerError {
    /// No live client matches the requested recipient.
    #[error("client not found: {0}")]
    ClientNotFound(String),

    /// No personnel record has the requested ssn.
    #[error("personnel not found: {0}")]
    PersonnelNotFound(String),

    /// A single record does not fit in one frame once sealed. `SAVE_ALL`
    /// is split across frames instead; this is raised only when a batch
    /// of one is still too large.
    #[error("{action} envelope seals to {len} bytes, over the {max}-byte frame limit")]
    EnvelopeTooLarge {
        action: Action,
        len: usize,
        max: usize,
    },

    /// Storage collaborator failed.
    #[error("repository error: {0}")]
    Repository(#[from] StoreError),

    /// The envelope could not be sealed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error on the listening socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if the call was aborted because a named client or ssn
    /// does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServerError::ClientNotFound(_) | ServerError::PersonnelNotFound(_)
        )
    }
}

/// Why one recipient of a dispatch did not receive the envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The connection closed before or during the write.
    #[error("connection lost")]
    ConnectionLost,

    /// The write did not complete in time.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// The write failed for another reason.
    #[error("write failed: {0}")]
    Io(String),
}

impl DeliveryFailure {
    /// Returns true if the recipient was already gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, DeliveryFailure::ConnectionLost)
    }
}
