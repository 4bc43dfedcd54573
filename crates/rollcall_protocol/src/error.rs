//! Error types for the protocol crate.

use std::io;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while sealing, opening or framing envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame could not be turned back into an envelope: truncated or
    /// malformed ciphertext, wrong key, or plaintext that is not an envelope.
    #[error("decode failed: {message}")]
    Decode {
        /// Description of the failure.
        message: String,
    },

    /// The envelope was well formed but named an action this side does not know.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// The envelope could not be serialized or encrypted.
    #[error("encode failed: {message}")]
    Encode {
        /// Description of the failure.
        message: String,
    },

    /// Key material has the wrong length.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Required key length.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// A frame header announced more bytes than the reader accepts.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Announced length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A frame header announced a zero-length body.
    #[error("empty frame")]
    EmptyFrame,

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Returns true if this is a decode failure.
    pub fn is_decode(&self) -> bool {
        matches!(self, ProtocolError::Decode { .. })
    }

    /// Returns true if a receive loop can skip the offending frame and
    /// carry on reading the same stream.
    ///
    /// Framing errors are not recoverable: once a header is bad the stream
    /// position of the next frame is unknown.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Decode { .. } | ProtocolError::UnknownAction(_)
        )
    }
}
