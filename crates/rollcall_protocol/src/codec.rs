//! Envelope codec: canonical JSON, then AES-256-GCM.

use crate::crypto::{Cipher, SharedKey};
use crate::envelope::Envelope;
use crate::error::ProtocolResult;

/// Seals envelopes into ciphertext and opens them again.
///
/// `Codec` is cheap to clone and holds no per-message state, so one
/// instance can be shared by every connection task.
#[derive(Debug, Clone)]
pub struct Codec {
    cipher: Cipher,
}

impl Codec {
    /// Creates a codec for the given shared key.
    #[must_use]
    pub fn new(key: &SharedKey) -> Self {
        Self {
            cipher: Cipher::new(key),
        }
    }

    /// Serializes and encrypts an envelope.
    pub fn seal(&self, envelope: &Envelope) -> ProtocolResult<Vec<u8>> {
        let plaintext = envelope.to_json()?;
        self.cipher.encrypt(&plaintext)
    }

    /// Decrypts and parses an envelope.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Decode`](crate::ProtocolError::Decode) for
    ///   truncated, forged or foreign-key ciphertext, or plaintext that is
    ///   not an envelope
    /// - [`ProtocolError::UnknownAction`](crate::ProtocolError::UnknownAction)
    ///   for an authentic envelope naming an unrecognised action
    pub fn open(&self, sealed: &[u8]) -> ProtocolResult<Envelope> {
        let plaintext = self.cipher.decrypt(sealed)?;
        Envelope::from_json(&plaintext)
    }
}
