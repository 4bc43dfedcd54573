//! # Rollcall Protocol
//!
//! Wire protocol for pushing personnel updates from a rollcall server to
//! its clients.
//!
//! This crate provides:
//! - `PersonnelRecord` and `ClientRecord` data types
//! - The `Envelope` carrying one action (`SAVE`, `DELETE`, `SAVE_ALL`, `DELETE_ALL`)
//! - AES-256-GCM encryption with a pre-shared key
//! - Length-prefixed framing over any async byte stream
//!
//! ## Wire Format
//!
//! ```text
//! +----------------+------------------------------------------+
//! | length (u32 BE)| nonce (12) || ciphertext || tag (16)     |
//! +----------------+------------------------------------------+
//! ```
//!
//! The plaintext is the canonical JSON form of an [`Envelope`]:
//! `{"action":"SAVE","personnel":{...}}`.
//!
//! ## Usage
//!
//! ```
//! use rollcall_protocol::{Codec, Envelope, PersonnelRecord, SharedKey};
//!
//! let codec = Codec::new(&SharedKey::generate());
//! let envelope = Envelope::Save(PersonnelRecord::new("John", "Doe", "111-22-3333"));
//!
//! let sealed = codec.seal(&envelope).unwrap();
//! assert_eq!(codec.open(&sealed).unwrap(), envelope);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod codec;
mod crypto;
mod envelope;
mod error;
mod frame;
mod record;

pub use codec::Codec;
pub use crypto::{Cipher, SharedKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use envelope::{Action, Envelope};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};
pub use record::{ClientRecord, PersonnelRecord};
