//! # Rollcall Client
//!
//! Receives personnel updates pushed by a rollcall server and applies them
//! to a local [`PersonnelRepository`](rollcall_store::PersonnelRepository).
//!
//! ## Receive Loop
//!
//! ```text
//! read_frame ──► Codec::open ──► Applier::apply ──► repository
//!      │               │
//!      │               └─ decode failure / unknown action: log, count, continue
//!      └─ end of stream / socket error: Disconnected
//! ```
//!
//! The client never sends application data. Its only outbound signal is
//! closing the socket, which the server treats as disconnection.
//!
//! Reconnecting after `Disconnected` is the caller's choice;
//! [`ClientAgent::connect_with_retry`] applies a [`RetryConfig`] backoff.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod agent;
mod applier;
mod config;
mod error;

pub use agent::{AgentState, ClientAgent, SessionStats};
pub use applier::{Applier, ApplyOutcome};
pub use config::{ClientConfig, RetryConfig};
pub use error::{ClientError, ClientResult};
