//! # Rollcall Server
//!
//! Pushes personnel updates to connected rollcall clients.
//!
//! This crate provides:
//! - [`Registry`]: the single authority over which clients are reachable
//! - [`Connection`]: the per-socket lifecycle task
//! - [`Dispatcher`]: routes `SAVE` / `DELETE` / `SAVE_ALL` / `DELETE_ALL`
//!   to one client or to all of them
//! - [`Server`]: the accept loop tying them together
//!
//! # Architecture
//!
//! ```text
//! accept ──► Connection task ──register──► Registry ◄──resolve── Dispatcher ◄── operator
//!                 │  owns socket              (weak handles)          │
//!                 └──────────── write half ◄──── sealed frame ────────┘
//! ```
//!
//! Connection tasks own their sockets. The registry keeps only weak
//! handles, so a connection that closes between resolution and send shows
//! up as a per-recipient delivery failure, never as a crash.
//!
//! # Protocol
//!
//! Traffic is server to client only. The server keeps each socket open
//! purely to notice when the client goes away: end of stream or a read
//! error moves the connection to `AwaitingClose` and reaps it from the
//! registry.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod connection;
mod dispatcher;
mod error;
mod registry;
mod server;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionState};
pub use dispatcher::{DispatchReport, Dispatcher, Recipient};
pub use error::{DeliveryFailure, ServerError, ServerResult};
pub use registry::{ConnectionHandle, ConnectionLink, Registry};
pub use server::{Repositories, Server, ShutdownHandle};
