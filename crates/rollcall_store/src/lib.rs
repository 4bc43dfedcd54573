//! # Rollcall Store
//!
//! Repository traits and implementations for rollcall.
//!
//! The server and clients only touch storage through these traits. Each
//! call is one atomic unit: a reader never observes a half-written record.
//!
//! ## Available Repositories
//!
//! - [`MemoryStore`] - personnel, clients and delivery log in memory
//! - [`FileStore`] - personnel persisted to a JSON snapshot file
//!
//! ## Example
//!
//! ```rust
//! use rollcall_protocol::PersonnelRecord;
//! use rollcall_store::{MemoryStore, PersonnelRepository};
//!
//! let store = MemoryStore::new();
//! store.upsert_personnel(PersonnelRecord::new("John", "Doe", "111-22-3333")).unwrap();
//! store.upsert_personnel(PersonnelRecord::new("Johnny", "Doe", "111-22-3333")).unwrap();
//!
//! let all = store.list_all_personnel().unwrap();
//! assert_eq!(all.len(), 1);
//! assert_eq!(all[0].name, "Johnny");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod file;
mod memory;
mod repository;
mod table;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use repository::{
    ClientRepository, DeliveryLog, DeliveryRecord, PersonnelRepository, Upserted,
};
