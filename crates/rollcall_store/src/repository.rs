//! Repository traits consumed by the server and clients.

use crate::error::StoreResult;
use rollcall_protocol::{Action, ClientRecord, PersonnelRecord};

/// Outcome of an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted {
    /// No record had this ssn; the stored record is returned with its new id.
    Inserted(PersonnelRecord),
    /// A record with this ssn was replaced; it keeps its id.
    Updated(PersonnelRecord),
}

impl Upserted {
    /// The record as stored.
    pub fn record(&self) -> &PersonnelRecord {
        match self {
            Upserted::Inserted(record) | Upserted::Updated(record) => record,
        }
    }

    /// Returns true for a fresh insert.
    pub fn is_insert(&self) -> bool {
        matches!(self, Upserted::Inserted(_))
    }
}

/// Storage for personnel records, keyed by ssn.
///
/// # Invariants
///
/// - At most one record per ssn
/// - `upsert_personnel` on an existing ssn replaces name and surname and
///   keeps the stored id
/// - Deleting an absent ssn is not an error
pub trait PersonnelRepository: Send + Sync {
    /// Looks up a record by ssn.
    fn find_personnel_by_ssn(&self, ssn: &str) -> StoreResult<Option<PersonnelRecord>>;

    /// Returns every record, ordered by id.
    fn list_all_personnel(&self) -> StoreResult<Vec<PersonnelRecord>>;

    /// Inserts a record, or replaces the one with the same ssn.
    ///
    /// The incoming `id` is ignored; ids belong to the repository.
    fn upsert_personnel(&self, record: PersonnelRecord) -> StoreResult<Upserted>;

    /// Removes the record with this ssn. Returns whether one was removed.
    fn delete_personnel_by_ssn(&self, ssn: &str) -> StoreResult<bool>;

    /// Removes every record. Returns how many were removed.
    fn delete_all_personnel(&self) -> StoreResult<usize>;
}

/// Storage for the server's view of reachable clients.
pub trait ClientRepository: Send + Sync {
    /// Looks up a client by display name.
    fn find_client_by_name(&self, name: &str) -> StoreResult<Option<ClientRecord>>;

    /// Looks up a client by peer address.
    fn find_client_by_address(&self, host: &str, port: u16) -> StoreResult<Option<ClientRecord>>;

    /// Returns every client, ordered by display index.
    fn list_all_clients(&self) -> StoreResult<Vec<ClientRecord>>;

    /// Inserts a client, or replaces the one at the same address.
    fn upsert_client(&self, record: ClientRecord) -> StoreResult<()>;

    /// Removes the client at this address. Returns whether one was removed.
    fn delete_client(&self, host: &str, port: u16) -> StoreResult<bool>;
}

/// One envelope handed to one client's socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    /// Display index of the recipient.
    pub client_id: u64,
    /// Display name of the recipient.
    pub client_name: String,
    /// Action that was delivered.
    pub action: Action,
    /// Plaintext envelope as sent.
    pub payload: String,
}

/// Audit trail of deliveries.
pub trait DeliveryLog: Send + Sync {
    /// Appends one delivery.
    fn record_delivery(&self, record: DeliveryRecord) -> StoreResult<()>;

    /// Returns every delivery, oldest first.
    fn list_deliveries(&self) -> StoreResult<Vec<DeliveryRecord>>;
}
