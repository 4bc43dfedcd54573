//! In-memory repository.

use crate::error::StoreResult;
use crate::repository::{
    ClientRepository, DeliveryLog, DeliveryRecord, PersonnelRepository, Upserted,
};
use crate::table::PersonnelTable;
use parking_lot::RwLock;
use rollcall_protocol::{ClientRecord, PersonnelRecord};
use std::collections::BTreeMap;

/// An in-memory repository for personnel, clients and deliveries.
///
/// Suitable for:
/// - The server's working set, seeded at startup
/// - Clients that do not need their records to outlive the process
/// - Tests
///
/// # Thread Safety
///
/// Each table sits behind its own `RwLock`; every trait method takes the
/// lock once, so each call is atomic.
#[derive(Debug)]
pub struct MemoryStore {
    personnel: RwLock<PersonnelTable>,
    clients: RwLock<BTreeMap<(String, u16), ClientRecord>>,
    deliveries: RwLock<Vec<DeliveryRecord>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            personnel: RwLock::new(PersonnelTable::new()),
            clients: RwLock::new(BTreeMap::new()),
            deliveries: RwLock::new(Vec::new()),
        }
    }

    /// Creates a store seeded with personnel.
    ///
    /// Later records win when two share an ssn.
    #[must_use]
    pub fn with_personnel(records: impl IntoIterator<Item = PersonnelRecord>) -> Self {
        let store = Self::new();
        {
            let mut table = store.personnel.write();
            for record in records {
                table.upsert(record);
            }
        }
        store
    }

    /// Number of personnel records.
    pub fn personnel_count(&self) -> usize {
        self.personnel.read().len()
    }
}

impl PersonnelRepository for MemoryStore {
    fn find_personnel_by_ssn(&self, ssn: &str) -> StoreResult<Option<PersonnelRecord>> {
        Ok(self.personnel.read().get(ssn))
    }

    fn list_all_personnel(&self) -> StoreResult<Vec<PersonnelRecord>> {
        Ok(self.personnel.read().list())
    }

    fn upsert_personnel(&self, record: PersonnelRecord) -> StoreResult<Upserted> {
        Ok(self.personnel.write().upsert(record))
    }

    fn delete_personnel_by_ssn(&self, ssn: &str) -> StoreResult<bool> {
        Ok(self.personnel.write().remove(ssn))
    }

    fn delete_all_personnel(&self) -> StoreResult<usize> {
        Ok(self.personnel.write().clear())
    }
}

impl ClientRepository for MemoryStore {
    fn find_client_by_name(&self, name: &str) -> StoreResult<Option<ClientRecord>> {
        Ok(self
            .clients
            .read()
            .values()
            .find(|c| c.display_name == name)
            .cloned())
    }

    fn find_client_by_address(&self, host: &str, port: u16) -> StoreResult<Option<ClientRecord>> {
        Ok(self.clients.read().get(&(host.to_string(), port)).cloned())
    }

    fn list_all_clients(&self) -> StoreResult<Vec<ClientRecord>> {
        let mut clients: Vec<_> = self.clients.read().values().cloned().collect();
        clients.sort_by_key(|c| c.id);
        Ok(clients)
    }

    fn upsert_client(&self, record: ClientRecord) -> StoreResult<()> {
        self.clients
            .write()
            .insert((record.host.clone(), record.port), record);
        Ok(())
    }

    fn delete_client(&self, host: &str, port: u16) -> StoreResult<bool> {
        Ok(self
            .clients
            .write()
            .remove(&(host.to_string(), port))
            .is_some())
    }
}

impl DeliveryLog for MemoryStore {
    fn record_delivery(&self, record: DeliveryRecord) -> StoreResult<()> {
        self.deliveries.write().push(record);
        Ok(())
    }

    fn list_deliveries(&self) -> StoreResult<Vec<DeliveryRecord>> {
        Ok(self.deliveries.read().clone())
    }
}
