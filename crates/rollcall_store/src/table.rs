//! In-memory personnel table shared by the repository implementations.

use crate::error::{StoreError, StoreResult};
use crate::repository::Upserted;
use rollcall_protocol::PersonnelRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Personnel indexed by id, with an ssn index on the side.
///
/// Not synchronised; callers hold it behind a lock.
#[derive(Debug, Default, Clone)]
pub(crate) struct PersonnelTable {
    by_id: BTreeMap<u64, PersonnelRecord>,
    by_ssn: HashMap<String, u64>,
    next_id: u64,
}

/// Serialized form of a [`PersonnelTable`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub(crate) next_id: u64,
    pub(crate) personnel: Vec<PersonnelRecord>,
}

impl PersonnelTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Rebuilds a table from a snapshot.
    ///
    /// Snapshots may be edited by hand, so ids and ssns are checked for
    /// uniqueness rather than trusted.
    pub(crate) fn from_snapshot(snapshot: Snapshot) -> StoreResult<Self> {
        let mut table = Self::new();
        for record in snapshot.personnel {
            let following = record.id.checked_add(1).ok_or_else(|| {
                StoreError::InvalidRecord(format!("id {} leaves no room for new records", record.id))
            })?;
            if table.by_id.contains_key(&record.id) {
                return Err(StoreError::InvalidRecord(format!("duplicate id {}", record.id)));
            }
            if table.by_ssn.contains_key(&record.ssn) {
                return Err(StoreError::InvalidRecord(format!("duplicate ssn {}", record.ssn)));
            }
            table.next_id = table.next_id.max(following);
            table.by_ssn.insert(record.ssn.clone(), record.id);
            table.by_id.insert(record.id, record);
        }
        table.next_id = table.next_id.max(snapshot.next_id);
        Ok(table)
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            next_id: self.next_id,
            personnel: self.list(),
        }
    }

    pub(crate) fn get(&self, ssn: &str) -> Option<PersonnelRecord> {
        self.by_ssn
            .get(ssn)
            .and_then(|id| self.by_id.get(id))
            .cloned()
    }

    pub(crate) fn list(&self) -> Vec<PersonnelRecord> {
        self.by_id.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn upsert(&mut self, record: PersonnelRecord) -> Upserted {
        if let Some(&id) = self.by_ssn.get(&record.ssn) {
            let stored = record.with_id(id);
            self.by_id.insert(id, stored.clone());
            return Upserted::Updated(stored);
        }

        let id = self.next_id;
        self.next_id += 1;
        let stored = record.with_id(id);
        self.by_ssn.insert(stored.ssn.clone(), id);
        self.by_id.insert(id, stored.clone());
        Upserted::Inserted(stored)
    }

    pub(crate) fn remove(&mut self, ssn: &str) -> bool {
        match self.by_ssn.remove(ssn) {
            Some(id) => self.by_id.remove(&id).is_some(),
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) -> usize {
        let removed = self.by_id.len();
        self.by_id.clear();
        self.by_ssn.clear();
        removed
    }
}
