//! Applies envelopes to the local repository.

use crate::error::{ClientError, ClientResult};
use rollcall_protocol::{Action, Envelope};
use rollcall_store::PersonnelRepository;
use std::ops::AddAssign;
use std::sync::Arc;
use tracing::debug;

/// What one envelope changed locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Records inserted or updated.
    pub saved: usize,
    /// Records removed.
    pub deleted: usize,
}

impl AddAssign for ApplyOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.saved += rhs.saved;
        self.deleted += rhs.deleted;
    }
}

/// Applies decoded envelopes to a personnel repository.
///
/// `SAVE` and `SAVE_ALL` upsert by ssn, so replaying an envelope leaves the
/// repository unchanged. `DELETE` of an absent ssn is a no-op.
#[derive(Clone)]
pub struct Applier {
    store: Arc<dyn PersonnelRepository>,
}

impl Applier {
    /// Creates an applier over `store`.
    pub fn new(store: Arc<dyn PersonnelRepository>) -> Self {
        Self { store }
    }

    /// The repository being written to.
    pub fn store(&self) -> &Arc<dyn PersonnelRepository> {
        &self.store
    }

    /// Applies one envelope.
    ///
    /// # Errors
    ///
    /// For `SAVE_ALL` and `DELETE_ALL` a repository failure is reported as
    /// [`ClientError::PartialApply`] with the number of records already
    /// applied. Records applied before the failure stay applied.
    pub fn apply(&self, envelope: &Envelope) -> ClientResult<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        match envelope {
            Envelope::Save(record) => {
                let upserted = self.store.upsert_personnel(record.clone())?;
                debug!("saved {} (insert: {})", upserted.record(), upserted.is_insert());
                outcome.saved = 1;
            }
            Envelope::Delete { ssn } => {
                if self.store.delete_personnel_by_ssn(ssn)? {
                    outcome.deleted = 1;
                } else {
                    debug!("delete of absent ssn {} ignored", ssn);
                }
            }
            Envelope::SaveAll(records) => {
                for (applied, record) in records.iter().enumerate() {
                    self.store
                        .upsert_personnel(record.clone())
                        .map_err(|source| ClientError::PartialApply {
                            action: Action::SaveAll,
                            applied,
                            total: records.len(),
                            source,
                        })?;
                    outcome.saved += 1;
                }
            }
            Envelope::DeleteAll => {
                let total = self.store.list_all_personnel()?.len();
                outcome.deleted = self.store.delete_all_personnel().map_err(|source| {
                    ClientError::PartialApply {
                        action: Action::DeleteAll,
                        applied: 0,
                        total,
                        source,
                    }
                })?;
            }
        }
        Ok(outcome)
    }
}

impl std::fmt::Debug for Applier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Applier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_protocol::PersonnelRecord;
    use rollcall_store::{MemoryStore, StoreError, StoreResult, Upserted};

    fn applier() -> (Applier, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Applier::new(store.clone()), store)
    }

    #[test]
    fn repeated_save_upserts() {
        let (applier, store) = applier();
        applier
            .apply(&Envelope::Save(PersonnelRecord::new("John", "Doe", "123-45-6789")))
            .unwrap();
        applier
            .apply(&Envelope::Save(PersonnelRecord::new("Jon", "Doe", "123-45-6789")))
            .unwrap();

        let all = store.list_all_personnel().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Jon");
    }

    #[test]
    fn delete_absent_is_noop() {
        let (applier, store) = applier();
        let outcome = applier
            .apply(&Envelope::Delete {
                ssn: "999-99-9999".into(),
            })
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::default());
        assert!(store.list_all_personnel().unwrap().is_empty());
    }

    #[test]
    fn save_all_then_delete_all() {
        let (applier, store) = applier();
        let records = vec![
            PersonnelRecord::new("Jane", "Smith", "444-55-6666"),
            PersonnelRecord::new("Michael", "Davis", "111-22-3333"),
            PersonnelRecord::new("Jane", "Smyth", "444-55-6666"),
        ];

        let saved = applier.apply(&Envelope::SaveAll(records)).unwrap();
        assert_eq!(saved.saved, 3);
        let all = store.list_all_personnel().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].surname, "Smyth");

        let deleted = applier.apply(&Envelope::DeleteAll).unwrap();
        assert_eq!(deleted.deleted, 2);
        assert_eq!(store.personnel_count(), 0);
    }

    #[test]
    fn outcomes_accumulate() {
        let mut total = ApplyOutcome { saved: 1, deleted: 0 };
        total += ApplyOutcome { saved: 2, deleted: 3 };
        assert_eq!(total, ApplyOutcome { saved: 3, deleted: 3 });
    }

    /// Accepts a fixed number of upserts, then fails.
    struct Flaky {
        inner: MemoryStore,
        budget: parking_lot::Mutex<usize>,
    }

    impl PersonnelRepository for Flaky {
        fn find_personnel_by_ssn(&self, ssn: &str) -> StoreResult<Option<PersonnelRecord>> {
            self.inner.find_personnel_by_ssn(ssn)
        }
        fn list_all_personnel(&self) -> StoreResult<Vec<PersonnelRecord>> {
            self.inner.list_all_personnel()
        }
        fn upsert_personnel(&self, record: PersonnelRecord) -> StoreResult<Upserted> {
            let mut budget = self.budget.lock();
            if *budget == 0 {
                return Err(StoreError::Unavailable("quota exhausted".into()));
            }
            *budget -= 1;
            self.inner.upsert_personnel(record)
        }
        fn delete_personnel_by_ssn(&self, ssn: &str) -> StoreResult<bool> {
            self.inner.delete_personnel_by_ssn(ssn)
        }
        fn delete_all_personnel(&self) -> StoreResult<usize> {
            Err(StoreError::Unavailable("read only".into()))
        }
    }

    #[test]
    fn partial_save_all_is_reported() {
        let store = Arc::new(Flaky {
            inner: MemoryStore::new(),
            budget: parking_lot::Mutex::new(2),
        });
        let applier = Applier::new(store.clone());
        let records: Vec<_> = (0..4)
            .map(|i| PersonnelRecord::new("N", "S", format!("00{i}")))
            .collect();

        match applier.apply(&Envelope::SaveAll(records)) {
            Err(ClientError::PartialApply {
                action,
                applied,
                total,
                ..
            }) => {
                assert_eq!(action, Action::SaveAll);
                assert_eq!(applied, 2);
                assert_eq!(total, 4);
            }
            other => panic!("expected partial apply, got {other:?}"),
        }
        assert_eq!(store.inner.personnel_count(), 2);

        assert!(matches!(
            applier.apply(&Envelope::DeleteAll),
            Err(ClientError::PartialApply { applied: 0, total: 2, .. })
        ));
    }
}
