//! File-backed personnel repository.

use crate::error::{StoreError, StoreResult};
use crate::repository::{PersonnelRepository, Upserted};
use crate::table::{PersonnelTable, Snapshot};
use parking_lot::Mutex;
use rollcall_protocol::PersonnelRecord;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A personnel repository persisted as a JSON snapshot.
///
/// Records survive process restarts. Every mutation rewrites the whole
/// snapshot: the new contents go to a sibling `*.tmp` file which is synced
/// and then renamed over the original, so a crash leaves either the old
/// or the new snapshot on disk, never a mix.
///
/// # Thread Safety
///
/// One mutex covers both the table and the file, so the on-disk order of
/// snapshots matches the order of mutations.
///
/// # Blocking
///
/// Every mutation creates, syncs and renames a file on the calling thread.
/// Async callers should run it on a blocking thread
/// (`tokio::task::spawn_blocking`), as the client agent does.
///
/// # Example
///
/// ```no_run
/// use rollcall_protocol::PersonnelRecord;
/// use rollcall_store::{FileStore, PersonnelRepository};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("client_one.json")).unwrap();
/// store.upsert_personnel(PersonnelRecord::new("Michael", "Davis", "111-22-3333")).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    table: Mutex<PersonnelTable>,
}

impl FileStore {
    /// Opens the snapshot at `path`, or starts empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed,
    /// or [`StoreError::InvalidRecord`] if it repeats an id or ssn.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let table = match fs::read(path) {
            Ok(bytes) if bytes.is_empty() => PersonnelTable::new(),
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                PersonnelTable::from_snapshot(snapshot)?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => PersonnelTable::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };

        debug!("opened personnel snapshot {:?} with {} records", path, table.len());
        Ok(Self {
            path: path.to_path_buf(),
            table: Mutex::new(table),
        })
    }

    /// Returns the path to the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Writes the table to disk. Called with the table lock held.
    fn persist(&self, table: &PersonnelTable) -> StoreResult<()> {
        let tmp = self.tmp_path();
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &table.snapshot())?;
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| StoreError::Io(e.into_error()))?
                .sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Applies `mutate` and persists the result. If the snapshot cannot be
    /// written the in-memory table is restored to its previous contents.
    fn mutate<T>(&self, mutate: impl FnOnce(&mut PersonnelTable) -> T) -> StoreResult<T> {
        let mut table = self.table.lock();
        let before = table.clone();
        let result = mutate(&mut table);
        if let Err(e) = self.persist(&table) {
            *table = before;
            return Err(e);
        }
        Ok(result)
    }
}

impl PersonnelRepository for FileStore {
    fn find_personnel_by_ssn(&self, ssn: &str) -> StoreResult<Option<PersonnelRecord>> {
        Ok(self.table.lock().get(ssn))
    }

    fn list_all_personnel(&self) -> StoreResult<Vec<PersonnelRecord>> {
        Ok(self.table.lock().list())
    }

    fn upsert_personnel(&self, record: PersonnelRecord) -> StoreResult<Upserted> {
        self.mutate(|table| table.upsert(record))
    }

    fn delete_personnel_by_ssn(&self, ssn: &str) -> StoreResult<bool> {
        if self.table.lock().get(ssn).is_none() {
            return Ok(false);
        }
        self.mutate(|table| table.remove(ssn))
    }

    fn delete_all_personnel(&self) -> StoreResult<usize> {
        self.mutate(PersonnelTable::clear)
    }
}
