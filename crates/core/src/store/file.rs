//! [`JsonFileArchiveStore`]: archive store persisted as a single JSON file.
//!
//! The file is re-read on every call so that the collector and consumer
//! processes observe each other's writes. Every read-modify-write cycle holds
//! an exclusive advisory lock on `archives.json.lock`, so two processes
//! writing disjoint fields never drop each other's updates. The new contents
//! go to a uniquely named temp file in the same directory, which is then
//! renamed over the original, so readers never see a torn file.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::archive::{Archive, ArchiveField, ArchiveId, OwnerId, OwnerStatus};
use crate::error::StoreError;

use super::{ArchiveQuery, ArchiveStore};

const STORE_FILE: &str = "archives.json";
const LOCK_FILE: &str = "archives.json.lock";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    owners: BTreeMap<OwnerId, OwnerStatus>,
    #[serde(default)]
    archives: Vec<Archive>,
}

impl StoreFile {
    fn owner_status(&self, owner: &OwnerId) -> OwnerStatus {
        self.owners.get(owner).copied().unwrap_or_default()
    }
}

/// Archive store backed by `{data_dir}/archives.json`.
pub struct JsonFileArchiveStore {
    path: PathBuf,
    lock_path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileArchiveStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(STORE_FILE),
            lock_path: data_dir.join(LOCK_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace an archive.
    pub fn insert(&self, archive: Archive) -> Result<(), StoreError> {
        self.modify(|file| {
            file.archives.retain(|a| a.id != archive.id);
            file.archives.push(archive);
            file.archives.sort_by_key(|a| a.id);
            Ok(())
        })
    }

    pub fn set_owner_status(&self, owner: OwnerId, status: OwnerStatus) -> Result<(), StoreError> {
        self.modify(|file| {
            file.owners.insert(owner, status);
            Ok(())
        })
    }

    fn load(&self) -> Result<StoreFile, StoreError> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(StoreFile::default());
        }
        Ok(serde_json::from_str(&data)?)
    }

    fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Blocks until no other process holds the store lock. The lock is
    /// released when the returned handle is closed.
    fn lock_exclusive(&self) -> Result<File, StoreError> {
        std::fs::create_dir_all(self.dir())?;
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        lock.lock_exclusive()?;
        Ok(lock)
    }

    fn save(&self, file: &StoreFile) -> Result<(), StoreError> {
        let mut tmp = NamedTempFile::new_in(self.dir())?;
        tmp.write_all(serde_json::to_string_pretty(file)?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn modify<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut StoreFile) -> Result<(), StoreError>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| StoreError::LockPoisoned(format!("archive store file: {e}")))?;
        let _lock = self.lock_exclusive()?;
        let mut file = self.load()?;
        f(&mut file)?;
        self.save(&file)
    }
}

impl ArchiveStore for JsonFileArchiveStore {
    fn get(&self, id: ArchiveId) -> Result<Option<Archive>, StoreError> {
        Ok(self.load()?.archives.into_iter().find(|a| a.id == id))
    }

    fn query(&self, query: &ArchiveQuery) -> Result<Vec<Archive>, StoreError> {
        let file = self.load()?;
        let mut matched: Vec<Archive> = file
            .archives
            .iter()
            .filter(|a| query.matches(a, file.owner_status(&a.owner)))
            .cloned()
            .collect();
        matched.sort_by_key(|a| a.id);
        Ok(matched)
    }

    fn save_fields(&self, archive: &Archive, fields: &[ArchiveField]) -> Result<(), StoreError> {
        self.modify(|file| {
            let stored = file
                .archives
                .iter_mut()
                .find(|a| a.id == archive.id)
                .ok_or(StoreError::ArchiveNotFound(archive.id))?;
            stored.apply_fields(archive, fields);
            Ok(())
        })?;
        debug!(archive_id = %archive.id, fields = fields.len(), "archive fields saved");
        Ok(())
    }

    fn owner_status(&self, owner: &OwnerId) -> Result<OwnerStatus, StoreError> {
        Ok(self.load()?.owner_status(owner))
    }
}
