//! In-process [`ArchiveStore`] backed by a mutex-guarded map.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::archive::{Archive, ArchiveField, ArchiveId, OwnerId, OwnerStatus};
use crate::error::StoreError;

use super::{ArchiveQuery, ArchiveStore};

#[derive(Default)]
struct Inner {
    archives: BTreeMap<ArchiveId, Archive>,
    owners: HashMap<OwnerId, OwnerStatus>,
}

/// Archive store held entirely in memory.
#[derive(Default)]
pub struct MemoryArchiveStore {
    inner: Mutex<Inner>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an archive.
    pub fn insert(&self, archive: Archive) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.archives.insert(archive.id, archive);
        Ok(())
    }

    pub fn set_owner_status(&self, owner: OwnerId, status: OwnerStatus) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.owners.insert(owner, status);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::LockPoisoned(format!("memory archive store: {e}")))
    }
}

impl ArchiveStore for MemoryArchiveStore {
    fn get(&self, id: ArchiveId) -> Result<Option<Archive>, StoreError> {
        Ok(self.lock()?.archives.get(&id).cloned())
    }

    fn query(&self, query: &ArchiveQuery) -> Result<Vec<Archive>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .archives
            .values()
            .filter(|a| {
                let status = inner.owners.get(&a.owner).copied().unwrap_or_default();
                query.matches(a, status)
            })
            .cloned()
            .collect())
    }

    fn save_fields(&self, archive: &Archive, fields: &[ArchiveField]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stored = inner
            .archives
            .get_mut(&archive.id)
            .ok_or(StoreError::ArchiveNotFound(archive.id))?;
        stored.apply_fields(archive, fields);
        Ok(())
    }

    fn owner_status(&self, owner: &OwnerId) -> Result<OwnerStatus, StoreError> {
        Ok(self.lock()?.owners.get(owner).copied().unwrap_or_default())
    }
}
