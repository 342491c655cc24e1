//! Archive persistence.
//!
//! [`ArchiveStore`] is the query/command surface both the supervisor and the
//! consumption workers use. Updates name the exact [`ArchiveField`] subset to
//! write so that concurrent writers touching disjoint fields never clobber each
//! other.

mod file;
mod memory;
mod query;


use crate::archive::{Archive, ArchiveField, ArchiveId, OwnerId, OwnerStatus};
use crate::error::StoreError;

pub use self::file::JsonFileArchiveStore;
pub use self::memory::MemoryArchiveStore;
pub use self::query::ArchiveQuery;

/// Queryable, mutable collection of archives and their owners.
pub trait ArchiveStore: Send + Sync {
    /// Fetch one archive by id.
    fn get(&self, id: ArchiveId) -> Result<Option<Archive>, StoreError>;

    /// All archives matching `query`, ordered by id.
    fn query(&self, query: &ArchiveQuery) -> Result<Vec<Archive>, StoreError>;

    /// Persist only `fields` of `archive`. Fails if the archive does not exist.
    fn save_fields(&self, archive: &Archive, fields: &[ArchiveField]) -> Result<(), StoreError>;

    /// Status of an owner. Unknown owners are treated as active.
    fn owner_status(&self, owner: &OwnerId) -> Result<OwnerStatus, StoreError>;
}
