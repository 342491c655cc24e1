//! Upstream stream connections.

use archivist_core::{Archive, ArchiveId, OwnerId, Verbosity};
use async_trait::async_trait;

use crate::error::StreamError;

/// One live upstream connection carrying records for one or more archives
/// of a single owner.
pub trait StreamChannel: Send + Sync {
    fn owner(&self) -> &OwnerId;

    /// False once the upstream response has ended or failed.
    fn running(&self) -> bool;

    /// Archives bound to this connection.
    fn channels(&self) -> &[ArchiveId];

    /// Tear down the connection. Idempotent.
    fn disconnect(&mut self);

    /// Flush and release the record logs of every bound archive.
    fn close_log(&mut self) -> Result<(), StreamError>;

    fn set_verbosity(&mut self, level: Verbosity);
}

/// Opens authenticated upstream connections.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open one connection for `owner` tracking the union of the archives' terms.
    async fn open(
        &self,
        owner: &OwnerId,
        archives: &[Archive],
        verbosity: Verbosity,
    ) -> Result<Box<dyn StreamChannel>, StreamError>;
}

/// Union of the archives' filter terms, first occurrence order, case-insensitive dedup.
pub fn union_terms(archives: &[Archive]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    archives
        .iter()
        .flat_map(Archive::terms)
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}
