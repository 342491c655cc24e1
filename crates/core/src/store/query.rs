//! [`ArchiveQuery`]: composable archive filter shared by every store backend.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::archive::{Archive, ArchiveId, OwnerStatus};

/// Filter over archives. Every set criterion must hold for an archive to match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveQuery {
    started_by: Option<DateTime<Utc>>,
    open_at: Option<DateTime<Utc>>,
    expired_by: Option<DateTime<Utc>>,
    running: Option<bool>,
    exclude_stopped: bool,
    ids: Option<BTreeSet<ArchiveId>>,
    exclude_ids: BTreeSet<ArchiveId>,
    active_owners_only: bool,
}

impl ArchiveQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// `started <= now`.
    pub fn started_by(mut self, now: DateTime<Utc>) -> Self {
        self.started_by = Some(now);
        self
    }

    /// `stopped > now` or unset.
    pub fn open_at(mut self, now: DateTime<Utc>) -> Self {
        self.open_at = Some(now);
        self
    }

    /// `stopped <= now`.
    pub fn expired_by(mut self, now: DateTime<Utc>) -> Self {
        self.expired_by = Some(now);
        self
    }

    /// `is_running == Some(running)`.
    pub fn running(mut self, running: bool) -> Self {
        self.running = Some(running);
        self
    }

    /// Drop archives explicitly marked not-running (`is_running == Some(false)`).
    pub fn exclude_stopped(mut self) -> Self {
        self.exclude_stopped = true;
        self
    }

    /// Restrict to the given ids.
    pub fn ids(mut self, ids: impl IntoIterator<Item = ArchiveId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    /// Drop the given ids.
    pub fn exclude_ids(mut self, ids: impl IntoIterator<Item = ArchiveId>) -> Self {
        self.exclude_ids.extend(ids);
        self
    }

    /// Drop archives whose owner is disabled.
    pub fn active_owners_only(mut self) -> Self {
        self.active_owners_only = true;
        self
    }

    /// Evaluate the filter against one archive.
    pub fn matches(&self, archive: &Archive, owner_status: OwnerStatus) -> bool {
        if let Some(now) = self.started_by {
            if !archive.has_started(now) {
                return false;
            }
        }
        if let Some(now) = self.open_at {
            if !archive.is_open(now) {
                return false;
            }
        }
        if let Some(now) = self.expired_by {
            if !archive.has_expired(now) {
                return false;
            }
        }
        if let Some(running) = self.running {
            if archive.is_running != Some(running) {
                return false;
            }
        }
        if self.exclude_stopped && archive.is_running == Some(false) {
            return false;
        }
        if let Some(ids) = &self.ids {
            if !ids.contains(&archive.id) {
                return false;
            }
        }
        if self.exclude_ids.contains(&archive.id) {
            return false;
        }
        if self.active_owners_only && owner_status == OwnerStatus::Disabled {
            return false;
        }
        true
    }
}
