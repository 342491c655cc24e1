//! The [`Archive`] entity: one scheduled ingestion job.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque archive primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveId(pub u64);

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity owning one or more archives. Upstream credentials are per owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account status of an owner. Disabled owners never have archives (re)started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerStatus {
    #[default]
    Active,
    Disabled,
}

/// Persisted fields of an [`Archive`], used to name the subset written by an update.
///
/// The supervisor only ever writes [`ArchiveField::IsRunning`]; the consumption
/// worker only writes [`ArchiveField::DISTILLATION`]. The two sets must stay disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveField {
    IsRunning,
    Total,
    Size,
    Cloud,
    CloudGenerated,
    Statistics,
    StatisticsGenerated,
    Images,
    ImagesGenerated,
    Map,
    MapGenerated,
}

impl ArchiveField {
    /// Fields written by a distillation flush.
    pub const DISTILLATION: &'static [ArchiveField] = &[
        ArchiveField::Cloud,
        ArchiveField::CloudGenerated,
        ArchiveField::Images,
        ArchiveField::ImagesGenerated,
        ArchiveField::Statistics,
        ArchiveField::StatisticsGenerated,
        ArchiveField::Map,
        ArchiveField::MapGenerated,
        ArchiveField::Size,
        ArchiveField::Total,
    ];

    /// Fields written by the stream supervisor.
    pub const TRACKING: &'static [ArchiveField] = &[ArchiveField::IsRunning];
}

/// A scheduled ingestion job with a query filter and a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    pub id: ArchiveId,
    pub owner: OwnerId,
    /// Comma-separated filter terms sent upstream.
    pub query: String,
    pub started: DateTime<Utc>,
    #[serde(default)]
    pub stopped: Option<DateTime<Utc>>,
    /// `None` until the supervisor first starts the archive; `Some(false)`
    /// once it has been explicitly stopped.
    #[serde(default)]
    pub is_running: Option<bool>,
    #[serde(default = "default_true")]
    pub allow_consumption: bool,
    #[serde(default)]
    pub allow_search: bool,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub cloud: Option<serde_json::Value>,
    #[serde(default)]
    pub cloud_generated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub statistics: Option<serde_json::Value>,
    #[serde(default)]
    pub statistics_generated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub images: Option<serde_json::Value>,
    #[serde(default)]
    pub images_generated: Option<DateTime<Utc>>,
    /// Location of the most recent geo artifact, relative to the artifacts dir.
    #[serde(default)]
    pub map: Option<String>,
    #[serde(default)]
    pub map_generated: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Archive {
    /// Create a new archive with an open-ended window starting at `started`.
    pub fn new(id: u64, owner: impl Into<String>, query: impl Into<String>, started: DateTime<Utc>) -> Self {
        Self {
            id: ArchiveId(id),
            owner: OwnerId::new(owner),
            query: query.into(),
            started,
            stopped: None,
            is_running: None,
            allow_consumption: true,
            allow_search: false,
            total: 0,
            size: 0,
            cloud: None,
            cloud_generated: None,
            statistics: None,
            statistics_generated: None,
            images: None,
            images_generated: None,
            map: None,
            map_generated: None,
        }
    }

    /// Set the end of the window.
    pub fn stopping_at(mut self, stopped: DateTime<Utc>) -> Self {
        self.stopped = Some(stopped);
        self
    }

    /// Name of the queue this archive's records are published to.
    pub fn queue_name(&self) -> String {
        queue_name(self.id)
    }

    /// Individual filter terms, trimmed, empty terms dropped.
    pub fn terms(&self) -> Vec<String> {
        self.query
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Whether the window has opened at `now`.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.started <= now
    }

    /// Whether the window is still open (or unbounded) at `now`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.stopped.map_or(true, |stopped| stopped > now)
    }

    /// Whether the window has closed at `now`.
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.stopped.is_some_and(|stopped| stopped <= now)
    }

    /// Whether the supervisor currently considers this archive running.
    pub fn running(&self) -> bool {
        self.is_running == Some(true)
    }

    /// Copy `fields` from `other` into `self`, leaving every other field untouched.
    pub fn apply_fields(&mut self, other: &Archive, fields: &[ArchiveField]) {
        for field in fields {
            match field {
                ArchiveField::IsRunning => self.is_running = other.is_running,
                ArchiveField::Total => self.total = other.total,
                ArchiveField::Size => self.size = other.size,
                ArchiveField::Cloud => self.cloud = other.cloud.clone(),
                ArchiveField::CloudGenerated => self.cloud_generated = other.cloud_generated,
                ArchiveField::Statistics => self.statistics = other.statistics.clone(),
                ArchiveField::StatisticsGenerated => {
                    self.statistics_generated = other.statistics_generated
                }
                ArchiveField::Images => self.images = other.images.clone(),
                ArchiveField::ImagesGenerated => self.images_generated = other.images_generated,
                ArchiveField::Map => self.map = other.map.clone(),
                ArchiveField::MapGenerated => self.map_generated = other.map_generated,
            }
        }
    }
}

impl fmt::Display for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} \"{}\" ({})", self.id, self.query, self.owner)
    }
}

/// Queue name for an archive id.
pub fn queue_name(id: ArchiveId) -> String {
    format!("archiver-{}", id.0)
}
