//! The aggregator pipeline run by one consumption worker.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use archivist_core::{Archive, ArchiveId, Record};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::aggregator::Aggregator;
use crate::aggregators::{
    CloudAggregator, ImagesAggregator, MapAggregator, RawAggregator, SearchAggregator,
    StatisticsAggregator,
};
use crate::error::AggregateError;

/// All six aggregators for one archive.
///
/// Live records feed raw, cloud, images, statistics and map (plus search when
/// the archive allows it). Replayed records skip raw since they are already
/// on disk.
pub struct AggregatorSet {
    pub raw: RawAggregator,
    pub cloud: CloudAggregator,
    pub images: ImagesAggregator,
    pub map: MapAggregator,
    pub search: SearchAggregator,
    pub statistics: StatisticsAggregator,
    allow_search: bool,
}

impl AggregatorSet {
    pub fn for_archive(archive: &Archive, artifacts_dir: &Path) -> Self {
        Self {
            raw: RawAggregator::new(archive.id, artifacts_dir),
            cloud: CloudAggregator::new(archive),
            images: ImagesAggregator::new(),
            map: MapAggregator::new(archive.id, artifacts_dir),
            search: SearchAggregator::new(),
            statistics: StatisticsAggregator::new(),
            allow_search: archive.allow_search,
        }
    }

    /// Feed a record received from the queue.
    pub fn collect_live(&mut self, record: &Record) -> Result<(), AggregateError> {
        self.raw.collect(record)?;
        self.cloud.collect(record)?;
        self.images.collect(record)?;
        self.statistics.collect(record)?;
        self.map.collect(record)?;
        if self.allow_search {
            self.search.collect(record)?;
        }
        Ok(())
    }

    /// Feed a record read back from the archive's record log.
    pub fn collect_replay(&mut self, record: &Record) -> Result<(), AggregateError> {
        self.map.collect(record)?;
        self.cloud.collect(record)?;
        self.images.collect(record)?;
        self.statistics.collect(record)?;
        if self.allow_search {
            self.search.collect(record)?;
        }
        Ok(())
    }

    pub fn total(&self) -> u64 {
        self.statistics.total()
    }

    /// Generate every snapshot into `archive`, stamping `*_generated` with `now`.
    ///
    /// Leaves `size` to the caller, which owns the record log.
    pub fn distill(&mut self, archive: &mut Archive, now: DateTime<Utc>) -> Result<(), AggregateError> {
        self.raw.generate()?;
        if let Some(path) = self.map.generate()?.into_artifact() {
            archive.map = Some(path.to_string_lossy().into_owned());
        }
        archive.map_generated = Some(now);

        archive.cloud = self.cloud.generate()?.into_value();
        archive.cloud_generated = Some(now);
        archive.statistics = self.statistics.generate()?.into_value();
        archive.statistics_generated = Some(now);
        archive.images = self.images.generate()?.into_value();
        archive.images_generated = Some(now);
        archive.total = self.statistics.total();

        debug!(archive_id = %archive.id, total = archive.total, "Distilled aggregates");
        Ok(())
    }
}

/// Directory holding one archive's artifacts.
pub fn archive_artifacts_dir(artifacts_dir: &Path, archive: ArchiveId) -> PathBuf {
    artifacts_dir.join(archive.to_string())
}

/// Total bytes of the files in an archive's artifacts directory.
pub fn artifacts_size(artifacts_dir: &Path, archive: ArchiveId) -> io::Result<u64> {
    let dir = archive_artifacts_dir(artifacts_dir, archive);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut total = 0;
    for entry in entries {
        let meta = entry?.metadata()?;
        if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}
