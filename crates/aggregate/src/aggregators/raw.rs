use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use archivist_core::{ArchiveId, Record};
use tracing::debug;

use crate::aggregator::{Aggregator, AggregatorKind, Snapshot};
use crate::error::AggregateError;

const FILE_NAME: &str = "raw.jsonl.zst";

/// Buffers records and appends them to a compressed dump on `generate`.
///
/// Each `generate` call writes one zstd frame; the file is a valid multi-frame
/// stream that decodes back to newline-delimited JSON.
pub struct RawAggregator {
    archive: ArchiveId,
    artifacts_dir: PathBuf,
    pending: Vec<String>,
    written: u64,
}

impl RawAggregator {
    pub fn new(archive: ArchiveId, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive,
            artifacts_dir: artifacts_dir.into(),
            pending: Vec::new(),
            written: 0,
        }
    }

    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.archive.to_string()).join(FILE_NAME)
    }

    /// Records written to disk so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Aggregator for RawAggregator {
    fn kind(&self) -> AggregatorKind {
        AggregatorKind::Raw
    }

    fn collect(&mut self, record: &Record) -> Result<(), AggregateError> {
        self.pending.push(serde_json::to_string(record.as_value())?);
        Ok(())
    }

    fn generate(&mut self) -> Result<Snapshot, AggregateError> {
        if self.pending.is_empty() {
            return Ok(Snapshot::Empty);
        }

        let relative = self.relative_path();
        let path = self.artifacts_dir.join(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut encoder = zstd::Encoder::new(BufWriter::new(file), 3)?;
        for line in &self.pending {
            encoder.write_all(line.as_bytes())?;
            encoder.write_all(b"\n")?;
        }
        let mut buf = encoder.finish()?;
        buf.flush()?;

        self.written += self.pending.len() as u64;
        debug!(
            archive_id = %self.archive,
            records = self.pending.len(),
            path = %path.display(),
            "Raw records appended"
        );
        self.pending.clear();

        Ok(Snapshot::Artifact(relative))
    }
}
