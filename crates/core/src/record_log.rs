//! Durable per-archive record logs.
//!
//! Every raw record routed to an archive is appended to that archive's log in
//! arrival order. Consumption workers replay the log on cold start to rebuild
//! their aggregates; they never write to it.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::archive::ArchiveId;
use crate::error::StoreError;

/// Lazy iterator over the raw lines of one archive's log, without the line
/// terminator. Lines are bytes: a line torn by a crash may not be valid UTF-8,
/// and deciding what to do with it is the reader's business. An `Err` is a
/// failure to read the log itself.
pub type RecordLines = Box<dyn Iterator<Item = Result<Vec<u8>, StoreError>> + Send>;

/// Append-only, replayable record storage keyed by archive.
pub trait RecordLog: Send + Sync {
    /// Append one raw serialized record.
    fn append(&self, archive: ArchiveId, line: &str) -> Result<(), StoreError>;

    /// Replay every logged record for `archive`, oldest first. Calling this
    /// again restarts from the beginning.
    fn replay(&self, archive: ArchiveId) -> Result<RecordLines, StoreError>;

    /// Bytes currently held for `archive`.
    fn size(&self, archive: ArchiveId) -> Result<u64, StoreError>;

    /// Release any open handle for `archive`. Later appends reopen it.
    fn close(&self, archive: ArchiveId) -> Result<(), StoreError>;
}

// ── In-memory ────────────────────────────────────────────────

/// Record log held in memory (tests and single-process runs).
#[derive(Default)]
pub struct MemoryRecordLog {
    lines: Mutex<HashMap<ArchiveId, Vec<String>>>,
}

impl MemoryRecordLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ArchiveId, Vec<String>>>, StoreError> {
        self.lines
            .lock()
            .map_err(|e| StoreError::LockPoisoned(format!("memory record log: {e}")))
    }
}

impl RecordLog for MemoryRecordLog {
    fn append(&self, archive: ArchiveId, line: &str) -> Result<(), StoreError> {
        self.lock()?
            .entry(archive)
            .or_default()
            .push(line.trim_end().to_string());
        Ok(())
    }

    fn replay(&self, archive: ArchiveId) -> Result<RecordLines, StoreError> {
        let snapshot = self.lock()?.get(&archive).cloned().unwrap_or_default();
        Ok(Box::new(snapshot.into_iter().map(|line| Ok(line.into_bytes()))))
    }

    fn size(&self, archive: ArchiveId) -> Result<u64, StoreError> {
        Ok(self
            .lock()?
            .get(&archive)
            .map(|lines| lines.iter().map(|l| l.len() as u64 + 1).sum())
            .unwrap_or(0))
    }

    fn close(&self, _archive: ArchiveId) -> Result<(), StoreError> {
        Ok(())
    }
}

// ── File-backed ──────────────────────────────────────────────

/// Record log stored as `{dir}/{archive_id}.jsonl`, one record per line.
pub struct FileRecordLog {
    dir: PathBuf,
    handles: Mutex<HashMap<ArchiveId, File>>,
}

impl FileRecordLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, archive: ArchiveId) -> PathBuf {
        self.dir.join(format!("{archive}.jsonl"))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ArchiveId, File>>, StoreError> {
        self.handles
            .lock()
            .map_err(|e| StoreError::LockPoisoned(format!("file record log: {e}")))
    }
}

impl RecordLog for FileRecordLog {
    fn append(&self, archive: ArchiveId, line: &str) -> Result<(), StoreError> {
        let mut handles = self.lock()?;
        let file = match handles.entry(archive) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                std::fs::create_dir_all(&self.dir)?;
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.path_for(archive))?;
                entry.insert(file)
            }
        };
        // One write per record so a concurrent reader sees whole lines.
        let mut buf = line.trim_end().as_bytes().to_vec();
        buf.push(b'\n');
        file.write_all(&buf)?;
        Ok(())
    }

    fn replay(&self, archive: ArchiveId) -> Result<RecordLines, StoreError> {
        let path = self.path_for(archive);
        if !path.exists() {
            return Ok(Box::new(std::iter::empty()));
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(Box::new(reader.split(b'\n').map(|line| {
            let mut line = line?;
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            Ok(line)
        })))
    }

    fn size(&self, archive: ArchiveId) -> Result<u64, StoreError> {
        match std::fs::metadata(self.path_for(archive)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self, archive: ArchiveId) -> Result<(), StoreError> {
        if let Some(mut file) = self.lock()?.remove(&archive) {
            file.flush()?;
        }
        Ok(())
    }
}
