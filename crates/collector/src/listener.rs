//! Routes upstream records to the archives that asked for them.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use archivist_core::{Archive, ArchiveId, Record, RecordLog, Verbosity};
use archivist_queue::QueuePublisher;
use tracing::{debug, warn};

use crate::error::StreamError;

struct Route {
    archive: ArchiveId,
    queue: String,
    /// Each term is a set of lowercase words that must all appear.
    terms: Vec<Vec<String>>,
}

impl Route {
    fn matches(&self, text: &str) -> bool {
        self.terms
            .iter()
            .any(|words| !words.is_empty() && words.iter().all(|w| text.contains(w.as_str())))
    }
}

/// Listener bound to one owner's group of archives.
///
/// Every matching record is appended to the archive's record log and then
/// published onto its queue.
pub struct ArchiveListener {
    routes: Vec<Route>,
    log: Arc<dyn RecordLog>,
    publisher: Arc<dyn QueuePublisher>,
    verbosity: AtomicU8,
}

impl ArchiveListener {
    pub fn new(
        archives: &[Archive],
        log: Arc<dyn RecordLog>,
        publisher: Arc<dyn QueuePublisher>,
        verbosity: Verbosity,
    ) -> Self {
        let routes = archives
            .iter()
            .map(|archive| Route {
                archive: archive.id,
                queue: archive.queue_name(),
                terms: archive
                    .terms()
                    .iter()
                    .map(|t| t.split_whitespace().map(str::to_lowercase).collect())
                    .collect(),
            })
            .collect();
        Self {
            routes,
            log,
            publisher,
            verbosity: AtomicU8::new(verbosity.into()),
        }
    }

    pub fn archive_ids(&self) -> Vec<ArchiveId> {
        self.routes.iter().map(|r| r.archive).collect()
    }

    pub fn set_verbosity(&self, level: Verbosity) {
        self.verbosity.store(level.into(), Ordering::Relaxed);
    }

    fn verbosity(&self) -> Verbosity {
        Verbosity::try_from(self.verbosity.load(Ordering::Relaxed)).unwrap_or_default()
    }

    /// Handle one line of the upstream response. Returns how many archives
    /// received the record. Keep-alive blanks and non-record lines route nowhere.
    pub async fn on_line(&self, line: &str) -> Result<usize, StreamError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(0);
        }

        let record = match Record::parse(line) {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "Skipping non-record line from upstream");
                return Ok(0);
            }
        };
        let text = record.text().to_lowercase();

        let mut routed = 0;
        for route in self.routes.iter().filter(|r| r.matches(&text)) {
            self.log.append(route.archive, line)?;
            self.publisher.publish(&route.queue, line).await?;
            routed += 1;
        }

        if self.verbosity() == Verbosity::Debug {
            debug!(record_id = record.id().unwrap_or("-"), routed, "Record received");
        }
        Ok(routed)
    }

    /// Flush and release every bound archive's log.
    pub fn close(&self) -> Result<(), StreamError> {
        let mut first_err = None;
        for route in &self.routes {
            if let Err(e) = self.log.close(route.archive) {
                warn!(archive_id = %route.archive, error = %e, "Failed to close record log");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_core::MemoryRecordLog;
    use archivist_queue::MemoryBroker;
    use chrono::Utc;

    fn listener(log: Arc<MemoryRecordLog>, broker: MemoryBroker) -> ArchiveListener {
        let now = Utc::now();
        let archives = vec![
            Archive::new(7, "alice", "rust lang, ferris", now),
            Archive::new(9, "alice", "tokio", now),
        ];
        ArchiveListener::new(&archives, log, Arc::new(broker), Verbosity::Normal)
    }

    fn collect(log: &MemoryRecordLog, id: u64) -> Vec<String> {
        log.replay(ArchiveId(id))
            .unwrap()
            .map(|l| String::from_utf8(l.unwrap()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_routes_by_terms() {
        let log = Arc::new(MemoryRecordLog::new());
        let broker = MemoryBroker::new();
        let listener = listener(log.clone(), broker.clone());

        let both = r#"{"id_str":"1","text":"Ferris loves Tokio"}"#;
        let words_apart = r#"{"id_str":"2","text":"Lang design in Rust"}"#;
        let neither = r#"{"id_str":"3","text":"rustacean"}"#;

        assert_eq!(listener.on_line(both).await.unwrap(), 2);
        assert_eq!(listener.on_line(words_apart).await.unwrap(), 1);
        assert_eq!(listener.on_line(neither).await.unwrap(), 0);

        assert_eq!(collect(&log, 7), vec![both.to_string(), words_apart.to_string()]);
        assert_eq!(collect(&log, 9), vec![both.to_string()]);
        assert_eq!(broker.pending("archiver-7"), 2);
        assert_eq!(broker.pending("archiver-9"), 1);
    }

    #[tokio::test]
    async fn test_skips_keepalives_and_garbage() {
        let log = Arc::new(MemoryRecordLog::new());
        let broker = MemoryBroker::new();
        let listener = listener(log.clone(), broker.clone());

        assert_eq!(listener.on_line("\r\n").await.unwrap(), 0);
        assert_eq!(listener.on_line("{\"limit\":").await.unwrap(), 0);
        assert!(collect(&log, 7).is_empty());
        assert_eq!(listener.archive_ids(), vec![ArchiveId(7), ArchiveId(9)]);
    }
}
