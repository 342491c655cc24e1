//! Keeps one consumption worker alive per running archive.
//!
//! Store-driven: every interval the manager reads the archives the collector
//! has marked running, spawns workers for new ones, respawns workers that
//! stopped themselves, and stops workers whose archive is no longer running.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use archivist_core::{Archive, ArchiveId, ArchiveQuery, StoreError};
use tracing::{error, info, warn};

use crate::binding::QueueBinder;
use crate::error::ConsumerError;
use crate::worker::{ArchiveConsumer, ConsumerContext, ConsumerHandle, ExitReason, WorkerOutcome};

/// What one reconciliation pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ManagerPass {
    pub spawned: Vec<ArchiveId>,
    pub respawned: Vec<ArchiveId>,
    pub stopped: Vec<ArchiveId>,
}

pub struct ConsumerManager {
    ctx: ConsumerContext,
    binder: Arc<dyn QueueBinder>,
    workers: BTreeMap<ArchiveId, ConsumerHandle>,
}

impl ConsumerManager {
    pub fn new(ctx: ConsumerContext, binder: Arc<dyn QueueBinder>) -> Self {
        Self {
            ctx,
            binder,
            workers: BTreeMap::new(),
        }
    }

    pub fn worker_ids(&self) -> Vec<ArchiveId> {
        self.workers.keys().copied().collect()
    }

    pub fn worker(&self, id: ArchiveId) -> Option<&ConsumerHandle> {
        self.workers.get(&id)
    }

    /// Align the worker set with the archives currently marked running.
    pub async fn reconcile(&mut self) -> Result<ManagerPass, StoreError> {
        let running: BTreeMap<ArchiveId, Archive> = self
            .ctx
            .store
            .query(&ArchiveQuery::new().running(true))?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        let mut pass = ManagerPass::default();

        // Reap workers that exited on their own.
        let finished: Vec<ArchiveId> = self
            .workers
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        let mut respawn = BTreeSet::new();
        for id in finished {
            if let Some(handle) = self.workers.remove(&id) {
                let exit = log_outcome(id, handle.join().await);
                if running.contains_key(&id) && exit != Some(ExitReason::Stopped) {
                    respawn.insert(id);
                }
            }
        }

        // Stop workers whose archive is no longer running.
        let retired: Vec<ArchiveId> = self
            .workers
            .keys()
            .filter(|id| !running.contains_key(id))
            .copied()
            .collect();
        for id in retired {
            if let Some(handle) = self.workers.remove(&id) {
                info!(archive_id = %id, "Archive no longer running, stopping consumer");
                log_outcome(id, handle.shutdown().await);
                pass.stopped.push(id);
            }
        }

        for (id, archive) in running {
            if self.workers.contains_key(&id) {
                continue;
            }
            match self.spawn(archive) {
                Ok(()) if respawn.contains(&id) => pass.respawned.push(id),
                Ok(()) => pass.spawned.push(id),
                Err(e) => {
                    error!(archive_id = %id, error = %e, "Failed to start consumer");
                    self.ctx
                        .alerts
                        .alert(&format!("Consumer failed to bind queue for archive #{id}"), &e)
                        .await;
                }
            }
        }

        Ok(pass)
    }

    fn spawn(&mut self, archive: Archive) -> Result<(), ConsumerError> {
        let binding = if archive.allow_consumption {
            Some(self.binder.bind_queue(&archive.queue_name())?)
        } else {
            None
        };
        let id = archive.id;
        let handle = ArchiveConsumer::new(archive, self.ctx.clone(), binding).spawn();
        self.workers.insert(id, handle);
        Ok(())
    }

    /// Stop every worker and wait for each final distillation.
    pub async fn shutdown(&mut self) {
        info!(workers = self.workers.len(), "Stopping all consumers");
        let workers = std::mem::take(&mut self.workers);
        for handle in workers.values() {
            handle.stop();
        }
        for (id, handle) in workers {
            log_outcome(id, handle.join().await);
        }
    }

    /// Reconcile on the configured interval until `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!(interval = ?self.ctx.config.manager_interval, "Consumer manager started");

        loop {
            match self.reconcile().await {
                Ok(pass) if pass != ManagerPass::default() => {
                    info!(
                        spawned = ?pass.spawned,
                        respawned = ?pass.respawned,
                        stopped = ?pass.stopped,
                        workers = self.workers.len(),
                        "Consumers reconciled"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Consumer reconciliation failed");
                    self.ctx.alerts.alert("Consumer reconciliation failed", &e).await;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.ctx.config.manager_interval) => {}
                _ = &mut shutdown => break,
            }
        }

        self.shutdown().await;
        info!("Consumer manager stopped");
    }
}

fn log_outcome(id: ArchiveId, outcome: Result<WorkerOutcome, ConsumerError>) -> Option<ExitReason> {
    match outcome {
        Ok(outcome) => {
            info!(
                archive_id = %id,
                exit = ?outcome.exit,
                replayed = outcome.replayed,
                processed = outcome.processed,
                ignored = outcome.ignored,
                distillations = outcome.distillations,
                "Consumer exited"
            );
            Some(outcome.exit)
        }
        Err(e) => {
            warn!(archive_id = %id, error = %e, "Consumer task ended abnormally");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use archivist_core::config::ConsumerConfig;
    use archivist_core::{ArchiveStore, ManualClock, MemoryArchiveStore, MemoryRecordLog};
    use archivist_notify::{Dispatcher, MemoryNotifier};
    use archivist_queue::{MemoryBroker, QueueConsumer, QueueError, QueuePublisher};
    use chrono::Utc;

    use super::*;

    struct Setup {
        store: Arc<MemoryArchiveStore>,
        alerts: MemoryNotifier,
        manager: ConsumerManager,
        _artifacts: tempfile::TempDir,
    }

    fn setup(binder: Arc<dyn QueueBinder>) -> Setup {
        let store = Arc::new(MemoryArchiveStore::new());
        let alerts = MemoryNotifier::new();
        let artifacts = tempfile::tempdir().unwrap();
        let ctx = ConsumerContext {
            store: store.clone(),
            log: Arc::new(MemoryRecordLog::new()),
            alerts: Arc::new(Dispatcher::with_channels(vec![Box::new(alerts.clone())])),
            clock: Arc::new(ManualClock::new(Utc::now())),
            artifacts_dir: artifacts.path().to_path_buf(),
            config: ConsumerConfig {
                distillation_window: Duration::from_secs(300),
                error_backoff: Duration::ZERO,
                manager_interval: Duration::from_millis(10),
            },
        };
        Setup {
            store,
            alerts,
            manager: ConsumerManager::new(ctx, binder),
            _artifacts: artifacts,
        }
    }

    fn running(id: u64) -> Archive {
        let mut archive = Archive::new(id, "alice", "storm", Utc::now());
        archive.is_running = Some(true);
        archive
    }

    struct NoQueues;

    impl QueueBinder for NoQueues {
        fn bind_queue(&self, queue: &str) -> Result<Box<dyn QueueConsumer>, QueueError> {
            Err(QueueError::NotConfigured(queue.to_string()))
        }
    }

    #[tokio::test]
    async fn spawns_for_running_archives_only() {
        let mut s = setup(Arc::new(MemoryBroker::new()));
        s.store.insert(running(1)).unwrap();
        s.store.insert(Archive::new(2, "alice", "calm", Utc::now())).unwrap();

        let pass = s.manager.reconcile().await.unwrap();
        assert_eq!(pass.spawned, vec![ArchiveId(1)]);
        assert_eq!(s.manager.worker_ids(), vec![ArchiveId(1)]);

        let again = s.manager.reconcile().await.unwrap();
        assert_eq!(again, ManagerPass::default());
        s.manager.shutdown().await;
    }

    #[tokio::test]
    async fn stops_worker_when_archive_stops_running() {
        let mut s = setup(Arc::new(MemoryBroker::new()));
        s.store.insert(running(1)).unwrap();
        s.manager.reconcile().await.unwrap();

        let mut stopped = running(1);
        stopped.is_running = Some(false);
        s.store
            .save_fields(&stopped, archivist_core::ArchiveField::TRACKING)
            .unwrap();
        let pass = s.manager.reconcile().await.unwrap();

        assert_eq!(pass.stopped, vec![ArchiveId(1)]);
        assert!(s.manager.worker_ids().is_empty());
        // The final flush ran before the worker was released.
        let archive = s.store.get(ArchiveId(1)).unwrap().unwrap();
        assert!(archive.statistics_generated.is_some());
    }

    /// Hands out memory bindings whose acks always fail.
    struct BrokenAcks(MemoryBroker);

    struct BrokenAckQueue(archivist_queue::MemoryQueue);

    #[async_trait::async_trait]
    impl QueueConsumer for BrokenAckQueue {
        async fn set_prefetch(&self, count: u32) -> Result<(), QueueError> {
            self.0.set_prefetch(count).await
        }
        async fn poll_batch(&self, max: u32) -> Result<Vec<archivist_queue::QueueMessage>, QueueError> {
            self.0.poll_batch(max).await
        }
        async fn ack(&self, _receipt_handle: &str) -> Result<(), QueueError> {
            Err(QueueError::Ack("connection reset".to_string()))
        }
    }

    impl QueueBinder for BrokenAcks {
        fn bind_queue(&self, queue: &str) -> Result<Box<dyn QueueConsumer>, QueueError> {
            Ok(Box::new(BrokenAckQueue(self.0.bind(queue))))
        }
    }

    #[tokio::test]
    async fn respawns_worker_that_stopped_itself() {
        let broker = MemoryBroker::new();
        let mut s = setup(Arc::new(BrokenAcks(broker.clone())));
        s.store.insert(running(1)).unwrap();
        broker.publish("archiver-1", r#"{"id_str":"1","text":"storm"}"#).await.unwrap();
        s.manager.reconcile().await.unwrap();

        for _ in 0..400 {
            if s.manager.worker(ArchiveId(1)).unwrap().is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let pass = s.manager.reconcile().await.unwrap();
        assert_eq!(pass.respawned, vec![ArchiveId(1)]);
        assert!(pass.spawned.is_empty());
        assert_eq!(s.manager.worker_ids(), vec![ArchiveId(1)]);
        assert!(s.alerts.subjects()[0].starts_with("Consumer failed to process a message"));
        s.manager.shutdown().await;
    }

    #[tokio::test]
    async fn bind_failure_is_alerted_and_retried() {
        let mut s = setup(Arc::new(NoQueues));
        s.store.insert(running(4)).unwrap();

        let pass = s.manager.reconcile().await.unwrap();
        assert!(pass.spawned.is_empty());
        assert_eq!(
            s.alerts.subjects(),
            ["Consumer failed to bind queue for archive #4"]
        );

        s.manager.reconcile().await.unwrap();
        assert_eq!(s.alerts.subjects().len(), 2);
    }

    #[tokio::test]
    async fn no_binding_when_consumption_disallowed() {
        let mut s = setup(Arc::new(NoQueues));
        let mut archive = running(5);
        archive.allow_consumption = false;
        s.store.insert(archive).unwrap();

        let pass = s.manager.reconcile().await.unwrap();
        assert_eq!(pass.spawned, vec![ArchiveId(5)]);
        assert!(s.alerts.sent().is_empty());
        s.manager.shutdown().await;
    }
}
