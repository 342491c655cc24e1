use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use archivist_core::config::ConsumerConfig;
use archivist_core::{
    Archive, ArchiveId, ArchiveStore, FileRecordLog, ManualClock, MemoryArchiveStore, MemoryRecordLog,
    RecordLog,
};
use archivist_notify::{Dispatcher, MemoryNotifier};
use archivist_queue::{
    BrokerEvent, MemoryBroker, MemoryQueue, QueueConsumer, QueueError, QueueMessage,
    QueuePublisher,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tempfile::TempDir;

use super::*;

struct Rig {
    store: Arc<MemoryArchiveStore>,
    log: Arc<MemoryRecordLog>,
    clock: Arc<ManualClock>,
    alerts: MemoryNotifier,
    broker: MemoryBroker,
    ctx: ConsumerContext,
    _artifacts: TempDir,
}

fn rig() -> Rig {
    let store = Arc::new(MemoryArchiveStore::new());
    let log = Arc::new(MemoryRecordLog::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let alerts = MemoryNotifier::new();
    let artifacts = tempfile::tempdir().unwrap();
    let ctx = ConsumerContext {
        store: store.clone(),
        log: log.clone(),
        alerts: Arc::new(Dispatcher::with_channels(vec![Box::new(alerts.clone())])),
        clock: clock.clone(),
        artifacts_dir: artifacts.path().to_path_buf(),
        config: ConsumerConfig {
            distillation_window: Duration::from_secs(300),
            error_backoff: Duration::ZERO,
            manager_interval: Duration::from_millis(10),
        },
    };
    Rig {
        store,
        log,
        clock,
        alerts,
        broker: MemoryBroker::new().with_poll_timeout(Duration::from_millis(20)),
        ctx,
        _artifacts: artifacts,
    }
}

impl Rig {
    fn archive(&self, id: u64) -> Archive {
        let archive = Archive::new(id, "alice", "storm", self.clock.now() - ChronoDuration::hours(1));
        self.store.insert(archive.clone()).unwrap();
        archive
    }

    fn stored(&self, id: u64) -> Archive {
        self.store.get(ArchiveId(id)).unwrap().unwrap()
    }

    fn worker(&self, archive: &Archive) -> ArchiveConsumer {
        let binding: Box<dyn QueueConsumer> = Box::new(self.broker.bind(&archive.queue_name()));
        ArchiveConsumer::new(archive.clone(), self.ctx.clone(), Some(binding))
    }
}

fn line(i: u32) -> String {
    format!(r#"{{"id_str":"{i}","text":"storm warning number {i}","lang":"en","created_at":"Wed Oct 10 20:19:{:02} +0000 2018"}}"#, i % 60)
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Delivers normally but every ack fails.
struct RejectingAcks(MemoryQueue);

#[async_trait]
impl QueueConsumer for RejectingAcks {
    async fn set_prefetch(&self, count: u32) -> Result<(), QueueError> {
        self.0.set_prefetch(count).await
    }

    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        self.0.poll_batch(max_messages).await
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        Err(QueueError::Ack(format!("channel closed before ack of {receipt_handle}")))
    }
}

#[tokio::test]
async fn test_replay_skips_malformed_lines() {
    let r = rig();
    let archive = r.archive(1);
    for i in 0..5 {
        r.log.append(archive.id, &line(i)).unwrap();
    }
    r.log.append(archive.id, "{not json").unwrap();
    r.log.append(archive.id, "[1, 2, 3]").unwrap();

    let mut worker = r.worker(&archive);
    worker.archive.total = 99;
    assert!(matches!(worker.compile_aggregates().await, Ok(Replay::Complete)));

    assert_eq!(worker.archive.total, 5);
    assert_eq!(worker.replayed, 5);
    assert_eq!(worker.ignored, 2);
    assert_eq!(worker.aggregates.raw.written(), 0);
}

#[tokio::test]
async fn test_replay_from_file_log_skips_torn_line() {
    let r = rig();
    let archive = r.archive(10);
    let dir = tempfile::tempdir().unwrap();
    let log = FileRecordLog::new(dir.path());
    for i in 0..5 {
        log.append(archive.id, &line(i)).unwrap();
    }
    log.close(archive.id).unwrap();
    // A write cut off in the middle of a multi-byte character.
    std::fs::OpenOptions::new()
        .append(true)
        .open(log.path_for(archive.id))
        .unwrap()
        .write_all(b"{\"text\":\"st\xe2\x82\n")
        .unwrap();

    let ctx = ConsumerContext {
        log: Arc::new(log),
        ..r.ctx.clone()
    };
    let binding: Box<dyn QueueConsumer> = Box::new(r.broker.bind(&archive.queue_name()));
    let handle = ArchiveConsumer::new(archive.clone(), ctx, Some(binding)).spawn();
    wait_until("worker consuming", || !handle.is_stopped()).await;
    let outcome = handle.shutdown().await.unwrap();

    assert_eq!(outcome.exit, ExitReason::Stopped);
    assert_eq!(outcome.replayed, 5);
    assert_eq!(outcome.ignored, 1);
    assert!(r.alerts.sent().is_empty());
    assert_eq!(r.stored(10).total, 5);
}

#[tokio::test]
async fn test_replay_stops_when_requested() {
    let r = rig();
    let archive = r.archive(1);
    for i in 0..10 {
        r.log.append(archive.id, &line(i)).unwrap();
    }

    let worker = r.worker(&archive);
    worker.stop_handle().stop();
    let outcome = worker.run().await;

    assert_eq!(outcome.exit, ExitReason::ReplayInterrupted);
    assert_eq!(outcome.replayed, 0);
    assert_eq!(outcome.distillations, 0);
    assert!(r.stored(1).statistics_generated.is_none());
}

#[tokio::test]
async fn test_replay_total_matches_live_total() {
    let r = rig();
    let replayed = r.archive(1);
    let live = r.archive(2);
    for i in 0..40 {
        r.log.append(replayed.id, &line(i)).unwrap();
        r.broker.publish(&live.queue_name(), &line(i)).await.unwrap();
    }

    let mut from_log = r.worker(&replayed);
    from_log.compile_aggregates().await.unwrap();
    from_log.write_distillations().unwrap();

    let handle = r.worker(&live).spawn();
    let broker = r.broker.clone();
    let queue = live.queue_name();
    wait_until("live queue drained", || {
        broker.pending(&queue) == 0 && broker.unacked(&queue) == 0
    })
    .await;
    handle.shutdown().await.unwrap();

    assert_eq!(r.stored(1).total, 40);
    assert_eq!(r.stored(2).total, r.stored(1).total);
    assert_eq!(
        r.stored(2).statistics.unwrap()["total"],
        r.stored(1).statistics.unwrap()["total"]
    );
}

#[tokio::test]
async fn test_prefetch_of_one_acks_before_next_delivery() {
    let r = rig();
    let archive = r.archive(3);
    let queue = archive.queue_name();
    for i in 0..3 {
        r.broker.publish(&queue, &line(i)).await.unwrap();
    }

    let handle = r.worker(&archive).spawn();
    let broker = r.broker.clone();
    wait_until("three acks", || {
        broker
            .events(&queue)
            .iter()
            .filter(|e| matches!(e, BrokerEvent::Acked(_)))
            .count()
            == 3
    })
    .await;
    let outcome = handle.shutdown().await.unwrap();

    assert_eq!(outcome.processed, 3);
    assert_eq!(r.broker.max_in_flight(&queue), 1);
    let settled: Vec<BrokerEvent> = r
        .broker
        .events(&queue)
        .into_iter()
        .filter(|e| !matches!(e, BrokerEvent::Published(_)))
        .collect();
    assert_eq!(
        settled,
        vec![
            BrokerEvent::Delivered("msg-1".into()),
            BrokerEvent::Acked("msg-1".into()),
            BrokerEvent::Delivered("msg-2".into()),
            BrokerEvent::Acked("msg-2".into()),
            BrokerEvent::Delivered("msg-3".into()),
            BrokerEvent::Acked("msg-3".into()),
        ]
    );
}

#[tokio::test]
async fn test_malformed_message_is_acked_and_ignored() {
    let r = rig();
    let archive = r.archive(4);
    let queue = archive.queue_name();
    r.broker.publish(&queue, &line(1)).await.unwrap();
    r.broker.publish(&queue, "garbage").await.unwrap();
    r.broker.publish(&queue, &line(2)).await.unwrap();

    let handle = r.worker(&archive).spawn();
    let broker = r.broker.clone();
    wait_until("queue drained", || broker.pending(&queue) == 0 && broker.unacked(&queue) == 0).await;
    let outcome = handle.shutdown().await.unwrap();

    assert_eq!(outcome.exit, ExitReason::Stopped);
    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.ignored, 1);
    assert_eq!(r.stored(4).total, 2);
    assert!(r.alerts.sent().is_empty());
}

#[tokio::test]
async fn test_processing_failure_alerts_and_leaves_message() {
    let r = rig();
    let archive = r.archive(5);
    let queue = archive.queue_name();
    r.broker.publish(&queue, &line(1)).await.unwrap();

    let binding: Box<dyn QueueConsumer> = Box::new(RejectingAcks(r.broker.bind(&queue)));
    let worker = ArchiveConsumer::new(archive.clone(), r.ctx.clone(), Some(binding));
    let outcome = worker.run().await;

    assert_eq!(outcome.exit, ExitReason::ProcessingFailed);
    assert_eq!(outcome.processed, 0);
    let subjects = r.alerts.subjects();
    assert_eq!(subjects.len(), 1);
    assert!(subjects[0].starts_with("Consumer failed to process a message"));
    assert!(r.alerts.sent()[0].body.contains("channel closed"));

    // Dropping the binding returned the unacked message to the queue.
    assert_eq!(r.broker.pending(&queue), 1);
    assert!(r
        .broker
        .events(&queue)
        .contains(&BrokerEvent::Requeued("msg-1".into())));
}

#[tokio::test]
async fn test_distills_once_window_elapses() {
    let r = rig();
    let archive = r.archive(6);
    let queue = archive.queue_name();

    let handle = r.worker(&archive).spawn();
    r.broker.publish(&queue, &line(1)).await.unwrap();
    let broker = r.broker.clone();
    wait_until("first ack", || broker.unacked(&queue) == 0 && broker.pending(&queue) == 0).await;
    assert!(r.stored(6).statistics_generated.is_none());

    r.clock.advance(ChronoDuration::seconds(301));
    r.broker.publish(&queue, &line(2)).await.unwrap();
    let store = r.store.clone();
    wait_until("windowed flush", || {
        store.get(ArchiveId(6)).unwrap().unwrap().statistics_generated.is_some()
    })
    .await;

    let flushed = r.stored(6);
    assert_eq!(flushed.total, 2);
    assert_eq!(flushed.statistics_generated, Some(r.clock.now()));
    assert!(flushed.size > 0);
    assert_eq!(flushed.is_running, None);

    let outcome = handle.shutdown().await.unwrap();
    assert_eq!(outcome.distillations, 2);
}

#[tokio::test]
async fn test_quiescence_flag() {
    let r = rig();
    let archive = r.archive(7);
    let worker = r.worker(&archive);
    assert!(worker.is_stopped());

    let handle = worker.spawn();
    wait_until("worker running", || !handle.is_stopped()).await;
    assert!(!handle.is_finished());

    let stop = handle.stop;
    let stopped = handle.stopped.clone();
    stop.stop();
    let outcome = handle.task.await.unwrap();
    assert!(stopped.load(Ordering::SeqCst));
    assert_eq!(outcome.exit, ExitReason::Stopped);
    assert!(r.stored(7).statistics_generated.is_some());
}

#[tokio::test]
async fn test_idle_worker_without_consumption() {
    let r = rig();
    let mut archive = r.archive(8);
    archive.allow_consumption = false;
    r.log.append(archive.id, &line(1)).unwrap();
    r.broker.publish(&archive.queue_name(), &line(2)).await.unwrap();

    let handle = ArchiveConsumer::new(archive.clone(), r.ctx.clone(), None).spawn();
    wait_until("worker running", || !handle.is_stopped()).await;
    let outcome = handle.shutdown().await.unwrap();

    assert_eq!(outcome.exit, ExitReason::Stopped);
    assert_eq!(outcome.replayed, 1);
    assert_eq!(outcome.processed, 0);
    assert_eq!(r.broker.pending(&archive.queue_name()), 1);
    assert_eq!(r.stored(8).total, 1);
}

fn assert_send<T: Send>(_: &T) {}

#[tokio::test]
async fn test_worker_future_can_be_spawned() {
    let r = rig();
    let archive = r.archive(11);
    let run = r.worker(&archive).run();
    assert_send(&run);
}
