//! Schedule → stream → queue → distillation, wired with in-process backends.

use std::sync::Arc;
use std::time::Duration;

use archivist_collector::mock::MockConnector;
use archivist_collector::{ArchiveListener, Supervisor};
use archivist_consumer::{ConsumerContext, ConsumerManager};
use archivist_core::config::{CollectorConfig, ConsumerConfig};
use archivist_core::{
    Archive, ArchiveId, ArchiveStore, Clock, ManualClock, MemoryArchiveStore, MemoryRecordLog,
    OwnerId, RecordLog, Verbosity,
};
use archivist_notify::Dispatcher;
use archivist_queue::MemoryBroker;
use chrono::Duration as ChronoDuration;
use chrono::Utc;

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..2_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn record(i: u32) -> String {
    serde_json::json!({
        "id_str": i.to_string(),
        "text": format!("Rust release notes part {i}"),
        "lang": "en",
        "user": { "screen_name": format!("user{}", i % 7) },
    })
    .to_string()
}

#[tokio::test]
async fn scheduled_archive_is_collected_and_distilled() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = Arc::new(MemoryArchiveStore::new());
    let log = Arc::new(MemoryRecordLog::new());
    let broker = MemoryBroker::new().with_poll_timeout(Duration::from_millis(20));
    let artifacts = tempfile::tempdir().unwrap();

    let archive = Archive::new(1, "alice", "rust", clock.now() - ChronoDuration::seconds(1));
    store.insert(archive.clone()).unwrap();

    // Supervisor: one tick starts the archive on a single connection.
    let connector = MockConnector::new();
    let mut supervisor = Supervisor::new(
        store.clone(),
        Arc::new(connector.clone()),
        clock.clone(),
        Arc::new(Dispatcher::empty()),
        CollectorConfig {
            loop_interval: Duration::from_millis(10),
            chill_time: Duration::ZERO,
            listener_wait: Duration::ZERO,
            admin_addr: "127.0.0.1:0".to_string(),
        },
    );
    supervisor.tick().await.unwrap();

    assert_eq!(store.get(ArchiveId(1)).unwrap().unwrap().is_running, Some(true));
    let opened = connector.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].owner, OwnerId::new("alice"));
    assert_eq!(opened[0].terms, vec!["rust"]);

    // Consumer manager picks up the running archive.
    let mut manager = ConsumerManager::new(
        ConsumerContext {
            store: store.clone(),
            log: log.clone(),
            alerts: Arc::new(Dispatcher::empty()),
            clock: clock.clone(),
            artifacts_dir: artifacts.path().to_path_buf(),
            config: ConsumerConfig {
                distillation_window: Duration::from_secs(300),
                error_backoff: Duration::ZERO,
                manager_interval: Duration::from_millis(10),
            },
        },
        Arc::new(broker.clone()),
    );
    let pass = manager.reconcile().await.unwrap();
    assert_eq!(pass.spawned, vec![ArchiveId(1)]);
    wait_until("worker started", || {
        manager.worker(ArchiveId(1)).is_some_and(|w| !w.is_stopped())
    })
    .await;

    // Ingestion: the listener bound to the archive fans records out.
    let running = store.get(ArchiveId(1)).unwrap().unwrap();
    let listener = ArchiveListener::new(&[running], log.clone(), Arc::new(broker.clone()), Verbosity::Normal);
    let queue = archive.queue_name();

    for i in 0..300 {
        assert_eq!(listener.on_line(&record(i)).await.unwrap(), 1);
    }
    wait_until("first half consumed", || {
        broker.pending(&queue) == 0 && broker.unacked(&queue) == 0
    })
    .await;
    assert!(store.get(ArchiveId(1)).unwrap().unwrap().statistics_generated.is_none());

    clock.advance(ChronoDuration::seconds(301));
    for i in 300..600 {
        listener.on_line(&record(i)).await.unwrap();
    }
    wait_until("second half consumed", || {
        broker.pending(&queue) == 0 && broker.unacked(&queue) == 0
    })
    .await;

    let windowed = store.get(ArchiveId(1)).unwrap().unwrap();
    assert_eq!(windowed.statistics_generated, Some(clock.now()));
    assert_eq!(windowed.total, 301);

    manager.shutdown().await;

    let distilled = store.get(ArchiveId(1)).unwrap().unwrap();
    assert_eq!(distilled.total, 600);
    assert!(distilled.statistics_generated.is_some());
    assert_eq!(distilled.statistics.as_ref().unwrap()["total"], 600);
    assert!(distilled.cloud.is_some());
    assert_eq!(distilled.map.as_deref(), Some("1/map.geojson"));
    assert!(distilled.size >= log.size(ArchiveId(1)).unwrap());
    assert_eq!(distilled.is_running, Some(true));
    assert_eq!(broker.max_in_flight(&queue), 1);
}
