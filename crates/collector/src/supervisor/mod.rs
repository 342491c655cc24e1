//! Stream supervisor: reconciles the archive schedule against live upstream
//! connections.
//!
//! Each tick computes which archives should start and which should stop,
//! tears down the connections of every affected owner, updates the tracked
//! set, and reopens one connection per affected owner covering all of that
//! owner's tracked archives. Connections that died on their own are restarted
//! after a cooldown.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use archivist_core::config::CollectorConfig;
use archivist_core::{
    Archive, ArchiveField, ArchiveId, ArchiveQuery, ArchiveStore, Clock, LogHandle, OwnerId,
    OwnerStatus, StoreError, Verbosity,
};
use archivist_notify::Dispatcher;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::channel::{StreamChannel, StreamConnector};


/// Commands accepted on the supervisor's control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorCommand {
    SetVerbosity(Verbosity),
    Shutdown,
}

/// What one reconciliation tick changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub started: Vec<ArchiveId>,
    pub stopped: Vec<ArchiveId>,
    /// Archives whose connection had died and were restarted after the cooldown.
    pub restarted: Vec<ArchiveId>,
    pub opened: Vec<OwnerId>,
    pub disconnected: Vec<OwnerId>,
    pub failed: Vec<OwnerId>,
}

impl TickOutcome {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty()
            && self.stopped.is_empty()
            && self.opened.is_empty()
            && self.disconnected.is_empty()
            && self.failed.is_empty()
    }
}

pub struct Supervisor {
    store: Arc<dyn ArchiveStore>,
    connector: Arc<dyn StreamConnector>,
    clock: Arc<dyn Clock>,
    alerts: Arc<Dispatcher>,
    config: CollectorConfig,
    tracking: BTreeMap<ArchiveId, Archive>,
    streams: HashMap<OwnerId, Box<dyn StreamChannel>>,
    first_pass_completed: bool,
    verbosity: Verbosity,
    log_handle: Option<LogHandle>,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        connector: Arc<dyn StreamConnector>,
        clock: Arc<dyn Clock>,
        alerts: Arc<Dispatcher>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            store,
            connector,
            clock,
            alerts,
            config,
            tracking: BTreeMap::new(),
            streams: HashMap::new(),
            first_pass_completed: false,
            verbosity: Verbosity::default(),
            log_handle: None,
        }
    }

    /// Also apply verbosity changes to the process log filter.
    pub fn with_log_handle(mut self, handle: LogHandle) -> Self {
        self.log_handle = Some(handle);
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    // ── Introspection ────────────────────────────────────────────

    pub fn tracked(&self) -> Vec<ArchiveId> {
        self.tracking.keys().copied().collect()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Archives bound to `owner`'s live connection, if it has one.
    pub fn stream_archives(&self, owner: &OwnerId) -> Option<Vec<ArchiveId>> {
        self.streams.get(owner).map(|s| s.channels().to_vec())
    }

    pub fn first_pass_completed(&self) -> bool {
        self.first_pass_completed
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    // ── Reconciliation ───────────────────────────────────────────

    /// Run one reconciliation pass.
    pub async fn tick(&mut self) -> Result<TickOutcome, StoreError> {
        let dead = self.dead_stream_archives();
        if !dead.is_empty() {
            warn!(
                archives = ?dead,
                cooldown = ?self.config.chill_time,
                "Dead upstream connections detected, restarting after cooldown"
            );
            tokio::time::sleep(self.config.chill_time).await;
        }

        let now = self.clock.now();
        let mut to_start = self.archives_to_start(now)?;
        if !dead.is_empty() {
            to_start = self.with_restarts(&to_start, &dead)?;
        }

        let to_stop = self.archives_to_stop(now)?;
        let stopping: BTreeSet<ArchiveId> = to_stop.iter().map(|a| a.id).collect();
        to_start.retain(|a| !stopping.contains(&a.id));

        // Only the very first pass may re-adopt archives marked not-running.
        self.first_pass_completed = true;

        if to_start.is_empty() && to_stop.is_empty() {
            return Ok(TickOutcome::default());
        }

        let mut outcome = self.adjust_connections(to_start, to_stop).await?;
        outcome.restarted = dead
            .into_iter()
            .filter(|id| outcome.started.contains(id))
            .collect();
        Ok(outcome)
    }

    /// Archives whose window is open, not yet tracked, and owned by an active
    /// owner. After the first pass, archives explicitly stopped are skipped.
    pub fn archives_to_start(&self, now: DateTime<Utc>) -> Result<Vec<Archive>, StoreError> {
        let mut query = ArchiveQuery::new()
            .started_by(now)
            .open_at(now)
            .exclude_ids(self.tracking.keys().copied())
            .active_owners_only();
        if self.first_pass_completed {
            query = query.exclude_stopped();
        }
        self.store.query(&query)
    }

    /// Archives that must stop: window elapsed while running, or tracked
    /// archives whose owner has since been disabled.
    pub fn archives_to_stop(&self, now: DateTime<Utc>) -> Result<Vec<Archive>, StoreError> {
        let mut to_stop: BTreeMap<ArchiveId, Archive> = self
            .store
            .query(&ArchiveQuery::new().expired_by(now).running(true))?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        let mut owner_status: HashMap<&OwnerId, OwnerStatus> = HashMap::new();
        for archive in self.tracking.values() {
            let status = match owner_status.get(&archive.owner) {
                Some(status) => *status,
                None => {
                    let status = self.store.owner_status(&archive.owner)?;
                    owner_status.insert(&archive.owner, status);
                    status
                }
            };
            if status == OwnerStatus::Disabled && !to_stop.contains_key(&archive.id) {
                debug!(archive_id = %archive.id, owner = %archive.owner, "Owner disabled, stopping archive");
                to_stop.insert(archive.id, archive.clone());
            }
        }

        Ok(to_stop.into_values().collect())
    }

    /// Archives bound to connections that stopped running. An owner whose
    /// open failed has no connection and is not picked up here.
    fn dead_stream_archives(&self) -> BTreeSet<ArchiveId> {
        self.streams
            .values()
            .filter(|s| !s.running())
            .flat_map(|s| s.channels().iter().copied())
            .collect()
    }

    /// Widen `to_start` with the archives of dead connections regardless of
    /// their running flag.
    fn with_restarts(
        &self,
        to_start: &[Archive],
        dead: &BTreeSet<ArchiveId>,
    ) -> Result<Vec<Archive>, StoreError> {
        let ids = to_start.iter().map(|a| a.id).chain(dead.iter().copied());
        self.store
            .query(&ArchiveQuery::new().ids(ids).active_owners_only())
    }

    /// Tear down every affected owner's connection, apply the tracking
    /// changes, then reopen one connection per affected owner.
    pub async fn adjust_connections(
        &mut self,
        to_start: Vec<Archive>,
        to_stop: Vec<Archive>,
    ) -> Result<TickOutcome, StoreError> {
        let mut outcome = TickOutcome::default();

        let touched: BTreeSet<OwnerId> = to_start
            .iter()
            .chain(to_stop.iter())
            .map(|a| a.owner.clone())
            .collect();

        for owner in &touched {
            if let Some(stream) = self.streams.remove(owner) {
                self.close_stream(stream);
                outcome.disconnected.push(owner.clone());
            }
        }

        for archive in to_stop {
            outcome.stopped.push(archive.id);
            self.stop_tracking(archive)?;
        }
        for archive in to_start {
            outcome.started.push(archive.id);
            self.start_tracking(archive)?;
        }

        let mut first = true;
        for owner in touched {
            let members: Vec<Archive> = self
                .tracking
                .values()
                .filter(|a| a.owner == owner)
                .cloned()
                .collect();
            if members.is_empty() {
                continue;
            }

            if !first {
                tokio::time::sleep(self.config.listener_wait).await;
            }
            first = false;

            match self.connector.open(&owner, &members, self.verbosity).await {
                Ok(stream) => {
                    info!(
                        owner = %owner,
                        archives = ?stream.channels(),
                        "Stream connected"
                    );
                    self.streams.insert(owner.clone(), stream);
                    outcome.opened.push(owner);
                }
                Err(e) => {
                    error!(owner = %owner, error = %e, "Failed to open stream");
                    self.alerts
                        .alert(&format!("Collector failed to open stream for {owner}"), &e)
                        .await;
                    outcome.failed.push(owner);
                }
            }
        }

        Ok(outcome)
    }

    fn close_stream(&self, mut stream: Box<dyn StreamChannel>) {
        stream.disconnect();
        if let Err(e) = stream.close_log() {
            warn!(owner = %stream.owner(), error = %e, "Failed to close stream log");
        }
    }

    pub fn start_tracking(&mut self, mut archive: Archive) -> Result<(), StoreError> {
        archive.is_running = Some(true);
        self.store.save_fields(&archive, ArchiveField::TRACKING)?;
        info!(archive_id = %archive.id, query = %archive.query, owner = %archive.owner, "Tracking archive");
        self.tracking.insert(archive.id, archive);
        Ok(())
    }

    pub fn stop_tracking(&mut self, mut archive: Archive) -> Result<(), StoreError> {
        self.tracking.remove(&archive.id);
        archive.is_running = Some(false);
        self.store.save_fields(&archive, ArchiveField::TRACKING)?;
        info!(archive_id = %archive.id, query = %archive.query, "Stopped tracking archive");
        Ok(())
    }

    // ── Control ──────────────────────────────────────────────────

    pub fn set_verbosity(&mut self, level: Verbosity) {
        info!(level = %level, "Setting verbosity");
        self.verbosity = level;
        for stream in self.streams.values_mut() {
            stream.set_verbosity(level);
        }
        if let Some(handle) = &self.log_handle {
            if let Err(e) = handle.set_verbosity(level) {
                warn!(error = %e, "Failed to update log filter");
            }
        }
    }

    /// Disconnect every stream and mark every tracked archive stopped.
    pub fn shutdown(&mut self) {
        info!(streams = self.streams.len(), "Shutting down stream supervisor");
        let streams: Vec<Box<dyn StreamChannel>> =
            self.streams.drain().map(|(_, stream)| stream).collect();
        for stream in streams {
            self.close_stream(stream);
        }

        let tracked: Vec<Archive> = std::mem::take(&mut self.tracking).into_values().collect();
        for archive in tracked {
            let id = archive.id;
            if let Err(e) = self.stop_tracking(archive) {
                warn!(archive_id = %id, error = %e, "Failed to persist stop on shutdown");
            }
        }
    }

    /// Tick on the configured interval until a shutdown command arrives or
    /// the control channel closes. Commands are applied between ticks.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SupervisorCommand>) {
        info!(
            interval = ?self.config.loop_interval,
            "Stream supervisor started"
        );

        loop {
            match self.tick().await {
                Ok(outcome) if !outcome.is_noop() => {
                    info!(
                        started = ?outcome.started,
                        stopped = ?outcome.stopped,
                        restarted = ?outcome.restarted,
                        streams = self.streams.len(),
                        "Reconciled streams"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Reconciliation tick failed");
                    self.alerts.alert("Collector reconciliation failed", &e).await;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.loop_interval) => {}
                command = commands.recv() => match command {
                    Some(SupervisorCommand::SetVerbosity(level)) => self.set_verbosity(level),
                    Some(SupervisorCommand::Shutdown) | None => break,
                },
            }
        }

        self.shutdown();
        info!("Stream supervisor stopped");
    }
}
