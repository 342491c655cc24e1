//! Consumption worker: drains one archive's queue into its aggregators and
//! periodically persists a distillation.
//!
//! On start the worker rebuilds its aggregates by replaying the archive's
//! record log, then consumes with a prefetch of one, acknowledging each
//! message only after every aggregator has seen it. A distillation is written
//! whenever the window has elapsed and once more when consumption ends.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use archivist_aggregate::{artifacts_size, AggregatorSet};
use archivist_core::config::ConsumerConfig;
use archivist_core::{Archive, ArchiveField, ArchiveId, ArchiveStore, Clock, Record, RecordLog};
use archivist_notify::Dispatcher;
use archivist_queue::{parse_message, QueueConsumer, QueueError, QueueMessage};
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ConsumerError;

/// Replay yields to the scheduler every this many lines.
const REPLAY_YIELD_EVERY: u64 = 1_000;

/// Collaborators shared by every worker of one process.
#[derive(Clone)]
pub struct ConsumerContext {
    pub store: Arc<dyn ArchiveStore>,
    pub log: Arc<dyn RecordLog>,
    pub alerts: Arc<Dispatcher>,
    pub clock: Arc<dyn Clock>,
    pub artifacts_dir: PathBuf,
    pub config: ConsumerConfig,
}

// ── Cancellation ─────────────────────────────────────────────────

/// Cooperative stop request shared between a worker and its owner.
#[derive(Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once a stop has been requested.
    pub async fn requested(&self) {
        while !self.is_requested() {
            self.wake.notified().await;
        }
    }
}

// ── Outcome ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A stop was requested and the final distillation ran.
    Stopped,
    /// A message could not be processed; the worker stopped itself.
    ProcessingFailed,
    /// Stopped while replaying; no distillation was written.
    ReplayInterrupted,
    /// The record log could not be read.
    ReplayFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub archive_id: ArchiveId,
    pub exit: ExitReason,
    /// Records fed to the aggregators from the log on start.
    pub replayed: u64,
    /// Queue messages processed and acknowledged.
    pub processed: u64,
    /// Malformed records skipped during replay or consumption.
    pub ignored: u64,
    pub distillations: u64,
}

enum Replay {
    Complete,
    Interrupted,
}

// ── Worker ───────────────────────────────────────────────────────

pub struct ArchiveConsumer {
    archive: Archive,
    ctx: ConsumerContext,
    binding: Option<Box<dyn QueueConsumer>>,
    aggregates: AggregatorSet,
    last_distilled: DateTime<Utc>,
    stop: StopHandle,
    stopped: Arc<AtomicBool>,
    replayed: u64,
    processed: u64,
    ignored: u64,
    distillations: u64,
}

impl ArchiveConsumer {
    /// Build a worker for `archive`. With no binding the worker replays,
    /// idles until stopped, and writes a final distillation.
    pub fn new(archive: Archive, ctx: ConsumerContext, binding: Option<Box<dyn QueueConsumer>>) -> Self {
        let aggregates = AggregatorSet::for_archive(&archive, &ctx.artifacts_dir);
        let last_distilled = ctx.clock.now();
        Self {
            archive,
            ctx,
            binding,
            aggregates,
            last_distilled,
            stop: StopHandle::new(),
            stopped: Arc::new(AtomicBool::new(true)),
            replayed: 0,
            processed: 0,
            ignored: 0,
            distillations: 0,
        }
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// True before `run` starts and again once the final distillation is done.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Run the worker on its own task.
    pub fn spawn(self) -> ConsumerHandle {
        let archive_id = self.archive.id;
        let stop = self.stop.clone();
        let stopped = Arc::clone(&self.stopped);
        let task = tokio::spawn(self.run());
        ConsumerHandle {
            archive_id,
            stop,
            stopped,
            task,
        }
    }

    pub async fn run(mut self) -> WorkerOutcome {
        self.stopped.store(false, Ordering::SeqCst);
        info!(archive_id = %self.archive.id, query = %self.archive.query, "Readying consumption");

        let exit = match self.compile_aggregates().await {
            Ok(Replay::Complete) => {
                let exit = match self.binding.take() {
                    Some(binding) => self.consume(binding.as_ref()).await,
                    None => {
                        info!(archive_id = %self.archive.id, "Consumption not allowed, idling");
                        self.stop.requested().await;
                        ExitReason::Stopped
                    }
                };
                self.on_consume_end().await;
                exit
            }
            Ok(Replay::Interrupted) => {
                self.stopped.store(true, Ordering::SeqCst);
                ExitReason::ReplayInterrupted
            }
            Err(e) => {
                error!(archive_id = %self.archive.id, error = %e, "Failed to replay record log");
                self.alert("Consumer failed to compile aggregates", &e).await;
                self.stopped.store(true, Ordering::SeqCst);
                ExitReason::ReplayFailed
            }
        };

        WorkerOutcome {
            archive_id: self.archive.id,
            exit,
            replayed: self.replayed,
            processed: self.processed,
            ignored: self.ignored,
            distillations: self.distillations,
        }
    }

    /// Rebuild aggregates from the record log. Raw is skipped since the
    /// records are already on disk.
    async fn compile_aggregates(&mut self) -> Result<Replay, ConsumerError> {
        info!(archive_id = %self.archive.id, "Compiling aggregates");
        self.archive.total = 0;

        let mut lines = 0u64;
        for line in self.ctx.log.replay(self.archive.id)? {
            if self.stop.is_requested() {
                info!(archive_id = %self.archive.id, "Stopping aggregate compilation");
                return Ok(Replay::Interrupted);
            }

            let line = line?;
            match Record::from_slice(&line) {
                Ok(record) => {
                    self.aggregates.collect_replay(&record)?;
                    self.replayed += 1;
                }
                Err(e) => {
                    debug!(archive_id = %self.archive.id, error = %e, "Ignoring corrupt log line");
                    self.ignored += 1;
                }
            }

            lines += 1;
            if lines % REPLAY_YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }

        self.archive.total = self.aggregates.total();
        info!(
            archive_id = %self.archive.id,
            total = self.archive.total,
            ignored = self.ignored,
            last_created_at = self.aggregates.statistics.last_seen().unwrap_or(""),
            "Aggregate compilation complete"
        );
        Ok(Replay::Complete)
    }

    /// Consume until stopped or a message fails. Each delivery is requested
    /// only after the previous message has been acknowledged.
    async fn consume(&mut self, binding: &dyn QueueConsumer) -> ExitReason {
        if let Err(e) = binding.set_prefetch(1).await {
            warn!(archive_id = %self.archive.id, error = %e, "Failed to set prefetch");
        }

        loop {
            if self.stop.is_requested() {
                return ExitReason::Stopped;
            }

            let polled = tokio::select! {
                _ = self.stop.requested() => return ExitReason::Stopped,
                polled = binding.poll_batch(1) => polled,
            };

            let messages = match polled {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(
                        archive_id = %self.archive.id,
                        error = %e,
                        backoff = ?self.ctx.config.error_backoff,
                        "Queue poll failed, retrying"
                    );
                    tokio::time::sleep(self.ctx.config.error_backoff).await;
                    continue;
                }
            };

            for message in messages {
                if let Err(e) = self.on_message(binding, &message).await {
                    error!(
                        archive_id = %self.archive.id,
                        message_id = %message.id,
                        error = %e,
                        "Failed to process message"
                    );
                    self.alert("Consumer failed to process a message", &e).await;
                    tokio::time::sleep(self.ctx.config.error_backoff).await;
                    self.stop.stop();
                    return ExitReason::ProcessingFailed;
                }
            }
        }
    }

    async fn on_message(&mut self, binding: &dyn QueueConsumer, message: &QueueMessage) -> Result<(), ConsumerError> {
        let started = std::time::Instant::now();

        let record = match parse_message(message) {
            Ok(record) => record,
            Err(QueueError::Parse(reason)) => {
                debug!(archive_id = %self.archive.id, %reason, "Ignoring malformed message");
                self.ignored += 1;
                binding.ack(&message.receipt_handle).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.archive.total += 1;
        self.aggregates.collect_live(&record)?;
        binding.ack(&message.receipt_handle).await?;
        self.processed += 1;

        debug!(
            archive_id = %self.archive.id,
            total = self.archive.total,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Message processed"
        );

        let now = self.ctx.clock.now();
        if now - self.last_distilled > window(&self.ctx.config) {
            self.write_distillations()?;
        }
        Ok(())
    }

    /// Generate every snapshot and persist the distillation fields.
    pub fn write_distillations(&mut self) -> Result<(), ConsumerError> {
        let now = self.ctx.clock.now();
        info!(archive_id = %self.archive.id, "Writing aggregates");

        self.last_distilled = now;
        self.aggregates.distill(&mut self.archive, now)?;
        self.archive.size = self.ctx.log.size(self.archive.id)?
            + artifacts_size(&self.ctx.artifacts_dir, self.archive.id)?;
        self.ctx.store.save_fields(&self.archive, ArchiveField::DISTILLATION)?;
        self.distillations += 1;

        debug!(
            archive_id = %self.archive.id,
            total = self.archive.total,
            size = self.archive.size,
            "Distillation saved"
        );
        Ok(())
    }

    async fn on_consume_end(&mut self) {
        info!(archive_id = %self.archive.id, query = %self.archive.query, "Closing consumption");
        if let Err(e) = self.write_distillations() {
            error!(archive_id = %self.archive.id, error = %e, "Final distillation failed");
            self.alert("Consumer failed to write final distillation", &e).await;
        }
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn alert(&self, subject: &str, error: &ConsumerError) {
        self.ctx
            .alerts
            .alert(&format!("{subject} (archive #{})", self.archive.id), error)
            .await;
    }
}

fn window(config: &ConsumerConfig) -> chrono::Duration {
    chrono::Duration::from_std(config.distillation_window).unwrap_or(chrono::Duration::MAX)
}

// ── Handle ───────────────────────────────────────────────────────

/// Owner's view of a spawned worker.
pub struct ConsumerHandle {
    archive_id: ArchiveId,
    stop: StopHandle,
    stopped: Arc<AtomicBool>,
    task: JoinHandle<WorkerOutcome>,
}

impl ConsumerHandle {
    pub fn archive_id(&self) -> ArchiveId {
        self.archive_id
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Whether the worker task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<WorkerOutcome, ConsumerError> {
        self.task
            .await
            .map_err(|e| ConsumerError::Join(e.to_string()))
    }

    /// Request a stop and wait for the final distillation.
    pub async fn shutdown(self) -> Result<WorkerOutcome, ConsumerError> {
        self.stop();
        self.join().await
    }
}

#[cfg(test)]
mod tests;
