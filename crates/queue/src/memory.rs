//! In-process broker for local runs and tests.
//!
//! Queues are created on first use. Each [`MemoryQueue`] binding tracks its own
//! unacknowledged deliveries; dropping a binding returns them to the front of
//! the queue in their original order.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tracing::debug;

use crate::consumer::{QueueConsumer, QueueMessage, QueuePublisher};
use crate::error::QueueError;

/// Broker-side lifecycle event for one message, recorded in order per queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Published(String),
    Delivered(String),
    Acked(String),
    Requeued(String),
}

#[derive(Debug, Clone)]
struct Envelope {
    seq: u64,
    message: QueueMessage,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    /// receipt handle -> (binding id, envelope)
    unacked: HashMap<String, (u64, Envelope)>,
    events: Vec<BrokerEvent>,
    max_in_flight: usize,
}

impl QueueState {
    fn held_by(&self, binding: u64) -> usize {
        self.unacked.values().filter(|(b, _)| *b == binding).count()
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    next_seq: u64,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    changed: Notify,
    next_binding: AtomicU64,
}

impl BrokerInner {
    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>, QueueError> {
        self.state
            .lock()
            .map_err(|e| QueueError::Provider(format!("broker state poisoned: {e}")))
    }
}

/// Shared handle to an in-process broker. Cloning shares the same queues.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
    poll_timeout: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::default(),
            poll_timeout: Duration::from_millis(200),
        }
    }

    /// How long `poll_batch` waits for a message before returning empty.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Open a consumer binding on `queue`.
    pub fn bind(&self, queue: &str) -> MemoryQueue {
        let binding = self.inner.next_binding.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut state) = self.inner.lock() {
            state.queues.entry(queue.to_string()).or_default();
        }
        MemoryQueue {
            broker: Arc::clone(&self.inner),
            queue: queue.to_string(),
            binding,
            prefetch: AtomicU32::new(u32::MAX),
            poll_timeout: self.poll_timeout,
        }
    }

    fn read<T>(&self, queue: &str, f: impl FnOnce(&QueueState) -> T) -> Option<T> {
        let state = self.inner.lock().ok()?;
        state.queues.get(queue).map(f)
    }

    /// Messages waiting for delivery.
    pub fn pending(&self, queue: &str) -> usize {
        self.read(queue, |q| q.ready.len()).unwrap_or(0)
    }

    /// Messages delivered but not yet acked.
    pub fn unacked(&self, queue: &str) -> usize {
        self.read(queue, |q| q.unacked.len()).unwrap_or(0)
    }

    /// Highest number of simultaneously unacked messages ever seen on `queue`.
    pub fn max_in_flight(&self, queue: &str) -> usize {
        self.read(queue, |q| q.max_in_flight).unwrap_or(0)
    }

    pub fn events(&self, queue: &str) -> Vec<BrokerEvent> {
        self.read(queue, |q| q.events.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl QueuePublisher for MemoryBroker {
    async fn publish(&self, queue: &str, body: &str) -> Result<(), QueueError> {
        {
            let mut state = self.inner.lock()?;
            state.next_seq += 1;
            let seq = state.next_seq;
            let id = format!("msg-{seq}");
            let q = state.queues.entry(queue.to_string()).or_default();
            q.events.push(BrokerEvent::Published(id.clone()));
            q.ready.push_back(Envelope {
                seq,
                message: QueueMessage {
                    id,
                    body: body.to_string(),
                    receipt_handle: String::new(),
                    timestamp: Utc::now(),
                    attempt_count: 0,
                },
            });
        }
        self.inner.changed.notify_waiters();
        Ok(())
    }
}

/// A consumer binding on one in-process queue.
pub struct MemoryQueue {
    broker: Arc<BrokerInner>,
    queue: String,
    binding: u64,
    prefetch: AtomicU32,
    poll_timeout: Duration,
}

impl MemoryQueue {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    fn take(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self.broker.lock()?;
        let q = state.queues.entry(self.queue.clone()).or_default();

        let window = (self.prefetch.load(Ordering::SeqCst) as usize)
            .saturating_sub(q.held_by(self.binding));
        let count = window.min(max_messages as usize).min(q.ready.len());

        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(mut envelope) = q.ready.pop_front() else { break };
            envelope.message.attempt_count += 1;
            envelope.message.receipt_handle = format!(
                "{}:{}:{}",
                self.queue, envelope.seq, envelope.message.attempt_count
            );
            q.events.push(BrokerEvent::Delivered(envelope.message.id.clone()));
            batch.push(envelope.message.clone());
            q.unacked.insert(envelope.message.receipt_handle.clone(), (self.binding, envelope));
        }
        q.max_in_flight = q.max_in_flight.max(q.unacked.len());
        Ok(batch)
    }

    fn settle(&self, receipt_handle: &str) -> Result<(), QueueError> {
        {
            let mut state = self.broker.lock()?;
            let q = state
                .queues
                .get_mut(&self.queue)
                .ok_or_else(|| QueueError::NotConfigured(self.queue.clone()))?;
            let (_, envelope) = q
                .unacked
                .remove(receipt_handle)
                .ok_or_else(|| QueueError::Ack(format!("unknown receipt handle {receipt_handle}")))?;

            q.events.push(BrokerEvent::Acked(envelope.message.id));
        }
        self.broker.changed.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    async fn set_prefetch(&self, count: u32) -> Result<(), QueueError> {
        self.prefetch.store(count.max(1), Ordering::SeqCst);
        Ok(())
    }

    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            let notified = self.broker.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.take(max_messages)?;
            if !batch.is_empty() {
                debug!(queue = %self.queue, count = batch.len(), "Delivered messages");
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.settle(receipt_handle)
    }
}

impl Drop for MemoryQueue {
    fn drop(&mut self) {
        let Ok(mut state) = self.broker.lock() else { return };
        let Some(q) = state.queues.get_mut(&self.queue) else { return };

        let handles: Vec<String> = q
            .unacked
            .iter()
            .filter(|(_, (b, _))| *b == self.binding)
            .map(|(h, _)| h.clone())
            .collect();
        let mut returned: Vec<Envelope> = handles
            .iter()
            .filter_map(|h| q.unacked.remove(h).map(|(_, e)| e))
            .collect();

        // Highest seq first so the oldest message ends up at the front.
        returned.sort_by(|a, b| b.seq.cmp(&a.seq));
        for envelope in returned {
            q.events.push(BrokerEvent::Requeued(envelope.message.id.clone()));
            q.ready.push_front(envelope);
        }
        drop(state);
        self.broker.changed.notify_waiters();
    }
}
