//! Queue consumer/publisher traits and types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// A raw message received from a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique message identifier from the queue provider.
    pub id: String,
    /// Raw message body (one serialized record).
    pub body: String,
    /// Provider-specific handle for ack (e.g., SQS receipt handle).
    pub receipt_handle: String,
    /// When the message was sent to the queue.
    pub timestamp: DateTime<Utc>,
    /// Number of times this message has been received (for retry tracking).
    pub attempt_count: u32,
}

/// One consumer binding to a single queue.
///
/// A message delivered by [`poll_batch`](QueueConsumer::poll_batch) stays
/// outstanding until it is acked, or until the binding is dropped. Implementations never hand out more
/// outstanding messages than the configured prefetch allows.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Limit the number of unacknowledged messages this binding may hold.
    async fn set_prefetch(&self, count: u32) -> Result<(), QueueError>;

    /// Poll up to `max_messages` from the queue.
    ///
    /// May block for up to the provider's long-poll timeout. Returns an empty
    /// vec if no messages are available or the prefetch window is full.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge successful processing. The broker may now discard the message.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

}

/// Publishes serialized records onto named queues.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    async fn publish(&self, queue: &str, body: &str) -> Result<(), QueueError>;
}
