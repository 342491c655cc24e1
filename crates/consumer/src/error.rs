use archivist_aggregate::AggregateError;
use archivist_core::StoreError;
use archivist_queue::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("aggregate error: {0}")]
    Aggregate(#[from] AggregateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker task failed: {0}")]
    Join(String),
}
