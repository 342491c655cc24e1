use archivist_core::{OwnerId, StoreError};
use archivist_queue::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("no credentials for owner {0}")]
    MissingCredentials(OwnerId),

    #[error("credential store error: {0}")]
    Credentials(String),

    #[error("upstream rejected connection for {owner}: {status}")]
    Rejected { owner: OwnerId, status: u16 },

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}
