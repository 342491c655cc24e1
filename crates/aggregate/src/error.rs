use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
