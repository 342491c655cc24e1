//! Notifier trait definition and shared error types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

/// An alert ready for delivery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub raised_at: DateTime<Utc>,
    /// Additional context (e.g., archive id, component).
    pub metadata: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            raised_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build an alert from an error, folding its `source()` chain into the body.
    pub fn from_error(subject: impl Into<String>, error: &(dyn std::error::Error + Send + Sync + 'static)) -> Self {
        let mut body = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            body.push_str("\n  caused by: ");
            body.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::new(subject, body)
    }
}

/// Trait for alert channel implementations.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification through this channel.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g., "webhook", "log").
    fn channel_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn from_error_includes_source_chain() {
        let err = Outer(std::io::Error::other("disk full"));
        let n = Notification::from_error("Consumer #3 failed", &err);
        assert_eq!(n.subject, "Consumer #3 failed");
        assert!(n.body.starts_with("outer failure"));
        assert!(n.body.contains("caused by: disk full"));
    }

    #[test]
    fn with_meta_accumulates() {
        let n = Notification::new("s", "b")
            .with_meta("archive", "7")
            .with_meta("component", "consumer");
        assert_eq!(n.metadata.len(), 2);
        assert_eq!(n.metadata["archive"], "7");
    }
}
