//! Alert channel that writes to the tracing log.

use crate::traits::{Notification, Notifier, NotifyError};

/// Emits every alert as an `error!` event. Always configured so alerts are
/// never silently dropped when no external channel exists.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::error!(
            subject = %notification.subject,
            metadata = ?notification.metadata,
            "ALERT: {}",
            notification.body
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}
