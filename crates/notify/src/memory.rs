//! In-process notifier that keeps every alert it receives.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::traits::{Notification, Notifier, NotifyError};

/// Collects notifications instead of delivering them. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.lock().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.lock().iter().map(|n| n.subject.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.lock().push(notification.clone());
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_history() {
        let notifier = MemoryNotifier::new();
        let handle = notifier.clone();
        notifier.send(&Notification::new("disk full", "97%")).await.unwrap();
        notifier
            .send(&Notification::new("queue down", "eu-west-1").with_meta("archive", "4"))
            .await
            .unwrap();

        assert_eq!(handle.subjects(), ["disk full", "queue down"]);
        assert_eq!(handle.sent()[1].metadata["archive"], "4");
    }
}
