//! Routes alerts to configured channels.
//!
//! The dispatcher delivers each notification to every configured channel.
//! Individual channel failures don't block other channels.

use archivist_core::config::NotifyConfig;

use crate::log::LogNotifier;
use crate::traits::{Notification, Notifier, NotifyError};
use crate::webhook::WebhookNotifier;

/// Dispatches notifications to multiple channels.
#[derive(Default)]
pub struct Dispatcher {
    channels: Vec<Box<dyn Notifier>>,
}

impl Dispatcher {
    /// Create an empty dispatcher. Alerts are dropped with a debug log.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_channels(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { channels }
    }

    /// The log channel is always present; a webhook is added when configured.
    pub fn from_config(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let mut dispatcher = Self::with_channels(vec![Box::new(LogNotifier)]);
        if let Some(url) = &config.webhook_url {
            dispatcher.add_channel(Box::new(WebhookNotifier::new(url)?));
        }
        Ok(dispatcher)
    }

    pub fn add_channel(&mut self, channel: Box<dyn Notifier>) {
        self.channels.push(channel);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Deliver a notification to every channel, in order. Returns how many
    /// channels accepted it.
    pub async fn dispatch(&self, notification: &Notification) -> usize {
        if self.channels.is_empty() {
            tracing::debug!(subject = %notification.subject, "No alert channels configured");
            return 0;
        }

        let mut delivered = 0;
        for channel in &self.channels {
            let start = std::time::Instant::now();
            match channel.send(notification).await {
                Ok(()) => {
                    delivered += 1;
                    tracing::debug!(
                        channel = channel.channel_name(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Alert delivered"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        channel = channel.channel_name(),
                        error = %e,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Alert delivery failed"
                    );
                }
            }
        }
        delivered
    }

    /// Raise an operator alert for an error. Delivery failures are logged,
    /// never returned.
    pub async fn alert(&self, subject: &str, error: &(dyn std::error::Error + Send + Sync + 'static)) {
        let notification = Notification::from_error(subject, error);
        let delivered = self.dispatch(&notification).await;
        if delivered == 0 && !self.channels.is_empty() {
            tracing::error!(
                subject,
                channels = self.channels.len(),
                "Alert was not delivered on any channel"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct MockNotifier {
        name: String,
        send_count: Arc<AtomicUsize>,
        subjects: Arc<Mutex<Vec<String>>>,
        should_fail: bool,
    }

    impl MockNotifier {
        fn new(name: &str, should_fail: bool) -> Self {
            Self {
                name: name.to_string(),
                send_count: Arc::new(AtomicUsize::new(0)),
                subjects: Arc::new(Mutex::new(Vec::new())),
                should_fail,
            }
        }
    }

    #[async_trait::async_trait]
    impl Notifier for MockNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.send_count.fetch_add(1, Ordering::SeqCst);
            self.subjects.lock().unwrap().push(notification.subject.clone());
            if self.should_fail {
                Err(NotifyError::Config("mock failure".to_string()))
            } else {
                Ok(())
            }
        }
        fn channel_name(&self) -> &str {
            &self.name
        }
    }

    #[tokio::test]
    async fn dispatch_to_all_channels() {
        let a = MockNotifier::new("a", false);
        let b = MockNotifier::new("b", false);
        let (count_a, count_b) = (a.send_count.clone(), b.send_count.clone());

        let dispatcher = Dispatcher::with_channels(vec![Box::new(a), Box::new(b)]);
        let delivered = dispatcher.dispatch(&Notification::new("test", "body")).await;

        assert_eq!(delivered, 2);
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn partial_failure_doesnt_block() {
        let ok = MockNotifier::new("ok", false);
        let count = ok.send_count.clone();

        let dispatcher =
            Dispatcher::with_channels(vec![Box::new(MockNotifier::new("fail", true)), Box::new(ok)]);
        let delivered = dispatcher.dispatch(&Notification::new("test", "body")).await;

        assert_eq!(delivered, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn alert_uses_subject_and_error() {
        let mock = MockNotifier::new("mock", false);
        let subjects = mock.subjects.clone();
        let dispatcher = Dispatcher::with_channels(vec![Box::new(mock)]);

        let err = std::io::Error::other("queue unreachable");
        dispatcher.alert("Collector failed to open stream", &err).await;

        assert_eq!(
            subjects.lock().unwrap().as_slice(),
            ["Collector failed to open stream".to_string()]
        );
    }

    #[test]
    fn from_config_adds_webhook_when_set() {
        let none = Dispatcher::from_config(&NotifyConfig { webhook_url: None }).unwrap();
        assert_eq!(none.channel_count(), 1);

        let with_hook = Dispatcher::from_config(&NotifyConfig {
            webhook_url: Some("https://alerts.example.com/hook".to_string()),
        })
        .unwrap();
        assert_eq!(with_hook.channel_count(), 2);
    }

    #[tokio::test]
    async fn empty_dispatcher_delivers_nothing() {
        let dispatcher = Dispatcher::empty();
        assert_eq!(dispatcher.dispatch(&Notification::new("test", "body")).await, 0);
        dispatcher.alert("dropped", &std::io::Error::other("x")).await;
    }

    #[tokio::test]
    async fn alert_survives_every_channel_failing() {
        let failing = MockNotifier::new("down", true);
        let count = failing.send_count.clone();
        let dispatcher = Dispatcher::with_channels(vec![Box::new(failing)]);

        dispatcher.alert("Consumer failed", &std::io::Error::other("disk full")).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
