//! AWS SQS consumer and publisher.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::BehaviorVersion;
use aws_sdk_sqs::types::MessageSystemAttributeName;
use aws_sdk_sqs::Client;
use chrono::{TimeZone, Utc};
use tracing::{debug, info};

use archivist_core::config::{AwsConfig, QueueConfig};

use crate::consumer::{QueueConsumer, QueueMessage, QueuePublisher};
use crate::error::QueueError;

/// Build an SQS client from project config.
///
/// Does not go through `aws_config::defaults()`: a generic `AWS_ENDPOINT_URL`
/// in the environment would otherwise redirect SQS traffic.
pub fn build_client(aws: &AwsConfig) -> Client {
    let region = aws_sdk_sqs::config::Region::new(aws.region.clone());
    let mut sqs_config = aws_sdk_sqs::Config::builder()
        .region(region)
        .behavior_version(BehaviorVersion::latest());

    if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
        let creds = Credentials::new(
            key_id,
            secret,
            aws.session_token.clone(),
            None,
            "archivist-queue-static",
        );
        sqs_config = sqs_config.credentials_provider(creds);
    }

    if let Some(endpoint) = aws.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
        let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };
        sqs_config = sqs_config.endpoint_url(url);
    }

    Client::from_conf(sqs_config.build())
}

fn resolve_url(queue: &QueueConfig, queue_name: &str) -> Result<String, QueueError> {
    queue
        .queue_url(queue_name)
        .ok_or_else(|| QueueError::NotConfigured("QUEUE_URL_PREFIX is not set".into()))
}

/// SQS-backed consumer bound to one archive queue.
///
/// SQS has no broker-side prefetch, so the window is enforced locally by
/// tracking the receipt handles that are still outstanding.
pub struct SqsConsumer {
    client: Client,
    queue_url: String,
    visibility_timeout_secs: i32,
    wait_time_secs: i32,
    prefetch: AtomicU32,
    outstanding: Mutex<HashSet<String>>,
}

impl SqsConsumer {
    pub fn new(aws: &AwsConfig, queue: &QueueConfig, queue_name: &str) -> Result<Self, QueueError> {
        let queue_url = resolve_url(queue, queue_name)?;
        info!(queue_url = %queue_url, region = %aws.region, "SQS consumer initialized");

        Ok(Self {
            client: build_client(aws),
            queue_url,
            visibility_timeout_secs: queue.visibility_timeout_secs as i32,
            wait_time_secs: queue.wait_time_secs as i32,
            prefetch: AtomicU32::new(10),
            outstanding: Mutex::new(HashSet::new()),
        })
    }

    fn outstanding(&self) -> Result<std::sync::MutexGuard<'_, HashSet<String>>, QueueError> {
        self.outstanding
            .lock()
            .map_err(|e| QueueError::Provider(format!("outstanding set poisoned: {e}")))
    }

    fn window(&self) -> Result<u32, QueueError> {
        let held = self.outstanding()?.len() as u32;
        Ok(self.prefetch.load(Ordering::SeqCst).saturating_sub(held))
    }
}

#[async_trait]
impl QueueConsumer for SqsConsumer {
    async fn set_prefetch(&self, count: u32) -> Result<(), QueueError> {
        self.prefetch.store(count.max(1), Ordering::SeqCst);
        Ok(())
    }

    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        // SQS caps at 10 messages per request.
        let capped = max_messages.min(10).min(self.window()?) as i32;
        if capped == 0 {
            return Ok(Vec::new());
        }

        debug!(max_messages = capped, queue_url = %self.queue_url, "Polling SQS");

        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(capped)
            .wait_time_seconds(self.wait_time_secs)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS receive failed: {e:?}")))?;

        let sqs_messages = resp.messages.unwrap_or_default();
        debug!(count = sqs_messages.len(), "Received SQS messages");

        let mut messages = Vec::with_capacity(sqs_messages.len());
        for msg in sqs_messages {
            let receipt_handle = msg
                .receipt_handle()
                .ok_or_else(|| QueueError::Parse("missing receipt handle".into()))?
                .to_string();

            let attr = |name: &MessageSystemAttributeName| {
                msg.attributes().and_then(|attrs| attrs.get(name)).cloned()
            };

            let timestamp = attr(&MessageSystemAttributeName::SentTimestamp)
                .and_then(|ts| ts.parse::<i64>().ok())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now);

            let attempt_count = attr(&MessageSystemAttributeName::ApproximateReceiveCount)
                .and_then(|c| c.parse::<u32>().ok())
                .unwrap_or(1);

            messages.push(QueueMessage {
                id: msg.message_id().unwrap_or("unknown").to_string(),
                body: msg.body().unwrap_or("").to_string(),
                receipt_handle,
                timestamp,
                attempt_count,
            });
        }

        let mut outstanding = self.outstanding()?;
        outstanding.extend(messages.iter().map(|m| m.receipt_handle.clone()));

        Ok(messages)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(receipt_handle, "Acking SQS message");

        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Ack(format!("SQS delete failed: {e:?}")))?;

        self.outstanding()?.remove(receipt_handle);
        Ok(())
    }
}

/// Publishes records onto per-archive SQS queues.
pub struct SqsPublisher {
    client: Client,
    queue: QueueConfig,
}

impl SqsPublisher {
    pub fn new(aws: &AwsConfig, queue: &QueueConfig) -> Self {
        Self {
            client: build_client(aws),
            queue: queue.clone(),
        }
    }
}

#[async_trait]
impl QueuePublisher for SqsPublisher {
    async fn publish(&self, queue: &str, body: &str) -> Result<(), QueueError> {
        let queue_url = resolve_url(&self.queue, queue)?;
        self.client
            .send_message()
            .queue_url(&queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Publish(format!("SQS send to {queue} failed: {e:?}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aws() -> AwsConfig {
        AwsConfig {
            region: "eu-west-1".to_string(),
            access_key_id: Some("AKIDEXAMPLE".to_string()),
            secret_access_key: Some("secret".to_string()),
            session_token: None,
            endpoint_url: Some("localhost:9324".to_string()),
        }
    }

    #[test]
    fn test_consumer_requires_prefix() {
        let queue = QueueConfig {
            queue_url_prefix: None,
            visibility_timeout_secs: 30,
            wait_time_secs: 1,
        };
        let err = SqsConsumer::new(&aws(), &queue, "archiver-1").err().unwrap();
        assert!(matches!(err, QueueError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_prefetch_window_blocks_poll() {
        let queue = QueueConfig {
            queue_url_prefix: Some("http://localhost:9324/000000000000".to_string()),
            visibility_timeout_secs: 30,
            wait_time_secs: 1,
        };
        let consumer = SqsConsumer::new(&aws(), &queue, "archiver-1").unwrap();
        consumer.set_prefetch(1).await.unwrap();
        consumer.outstanding().unwrap().insert("held".to_string());

        // Window is full, so no request reaches the network.
        let batch = consumer.poll_batch(10).await.unwrap();
        assert!(batch.is_empty());
    }
}
