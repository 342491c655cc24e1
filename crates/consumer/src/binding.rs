//! Opens per-archive queue bindings for workers.

use archivist_core::config::{AwsConfig, QueueConfig};
use archivist_queue::{MemoryBroker, QueueConsumer, QueueError, SqsConsumer};

/// Source of consumer bindings, one per queue name.
pub trait QueueBinder: Send + Sync {
    fn bind_queue(&self, queue: &str) -> Result<Box<dyn QueueConsumer>, QueueError>;
}

impl QueueBinder for MemoryBroker {
    fn bind_queue(&self, queue: &str) -> Result<Box<dyn QueueConsumer>, QueueError> {
        Ok(Box::new(self.bind(queue)))
    }
}

/// Binds to `{QUEUE_URL_PREFIX}/{queue}` on SQS.
pub struct SqsBinder {
    aws: AwsConfig,
    queue: QueueConfig,
}

impl SqsBinder {
    pub fn new(aws: AwsConfig, queue: QueueConfig) -> Self {
        Self { aws, queue }
    }
}

impl QueueBinder for SqsBinder {
    fn bind_queue(&self, queue: &str) -> Result<Box<dyn QueueConsumer>, QueueError> {
        Ok(Box::new(SqsConsumer::new(&self.aws, &self.queue, queue)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqs_binder_requires_prefix() {
        let aws = AwsConfig {
            region: "eu-west-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            endpoint_url: None,
        };
        let queue = QueueConfig {
            queue_url_prefix: None,
            visibility_timeout_secs: 30,
            wait_time_secs: 1,
        };
        let err = SqsBinder::new(aws, queue).bind_queue("archiver-1").err().unwrap();
        assert!(matches!(err, QueueError::NotConfigured(_)));
    }
}
