//! HTTP streaming connector.
//!
//! Opens one long-lived request per owner and pumps the newline-delimited
//! response body through an [`ArchiveListener`] on a background task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use archivist_core::config::StreamConfig;
use archivist_core::{Archive, ArchiveId, OwnerId, RecordLog, Verbosity};
use archivist_queue::QueuePublisher;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::channel::{union_terms, StreamChannel, StreamConnector};
use crate::credentials::CredentialSource;
use crate::error::StreamError;
use crate::listener::ArchiveListener;

pub struct HttpStreamConnector {
    client: reqwest::Client,
    stream: StreamConfig,
    credentials: Arc<dyn CredentialSource>,
    log: Arc<dyn RecordLog>,
    publisher: Arc<dyn QueuePublisher>,
}

impl HttpStreamConnector {
    pub fn new(
        stream: StreamConfig,
        credentials: Arc<dyn CredentialSource>,
        log: Arc<dyn RecordLog>,
        publisher: Arc<dyn QueuePublisher>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            stream,
            credentials,
            log,
            publisher,
        }
    }
}

#[async_trait]
impl StreamConnector for HttpStreamConnector {
    async fn open(
        &self,
        owner: &OwnerId,
        archives: &[Archive],
        verbosity: Verbosity,
    ) -> Result<Box<dyn StreamChannel>, StreamError> {
        let creds = self.credentials.credentials(owner)?;
        let track = union_terms(archives).join(",");

        let mut request = self
            .client
            .post(&self.stream.endpoint)
            .basic_auth(&creds.access_token, Some(&creds.access_secret))
            .form(&[("track", track.as_str())]);
        if let Some(key) = &self.stream.consumer_key {
            request = request.header("X-Consumer-Key", key);
        }
        if let Some(secret) = &self.stream.consumer_secret {
            request = request.header("X-Consumer-Secret", secret);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Rejected {
                owner: owner.clone(),
                status: status.as_u16(),
            });
        }

        info!(owner = %owner, track = %track, archives = archives.len(), "Upstream stream opened");

        let listener = Arc::new(ArchiveListener::new(
            archives,
            Arc::clone(&self.log),
            Arc::clone(&self.publisher),
            verbosity,
        ));
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(pump(
            owner.clone(),
            response,
            Arc::clone(&listener),
            Arc::clone(&running),
        ));

        Ok(Box::new(HttpStreamChannel {
            owner: owner.clone(),
            archives: listener.archive_ids(),
            listener,
            running,
            task: Some(task),
        }))
    }
}

async fn pump(
    owner: OwnerId,
    response: reqwest::Response,
    listener: Arc<ArchiveListener>,
    running: Arc<AtomicBool>,
) {
    let mut body = response.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();

    let outcome = loop {
        match body.next().await {
            Some(Ok(chunk)) => {
                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    if let Err(e) = listener.on_line(&String::from_utf8_lossy(&line)).await {
                        warn!(owner = %owner, error = %e, "Failed to route upstream record");
                    }
                }
            }
            Some(Err(e)) => break Err(e),
            None => break Ok(()),
        }
    };

    running.store(false, Ordering::SeqCst);
    match outcome {
        Ok(()) => warn!(owner = %owner, "Upstream stream ended"),
        Err(e) => warn!(owner = %owner, error = %e, "Upstream stream failed"),
    }
}

pub struct HttpStreamChannel {
    owner: OwnerId,
    archives: Vec<ArchiveId>,
    listener: Arc<ArchiveListener>,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl StreamChannel for HttpStreamChannel {
    fn owner(&self) -> &OwnerId {
        &self.owner
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn channels(&self) -> &[ArchiveId] {
        &self.archives
    }

    fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!(owner = %self.owner, "Upstream stream disconnected");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn close_log(&mut self) -> Result<(), StreamError> {
        self.listener.close()
    }

    fn set_verbosity(&mut self, level: Verbosity) {
        self.listener.set_verbosity(level);
    }
}

impl Drop for HttpStreamChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
