//! Durable queue-backed message bus.
//!
//! Each channel maps to one remotely hosted queue named
//! `{queue_prefix}-{channel}`. Publishing base64-encodes the body and
//! enqueues it. Subscribing runs a poll loop:
//!
//! - receive up to `max_messages` with a visibility timeout
//! - empty receive: wait `idle_poll_ms`, then poll again
//! - failed receive: log, wait `error_backoff_ms`, then poll again (never fatal)
//! - each message is yielded to the caller and deleted only when the caller
//!   asks for the next one, i.e. after it finished processing the previous
//!
//! A crash or cancellation between yield and delete leaves the message in the
//! queue; it reappears once its visibility timeout elapses (at-least-once).

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use base64::prelude::*;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{BusError, MessageBus, MessageStream, Result};
use crate::utils::retry::{connection_backoff, publish_backoff};

mod memory;
#[cfg(feature = "sqs")]
pub mod sqs;

pub use memory::MemoryQueueService;

/// Queue service implementation selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// Process-local queue service with visibility-timeout semantics.
    #[default]
    Memory,
    /// AWS SQS (requires the `sqs` feature).
    Sqs,
}

/// Configuration for the durable queue transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue service implementation.
    pub backend: QueueBackend,
    /// Custom endpoint URL (for LocalStack or testing).
    pub endpoint_url: Option<String>,
    /// Service region (e.g., "us-east-1").
    pub region: Option<String>,
    /// Prefix for queue names (default: "tandem").
    pub queue_prefix: String,
    /// Max number of messages to receive in one poll (default: 16).
    pub max_messages: usize,
    /// Visibility timeout in seconds for received messages (default: 60).
    pub visibility_timeout_secs: u64,
    /// Wait after an empty receive, in milliseconds (default: 2000).
    pub idle_poll_ms: u64,
    /// Wait after a failed receive, in milliseconds (default: 5000).
    pub error_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            endpoint_url: None,
            region: None,
            queue_prefix: "tandem".to_string(),
            max_messages: 16,
            visibility_timeout_secs: 60,
            idle_poll_ms: 2000,
            error_backoff_ms: 5000,
        }
    }
}

impl QueueConfig {
    /// Config for the process-local queue service.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Config for AWS SQS.
    pub fn sqs() -> Self {
        Self {
            backend: QueueBackend::Sqs,
            ..Self::default()
        }
    }

    /// Set service region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set custom endpoint URL (for LocalStack or testing).
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    /// Set queue name prefix.
    pub fn with_queue_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.queue_prefix = prefix.into();
        self
    }

    /// Set visibility timeout.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set poll intervals for the idle and error paths.
    pub fn with_poll_intervals(mut self, idle: Duration, error_backoff: Duration) -> Self {
        self.idle_poll_ms = idle.as_millis() as u64;
        self.error_backoff_ms = error_backoff.as_millis() as u64;
        self
    }

    /// Whether a remote connection target is configured.
    pub fn has_connection_target(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.endpoint_url) || set(&self.region)
    }

    /// Build the queue name for a channel.
    /// Replaces characters queue services reject with dashes.
    pub fn queue_for_channel(&self, channel: &str) -> String {
        let sanitized: String = channel
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        if self.queue_prefix.is_empty() {
            sanitized
        } else {
            format!("{}-{}", self.queue_prefix, sanitized)
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// A message handed out by a receive call.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Handle required to delete this particular delivery.
    pub receipt: String,
    pub body: String,
}

/// Minimal queue service surface used by the durable transport.
///
/// Receive and delete must be atomic on the service side; the transport adds
/// no locking of its own.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Create the queue if it does not exist (idempotent).
    async fn ensure_queue(&self, queue: &str) -> Result<()>;

    /// Enqueue a text body.
    async fn send(&self, queue: &str, body: String) -> Result<()>;

    /// Receive up to `max_messages` visible messages, hiding each for `visibility_timeout`.
    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>>;

    /// Acknowledge (delete) a received message.
    async fn delete(&self, queue: &str, receipt: &str) -> Result<()>;
}

/// Message bus over a durable queue service.
pub struct QueueMessageBus {
    service: Arc<dyn QueueService>,
    config: QueueConfig,
    /// Queues already created through this bus.
    known_queues: RwLock<HashSet<String>>,
}

impl QueueMessageBus {
    /// Create a new queue message bus.
    pub fn new(service: Arc<dyn QueueService>, config: QueueConfig) -> Self {
        info!(
            backend = ?config.backend,
            queue_prefix = %config.queue_prefix,
            visibility_timeout_secs = config.visibility_timeout_secs,
            "Queue message bus initialized"
        );
        Self {
            service,
            config,
            known_queues: RwLock::new(HashSet::new()),
        }
    }

    /// Resolve a channel's queue name, creating the queue on first use.
    async fn ensure_queue(&self, channel: &str) -> Result<String> {
        let queue = self.config.queue_for_channel(channel);

        // Check cache
        {
            let known = self.known_queues.read().await;
            if known.contains(&queue) {
                return Ok(queue);
            }
        }

        (|| async { self.service.ensure_queue(&queue).await })
            .retry(connection_backoff())
            .when(BusError::is_transient)
            .notify(|err: &BusError, dur: Duration| {
                warn!(queue = %queue, error = %err, delay = ?dur, "Queue setup failed, retrying");
            })
            .await?;

        self.known_queues.write().await.insert(queue.clone());
        info!(channel = %channel, queue = %queue, "Created/found queue");
        Ok(queue)
    }
}

#[async_trait]
impl MessageBus for QueueMessageBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(channel = %channel))]
    async fn publish_raw(&self, channel: &str, body: Bytes) -> Result<()> {
        let queue = self.ensure_queue(channel).await?;
        let encoded = BASE64_STANDARD.encode(&body);

        (|| async { self.service.send(&queue, encoded.clone()).await })
            .retry(publish_backoff())
            .when(BusError::is_transient)
            .notify(|err: &BusError, dur: Duration| {
                warn!(queue = %queue, error = %err, delay = ?dur, "Publish failed, retrying");
            })
            .await?;

        debug!(channel = %channel, queue = %queue, "Published message to queue");
        Ok(())
    }

    async fn subscribe_raw(
        &self,
        channel: &str,
        cancel: CancellationToken,
    ) -> Result<MessageStream> {
        let queue = self.ensure_queue(channel).await?;
        info!(channel = %channel, queue = %queue, "Starting queue poll loop");

        let poller = QueuePoller {
            service: Arc::clone(&self.service),
            queue,
            config: self.config.clone(),
            cancel,
            buffer: VecDeque::new(),
            pending_ack: None,
        };

        Ok(stream::unfold(poller, |mut poller| async move {
            let body = poller.next_body().await?;
            Some((body, poller))
        })
        .boxed())
    }
}

/// Poll-loop state behind one subscription stream.
struct QueuePoller {
    service: Arc<dyn QueueService>,
    queue: String,
    config: QueueConfig,
    cancel: CancellationToken,
    /// Received but not yet yielded.
    buffer: VecDeque<ReceivedMessage>,
    /// Receipt of the message the caller is (or was) processing.
    pending_ack: Option<String>,
}

impl QueuePoller {
    /// Acknowledge the previous message and produce the next body.
    ///
    /// Returns `None` once cancelled.
    async fn next_body(&mut self) -> Option<Bytes> {
        // Being asked for the next message means the previous one was processed.
        if let Some(receipt) = self.pending_ack.take() {
            self.acknowledge(&receipt).await;
        }

        loop {
            if self.cancel.is_cancelled() {
                debug!(queue = %self.queue, "Queue subscription cancelled");
                return None;
            }

            if let Some(message) = self.buffer.pop_front() {
                match BASE64_STANDARD.decode(message.body.as_bytes()) {
                    Ok(data) => {
                        self.pending_ack = Some(message.receipt);
                        return Some(Bytes::from(data));
                    }
                    Err(e) => {
                        error!(
                            queue = %self.queue,
                            message_id = %message.message_id,
                            error = %e,
                            "Failed to decode base64 message"
                        );
                        // Delete invalid message
                        self.acknowledge(&message.receipt).await;
                        continue;
                    }
                }
            }

            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                received = self.service.receive(
                    &self.queue,
                    self.config.max_messages,
                    self.config.visibility_timeout(),
                ) => received,
            };

            let wait = match received {
                Ok(messages) if messages.is_empty() => self.config.idle_poll(),
                Ok(messages) => {
                    debug!(queue = %self.queue, count = messages.len(), "Received messages");
                    self.buffer.extend(messages);
                    continue;
                }
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "Failed to receive messages from queue");
                    self.config.error_backoff()
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn acknowledge(&self, receipt: &str) {
        if let Err(e) = self.service.delete(&self.queue, receipt).await {
            // Not fatal: the message reappears after its visibility timeout.
            warn!(queue = %self.queue, error = %e, "Failed to delete message, it will be redelivered");
        }
    }
}
