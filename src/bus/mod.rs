//! Message bus for channel-addressed delivery.
//!
//! This module contains:
//! - `MessageBus` trait: publish/subscribe of serialized bodies on named channels
//! - `MessageBusExt` trait: typed publish/subscribe and envelope publishing
//! - Transport configuration types
//! - Implementations: in-process channels, durable queue service, mock

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::message::{Envelope, EnvelopeError};

// Implementation modules
pub mod channel;
pub mod mock;
pub mod queue;

// Re-exports
pub use channel::ChannelMessageBus;
pub use mock::MockMessageBus;
pub use queue::{MemoryQueueService, QueueBackend, QueueConfig, QueueMessageBus, QueueService};

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Lazy, possibly infinite sequence of message bodies from one channel.
///
/// The stream ends when the subscription's cancellation token fires.
pub type MessageStream = BoxStream<'static, Bytes>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Acknowledge failed: {0}")]
    Acknowledge(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(#[from] EnvelopeError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl BusError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BusError::Connection(_) | BusError::Publish(_) | BusError::Subscribe(_)
        )
    }
}

/// Interface for channel-addressed message delivery.
///
/// Implementations:
/// - `ChannelMessageBus`: in-process queues, exactly-once, FIFO per channel
/// - `QueueMessageBus`: durable queue service, at-least-once with visibility timeout
/// - `MockMessageBus`: records publishes for testing
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a serialized body to a named channel.
    ///
    /// Returns only once the transport has accepted the message; a message
    /// reported as published is never silently dropped.
    async fn publish_raw(&self, channel: &str, body: Bytes) -> Result<()>;

    /// Subscribe to a named channel.
    ///
    /// The returned stream suspends while no message is available and ends
    /// without error once `cancel` fires. Re-invoke to restart.
    async fn subscribe_raw(&self, channel: &str, cancel: CancellationToken)
        -> Result<MessageStream>;
}

/// Typed helpers over any `MessageBus`.
///
/// Bodies are JSON. Subscribers drop (and log) bodies that fail to decode
/// rather than ending the stream.
#[async_trait]
pub trait MessageBusExt: MessageBus {
    /// Serialize and publish a message to a channel.
    async fn publish<T>(&self, channel: &str, message: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let body = serde_json::to_vec(message)?;
        self.publish_raw(channel, Bytes::from(body)).await
    }

    /// Publish an envelope to the channel it is addressed to.
    async fn publish_envelope<T>(&self, envelope: &Envelope<T>) -> Result<()>
    where
        T: Serialize + Sync,
    {
        envelope.validate()?;
        self.publish(envelope.to(), envelope).await
    }

    /// Subscribe to a channel, decoding each body as `T`.
    ///
    /// The returned stream is fused: polling it after it ended yields `None`.
    async fn subscribe<T>(
        &self,
        channel: &str,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let raw = self.subscribe_raw(channel, cancel).await?;
        let channel = channel.to_string();
        Ok(raw
            .fuse()
            .filter_map(move |body| {
                let decoded = match serde_json::from_slice::<T>(&body) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Dropping undecodable message");
                        None
                    }
                };
                futures::future::ready(decoded)
            })
            .boxed())
    }
}

impl<B: MessageBus + ?Sized> MessageBusExt for B {}

// ============================================================================
// Configuration
// ============================================================================

/// Transport type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// In-process channels (no external broker).
    #[default]
    Channel,
    /// Durable, polling queue service.
    Queue,
}

/// Transport configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport type discriminator.
    #[serde(rename = "type")]
    pub transport_type: TransportType,
    /// Durable queue configuration.
    pub queue: QueueConfig,
}

impl TransportConfig {
    /// Config for the in-process transport.
    pub fn channel() -> Self {
        Self::default()
    }

    /// Config for the durable transport.
    pub fn queue(queue: QueueConfig) -> Self {
        Self {
            transport_type: TransportType::Queue,
            queue,
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the message bus based on configuration.
///
/// A durable SQS transport with neither an endpoint nor a region configured
/// has no connection target; the in-process transport is used instead.
pub async fn init_message_bus(config: &TransportConfig) -> Result<Arc<dyn MessageBus>> {
    match config.transport_type {
        TransportType::Channel => {
            info!(transport = "channel", "Using in-process channel transport");
            Ok(Arc::new(ChannelMessageBus::new()))
        }
        TransportType::Queue => {
            let queue_config = &config.queue;
            if queue_config.backend == QueueBackend::Sqs && !queue_config.has_connection_target() {
                info!(
                    transport = "channel",
                    "No queue connection target configured, using in-process channel transport"
                );
                return Ok(Arc::new(ChannelMessageBus::new()));
            }

            let service: Arc<dyn QueueService> = match queue_config.backend {
                QueueBackend::Memory => Arc::new(MemoryQueueService::new()),
                QueueBackend::Sqs => {
                    #[cfg(feature = "sqs")]
                    {
                        Arc::new(queue::sqs::SqsQueueService::connect(queue_config).await?)
                    }

                    #[cfg(not(feature = "sqs"))]
                    {
                        return Err(BusError::Configuration(
                            "SQS support requires the 'sqs' feature. Rebuild with --features sqs"
                                .to_string(),
                        ));
                    }
                }
            };

            info!(
                transport = "queue",
                backend = ?queue_config.backend,
                "Using durable queue transport"
            );
            Ok(Arc::new(QueueMessageBus::new(service, queue_config.clone())))
        }
    }
}
