//! In-memory channel-based message bus.
//!
//! Each channel name maps to a lazily created, unbounded tokio mpsc queue.
//! Readers share the queue's receiver, so every message is handed to exactly
//! one reader, in publish order. Nothing leaves the process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{BusError, MessageBus, MessageStream, Result};

/// One named FIFO queue.
struct ChannelQueue {
    sender: mpsc::UnboundedSender<Bytes>,
    /// Shared by every subscriber of the channel; a received message is gone.
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Bytes>>>,
}

impl ChannelQueue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }
}

/// In-process message bus using tokio unbounded channels.
///
/// Delivery is exactly-once within the process and FIFO per channel.
/// Buffering is unbounded: publishing never waits for a reader.
#[derive(Default)]
pub struct ChannelMessageBus {
    channels: RwLock<HashMap<String, Arc<ChannelQueue>>>,
}

impl ChannelMessageBus {
    /// Create a new channel message bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the queue for a channel, creating it on first use.
    async fn queue(&self, channel: &str) -> Arc<ChannelQueue> {
        {
            let channels = self.channels.read().await;
            if let Some(queue) = channels.get(channel) {
                return Arc::clone(queue);
            }
        }

        let mut channels = self.channels.write().await;
        let queue = channels.entry(channel.to_string()).or_insert_with(|| {
            info!(channel = %channel, "Created in-process channel");
            Arc::new(ChannelQueue::new())
        });
        Arc::clone(queue)
    }
}

#[async_trait]
impl MessageBus for ChannelMessageBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(channel = %channel))]
    async fn publish_raw(&self, channel: &str, body: Bytes) -> Result<()> {
        let queue = self.queue(channel).await;

        // The bus owns a receiver for every channel, so the queue is never closed
        // while the bus is alive.
        queue
            .sender
            .send(body)
            .map_err(|_| BusError::Publish(format!("Channel '{}' is closed", channel)))?;

        debug!(channel = %channel, "Published message to channel");
        Ok(())
    }

    async fn subscribe_raw(
        &self,
        channel: &str,
        cancel: CancellationToken,
    ) -> Result<MessageStream> {
        let receiver = Arc::clone(&self.queue(channel).await.receiver);
        debug!(channel = %channel, "Subscribed to in-process channel");

        let stream = stream::unfold((receiver, cancel), |(receiver, cancel)| async move {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                body = async { receiver.lock().await.recv().await } => body,
            };
            next.map(|body| (body, (receiver, cancel)))
        });

        Ok(stream.boxed())
    }
}
