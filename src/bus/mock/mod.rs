//! Mock message bus implementation for testing.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{BusError, MessageBus, MessageStream, Result};

/// Mock message bus for testing.
///
/// Records every publish; subscriptions never yield and end on cancellation.
#[derive(Default)]
pub struct MockMessageBus {
    published: RwLock<Vec<(String, Bytes)>>,
    /// Fail every publish once this many publishes have succeeded.
    fail_after: RwLock<Option<usize>>,
}

impl MockMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_after.write().await = fail.then_some(0);
    }

    /// Let `count` publishes succeed, then fail the rest.
    pub async fn fail_after(&self, count: usize) {
        *self.fail_after.write().await = Some(count);
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    /// Channels published to, in publish order.
    pub async fn published_channels(&self) -> Vec<String> {
        self.published
            .read()
            .await
            .iter()
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Decode every message published to `channel`.
    pub async fn published_on<T: DeserializeOwned>(&self, channel: &str) -> Vec<T> {
        self.published
            .read()
            .await
            .iter()
            .filter(|(c, _)| c == channel)
            .filter_map(|(_, body)| serde_json::from_slice(body).ok())
            .collect()
    }
}

#[async_trait]
impl MessageBus for MockMessageBus {
    async fn publish_raw(&self, channel: &str, body: Bytes) -> Result<()> {
        let mut published = self.published.write().await;
        if let Some(limit) = *self.fail_after.read().await {
            if published.len() >= limit {
                return Err(BusError::Connection("Mock publish failure".to_string()));
            }
        }
        published.push((channel.to_string(), body));
        Ok(())
    }

    async fn subscribe_raw(
        &self,
        _channel: &str,
        cancel: CancellationToken,
    ) -> Result<MessageStream> {
        Ok(stream::once(async move { cancel.cancelled().await })
            .filter_map(|_| futures::future::ready(None::<Bytes>))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBusExt;

    #[tokio::test]
    async fn test_mock_message_bus_publish() {
        let bus = MockMessageBus::new();
        bus.publish("worker1", &1u32).await.unwrap();

        assert_eq!(bus.published_count().await, 1);
        assert_eq!(bus.published_on::<u32>("worker1").await, vec![1]);
    }

    #[tokio::test]
    async fn test_mock_message_bus_fail_on_publish() {
        let bus = MockMessageBus::new();
        bus.set_fail_on_publish(true).await;

        let result = bus.publish("worker1", &1u32).await;

        assert!(matches!(result, Err(BusError::Connection(_))));
        assert_eq!(bus.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_mock_message_bus_fail_after() {
        let bus = MockMessageBus::new();
        bus.fail_after(2).await;

        assert!(bus.publish("a", &1u32).await.is_ok());
        assert!(bus.publish("b", &2u32).await.is_ok());
        assert!(bus.publish("c", &3u32).await.is_err());
        assert_eq!(bus.published_channels().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_mock_subscription_ends_on_cancel() {
        let bus = MockMessageBus::new();
        let cancel = CancellationToken::new();
        let mut stream = bus.subscribe_raw("any", cancel.clone()).await.unwrap();

        cancel.cancel();
        assert!(stream.next().await.is_none());
    }
}
