//! AWS SQS queue service.
//!
//! Queue naming follows `QueueConfig::queue_for_channel`. Queues are created
//! on first use with the configured visibility timeout; their URLs are cached.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client as SqsClient;
use tokio::sync::RwLock;
use tracing::info;

use super::{QueueConfig, QueueService, ReceivedMessage};
use crate::bus::{BusError, Result};

/// SQS-backed queue service.
pub struct SqsQueueService {
    sqs: SqsClient,
    visibility_timeout_secs: u64,
    /// Cache of SQS queue URLs by queue name.
    queue_urls: RwLock<HashMap<String, String>>,
}

impl SqsQueueService {
    /// Connect using the default AWS provider chain plus any configured overrides.
    pub async fn connect(config: &QueueConfig) -> Result<Self> {
        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(ref region) = config.region {
            aws_config_builder =
                aws_config_builder.region(aws_config::Region::new(region.clone()));
        }

        if let Some(ref endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;
        let sqs = SqsClient::new(&aws_config);

        info!(
            region = ?config.region,
            endpoint = ?config.endpoint_url,
            queue_prefix = %config.queue_prefix,
            "Connected to AWS SQS"
        );

        Ok(Self {
            sqs,
            visibility_timeout_secs: config.visibility_timeout_secs,
            queue_urls: RwLock::new(HashMap::new()),
        })
    }

    async fn queue_url(&self, queue: &str) -> Result<String> {
        {
            let urls = self.queue_urls.read().await;
            if let Some(url) = urls.get(queue) {
                return Ok(url.clone());
            }
        }

        // Create queue (idempotent - returns existing if already exists)
        let result = self
            .sqs
            .create_queue()
            .queue_name(queue)
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                self.visibility_timeout_secs.to_string(),
            )
            .send()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create SQS queue: {}", e)))?;

        let url = result
            .queue_url()
            .ok_or_else(|| BusError::Connection("SQS create_queue returned no URL".to_string()))?
            .to_string();

        self.queue_urls
            .write()
            .await
            .insert(queue.to_string(), url.clone());

        info!(queue = %queue, url = %url, "Created/found SQS queue");
        Ok(url)
    }
}

#[async_trait]
impl QueueService for SqsQueueService {
    async fn ensure_queue(&self, queue: &str) -> Result<()> {
        self.queue_url(queue).await.map(|_| ())
    }

    async fn send(&self, queue: &str, body: String) -> Result<()> {
        let url = self.queue_url(queue).await?;
        self.sqs
            .send_message()
            .queue_url(&url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| BusError::Publish(format!("Failed to send to SQS: {}", e)))?;
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let url = self.queue_url(queue).await?;
        // SQS caps a single receive at 10 messages.
        let max = max_messages.clamp(1, 10) as i32;

        let output = self
            .sqs
            .receive_message()
            .queue_url(&url)
            .max_number_of_messages(max)
            .visibility_timeout(visibility_timeout.as_secs() as i32)
            .send()
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to receive from SQS: {}", e)))?;

        Ok(output
            .messages()
            .iter()
            .filter_map(|message| {
                Some(ReceivedMessage {
                    message_id: message.message_id().unwrap_or_default().to_string(),
                    receipt: message.receipt_handle()?.to_string(),
                    body: message.body()?.to_string(),
                })
            })
            .collect())
    }

    async fn delete(&self, queue: &str, receipt: &str) -> Result<()> {
        let url = self.queue_url(queue).await?;
        self.sqs
            .delete_message()
            .queue_url(&url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| BusError::Acknowledge(format!("Failed to delete SQS message: {}", e)))?;
        Ok(())
    }
}
