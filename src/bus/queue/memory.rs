//! Process-local queue service.
//!
//! Mirrors the visibility-timeout model of hosted queue services: a received
//! message stays in the queue, hidden until its deadline, and is removed only
//! by a delete carrying the receipt of its latest delivery. Uses tokio's clock
//! so paused-time tests can step past visibility timeouts.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{QueueService, ReceivedMessage};
use crate::bus::{BusError, Result};

struct StoredMessage {
    id: String,
    body: String,
    visible_at: Instant,
    /// Receipt of the most recent delivery, if any.
    receipt: Option<String>,
    receive_count: u32,
}

/// In-memory queue service with visibility timeouts.
#[derive(Default)]
pub struct MemoryQueueService {
    queues: Mutex<HashMap<String, VecDeque<StoredMessage>>>,
    next_id: AtomicU64,
    /// Number of upcoming receive calls that should fail.
    failing_receives: AtomicU32,
}

impl MemoryQueueService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` receive calls fail with a connection error.
    pub fn fail_next_receives(&self, count: u32) {
        self.failing_receives.store(count, Ordering::SeqCst);
    }

    /// Total messages in a queue, visible or in flight.
    pub async fn depth(&self, queue: &str) -> usize {
        self.queues.lock().await.get(queue).map_or(0, VecDeque::len)
    }

    /// Messages currently hidden by a visibility timeout.
    pub async fn in_flight(&self, queue: &str) -> usize {
        let now = Instant::now();
        self.queues.lock().await.get(queue).map_or(0, |messages| {
            messages.iter().filter(|m| m.visible_at > now).count()
        })
    }

    /// How many times the message at `position` has been delivered.
    pub async fn receive_count(&self, queue: &str, position: usize) -> Option<u32> {
        self.queues
            .lock()
            .await
            .get(queue)
            .and_then(|messages| messages.get(position))
            .map(|m| m.receive_count)
    }

    fn take_failure(&self) -> bool {
        self.failing_receives
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl QueueService for MemoryQueueService {
    async fn ensure_queue(&self, queue: &str) -> Result<()> {
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn send(&self, queue: &str, body: String) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut queues = self.queues.lock().await;
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| BusError::Publish(format!("Queue '{}' does not exist", queue)))?;
        messages.push_back(StoredMessage {
            id: format!("msg-{id}"),
            body,
            visible_at: Instant::now(),
            receipt: None,
            receive_count: 0,
        });
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        if self.take_failure() {
            return Err(BusError::Connection("Simulated receive failure".to_string()));
        }

        let now = Instant::now();
        let mut queues = self.queues.lock().await;
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| BusError::Subscribe(format!("Queue '{}' does not exist", queue)))?;

        let mut received = Vec::new();
        for message in messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if message.visible_at > now {
                continue;
            }
            message.receive_count += 1;
            message.visible_at = now + visibility_timeout;
            let receipt = format!("{}-{}", message.id, uuid::Uuid::new_v4().simple());
            message.receipt = Some(receipt.clone());
            if message.receive_count > 1 {
                debug!(
                    queue = %queue,
                    message_id = %message.id,
                    receive_count = message.receive_count,
                    "Redelivering message"
                );
            }
            received.push(ReceivedMessage {
                message_id: message.id.clone(),
                receipt,
                body: message.body.clone(),
            });
        }
        Ok(received)
    }

    async fn delete(&self, queue: &str, receipt: &str) -> Result<()> {
        let mut queues = self.queues.lock().await;
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| BusError::Acknowledge(format!("Queue '{}' does not exist", queue)))?;

        let position = messages
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt))
            .ok_or_else(|| BusError::Acknowledge(format!("Unknown or stale receipt '{}'", receipt)))?;
        messages.remove(position);
        Ok(())
    }
}
