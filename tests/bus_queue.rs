//! Delivery contract of the durable queue transport.
//!
//! Run with: cargo test --test bus_queue
//!
//! Uses the in-memory queue service, which implements the same visibility
//! timeout and receipt semantics as a hosted queue. Time is paused so
//! visibility timeouts elapse instantly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tandem::bus::{MemoryQueueService, MessageBusExt, QueueConfig, QueueMessageBus};
use tandem::message::{Envelope, Payload, WorkItem};

const VISIBILITY: Duration = Duration::from_secs(10);

fn make_bus() -> (Arc<MemoryQueueService>, QueueMessageBus) {
    let service = Arc::new(MemoryQueueService::new());
    let config = QueueConfig::memory()
        .with_visibility_timeout(VISIBILITY)
        .with_poll_intervals(Duration::from_millis(100), Duration::from_millis(500));
    (service.clone(), QueueMessageBus::new(service, config))
}

#[tokio::test(start_paused = true)]
async fn test_fifo_across_receive_batches() {
    let (service, bus) = make_bus();
    // More than one receive batch (16) worth of messages.
    for i in 0..40u32 {
        bus.publish("jobs", &i).await.unwrap();
    }

    let cancel = CancellationToken::new();
    let mut stream = bus.subscribe::<u32>("jobs", cancel.clone()).await.unwrap();
    let mut received = Vec::new();
    for _ in 0..40 {
        received.push(stream.next().await.unwrap());
    }
    assert_eq!(received, (0..40).collect::<Vec<_>>());

    // Cancelling and polling once more acknowledges the last message.
    cancel.cancel();
    assert_eq!(stream.next().await, None);
    assert_eq!(service.depth("tandem-jobs").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_message_is_redelivered() {
    let (service, bus) = make_bus();
    bus.publish("jobs", &1u32).await.unwrap();

    let mut first = bus
        .subscribe::<u32>("jobs", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.next().await, Some(1));
    // Consumer goes away mid-processing: no acknowledgement.
    drop(first);
    assert_eq!(service.in_flight("tandem-jobs").await, 1);

    let start = Instant::now();
    let mut second = bus
        .subscribe::<u32>("jobs", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.next().await, Some(1));

    assert!(start.elapsed() >= VISIBILITY);
    assert_eq!(service.receive_count("tandem-jobs", 0).await, Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_message_is_not_redelivered() {
    let (service, bus) = make_bus();
    bus.publish("jobs", &1u32).await.unwrap();
    bus.publish("jobs", &2u32).await.unwrap();

    let cancel = CancellationToken::new();
    let mut stream = bus.subscribe::<u32>("jobs", cancel.clone()).await.unwrap();
    assert_eq!(stream.next().await, Some(1));
    assert_eq!(stream.next().await, Some(2));

    // Well past the visibility timeout only the unacknowledged message remains.
    tokio::time::sleep(VISIBILITY * 3).await;
    assert_eq!(service.depth("tandem-jobs").await, 1);
    assert_eq!(service.in_flight("tandem-jobs").await, 0);
    assert_eq!(service.receive_count("tandem-jobs", 0).await, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_envelopes_cross_the_queue_intact() {
    let (_service, bus) = make_bus();
    let record = common::make_records(1).remove(0);
    let envelope = Envelope::traced(
        "orchestrator",
        "worker1",
        Payload::WorkItem(WorkItem::new(record.clone(), "worker1")),
        Some("trace-9".to_string()),
        record.correlation_id(),
    )
    .unwrap();
    bus.publish_envelope(&envelope).await.unwrap();

    let mut stream = bus
        .subscribe::<Envelope<Payload>>("worker1", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stream.next().await, Some(envelope));
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_survives_transient_receive_failures() {
    let (service, bus) = make_bus();
    bus.publish("jobs", &5u32).await.unwrap();
    service.fail_next_receives(4);

    let mut stream = bus
        .subscribe::<u32>("jobs", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stream.next().await, Some(5));
}
