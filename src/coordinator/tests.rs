use super::*;
use crate::aggregator::PartialReason;
use crate::bus::{ChannelMessageBus, MockMessageBus};
use crate::config::DEFAULT_IDLE_TIMEOUT_SECS;
use crate::test_utils::{make_record, make_records, MockScorer, RecordingReportSink, StaticSourceProvider};

struct Fixture {
    scorer: Arc<MockScorer>,
    sink: Arc<RecordingReportSink>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            scorer: Arc::new(MockScorer::new()),
            sink: Arc::new(RecordingReportSink::new()),
        }
    }

    fn coordinator(&self, bus: Arc<dyn MessageBus>, source: StaticSourceProvider) -> Coordinator {
        Coordinator::new(bus, Arc::new(source), self.scorer.clone(), self.sink.clone())
    }
}

#[tokio::test]
async fn test_full_run_consolidates_every_record() {
    let fixture = Fixture::new();
    fixture.scorer.set_score("worker1", 2).await;
    fixture.scorer.set_score("worker2", 9).await;
    let records = make_records(4);
    let coordinator = fixture.coordinator(
        Arc::new(ChannelMessageBus::new()),
        StaticSourceProvider::new(records.clone()),
    );

    let summary = coordinator.run(CancellationToken::new()).await.unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.dispatched, 4);
    assert_eq!(summary.records.len(), 4);
    for record in &records {
        let consolidated = summary
            .records
            .iter()
            .find(|r| r.correlation_id == record.correlation_id())
            .unwrap();
        assert_eq!(consolidated.consensus_score, 6);
    }

    let persisted = fixture.sink.persisted().await;
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].len(), 4);

    assert_eq!(summary.processors.len(), 2);
    let total: usize = summary.processors.iter().map(|(_, s)| s.processed).sum();
    assert_eq!(total, 8);
}

#[tokio::test]
async fn test_duplicate_records_are_dispatched_once() {
    let fixture = Fixture::new();
    let record = make_record(0);
    let coordinator = fixture.coordinator(
        Arc::new(ChannelMessageBus::new()),
        StaticSourceProvider::new(vec![record.clone(), record.clone(), make_record(1)]),
    );

    let summary = coordinator.run(CancellationToken::new()).await.unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.dispatched, 2);
    assert_eq!(summary.records.len(), 2);
}

#[tokio::test]
async fn test_empty_batch_exits_early() {
    let fixture = Fixture::new();
    let coordinator = fixture.coordinator(
        Arc::new(ChannelMessageBus::new()),
        StaticSourceProvider::new(Vec::new()),
    );

    let summary = coordinator.run(CancellationToken::new()).await.unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.dispatched, 0);
    assert!(fixture.sink.persisted().await.is_empty());
    assert_eq!(fixture.scorer.call_count(), 0);
}

#[tokio::test]
async fn test_source_failure_aborts_run() {
    let fixture = Fixture::new();
    let coordinator = fixture.coordinator(
        Arc::new(ChannelMessageBus::new()),
        StaticSourceProvider::failing(),
    );

    let result = coordinator.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(RunError::Source(_))));
}

#[tokio::test]
async fn test_dispatch_failure_aborts_run() {
    let fixture = Fixture::new();
    let bus = Arc::new(MockMessageBus::new());
    bus.set_fail_on_publish(true).await;
    let coordinator = fixture.coordinator(bus, StaticSourceProvider::new(make_records(2)));

    let result = coordinator.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(RunError::Dispatch(BusError::Connection(_)))));
    assert!(fixture.sink.persisted().await.is_empty());
}

#[tokio::test]
async fn test_cancelled_before_dispatch() {
    let fixture = Fixture::new();
    let coordinator = fixture.coordinator(
        Arc::new(ChannelMessageBus::new()),
        StaticSourceProvider::new(make_records(2)),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = coordinator.run(cancel).await.unwrap();

    assert_eq!(summary.outcome, AggregationOutcome::Cancelled);
    assert!(fixture.sink.persisted().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unscorable_record_yields_partial_run() {
    let fixture = Fixture::new();
    fixture.scorer.fail_on_title("Post 2").await;
    let coordinator = fixture
        .coordinator(
            Arc::new(ChannelMessageBus::new()),
            StaticSourceProvider::new(make_records(3)),
        )
        .with_aggregation(AggregationConfig {
            budget_multiplier: 2,
            idle_timeout_secs: Some(10),
        });

    let summary = coordinator.run(CancellationToken::new()).await.unwrap();

    assert!(matches!(
        summary.outcome,
        AggregationOutcome::Partial { missing: 1, .. }
    ));
    assert_eq!(summary.records.len(), 2);
    let failed: usize = summary.processors.iter().map(|(_, s)| s.failed).sum();
    assert_eq!(failed, 2);
    assert_eq!(fixture.sink.persisted().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_default_config_ends_run_when_a_result_never_arrives() {
    let fixture = Fixture::new();
    fixture.scorer.fail_on_title("Post 2").await;
    let coordinator = fixture.coordinator(
        Arc::new(ChannelMessageBus::new()),
        StaticSourceProvider::new(make_records(3)),
    );
    let started = tokio::time::Instant::now();

    let summary = tokio::time::timeout(
        Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS * 2),
        coordinator.run(CancellationToken::new()),
    )
    .await
    .expect("run must end without explicit aggregation settings")
    .unwrap();

    assert_eq!(
        summary.outcome,
        AggregationOutcome::Partial {
            missing: 1,
            reason: PartialReason::IdleTimeout,
        }
    );
    assert_eq!(summary.records.len(), 2);
    assert!(started.elapsed() >= Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS));
    assert_eq!(fixture.sink.persisted().await.len(), 1);
}

#[test]
fn test_dedup_keeps_first_occurrence_in_order() {
    let mut duplicate = make_record(0);
    duplicate.title = "Same URL, different title".to_string();
    let records = vec![make_record(0), make_record(1), duplicate, make_record(2)];

    let deduped = dedup_records(records);

    let titles: Vec<&str> = deduped.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Post 0", "Post 1", "Post 2"]);
}
