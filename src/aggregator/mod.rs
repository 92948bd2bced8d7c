//! Fan-in aggregator.
//!
//! Subscribes to the aggregation channel, buckets results by correlation id
//! and consolidates each bucket once both processors reported. The run ends
//! when every dispatched record is consolidated, when the result budget is
//! used up (partial), after an optional idle timeout (partial), or on
//! cancellation.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{MessageBus, MessageBusExt, Result};
use crate::message::{ConsolidatedRecord, Envelope, Payload, SourceRecord};
use crate::report::ReportSink;

mod consensus;
mod ledger;

pub use consensus::{consensus, Consensus, CONSISTENT_COMMENT, HIGH_DISAGREEMENT};
pub use ledger::{DiscardReason, Ledger, LedgerStatus, Observation, PAIR};

/// Why an aggregation stopped short of full completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialReason {
    /// The result budget was used up.
    BudgetExhausted,
    /// No result arrived within the idle timeout.
    IdleTimeout,
}

/// How an aggregation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationOutcome {
    /// Every dispatched record was consolidated.
    Complete,
    /// Degraded success: `missing` records were never paired.
    Partial { missing: usize, reason: PartialReason },
    /// Stopped by the cancellation token; not a failure.
    Cancelled,
}

/// Output of one aggregation run.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub outcome: AggregationOutcome,
    pub records: Vec<ConsolidatedRecord>,
    /// Results counted toward the budget.
    pub received: usize,
}

enum Next {
    Message(Envelope<Payload>),
    Idle,
    Closed,
}

/// Consolidates processor results for one dispatched batch.
pub struct Aggregator {
    bus: Arc<dyn MessageBus>,
    channel: String,
    records: Vec<SourceRecord>,
    sink: Option<Arc<dyn ReportSink>>,
    idle_timeout: Option<Duration>,
}

impl Aggregator {
    /// `records` is the full dispatched batch; results for any other
    /// correlation id are discarded.
    pub fn new(
        bus: Arc<dyn MessageBus>,
        channel: impl Into<String>,
        records: Vec<SourceRecord>,
    ) -> Self {
        Self {
            bus,
            channel: channel.into(),
            records,
            sink: None,
            idle_timeout: None,
        }
    }

    /// Persist the output through `sink` once the run terminates.
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Aggregate until `expected` records are consolidated or `budget`
    /// results were counted, whichever comes first.
    ///
    /// The sink is called exactly once unless the run is cancelled. Only a
    /// failure to subscribe is an error.
    pub async fn run(
        &self,
        expected: usize,
        budget: usize,
        cancel: CancellationToken,
    ) -> Result<Aggregation> {
        let subscription = cancel.child_token();
        let mut stream = self
            .bus
            .subscribe::<Envelope<Payload>>(&self.channel, subscription.clone())
            .await?;
        let mut ledger = Ledger::new(&self.records, expected, budget);

        info!(
            channel = %self.channel,
            expected,
            budget,
            "Aggregator started"
        );

        let outcome = loop {
            match ledger.status() {
                LedgerStatus::Complete => break AggregationOutcome::Complete,
                LedgerStatus::Exhausted => {
                    break AggregationOutcome::Partial {
                        missing: ledger.missing(),
                        reason: PartialReason::BudgetExhausted,
                    }
                }
                LedgerStatus::Open => {}
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Next::Closed,
                next = self.next_message(&mut stream) => next,
            };

            match next {
                Next::Message(envelope) => self.observe(&mut ledger, envelope),
                Next::Idle => {
                    break AggregationOutcome::Partial {
                        missing: ledger.missing(),
                        reason: PartialReason::IdleTimeout,
                    }
                }
                Next::Closed => break AggregationOutcome::Cancelled,
            }
        };

        // Every observed message is fully handled; settle the last one's
        // acknowledgement before the subscription goes away.
        subscription.cancel();
        let _ = stream.next().await;

        let received = ledger.received();
        let records = ledger.into_output();
        match outcome {
            AggregationOutcome::Complete => {
                info!(consolidated = records.len(), received, "Aggregation complete");
            }
            AggregationOutcome::Partial { missing, reason } => {
                warn!(
                    consolidated = records.len(),
                    missing,
                    received,
                    reason = ?reason,
                    "Aggregation ended before every record was paired"
                );
            }
            AggregationOutcome::Cancelled => {
                info!(consolidated = records.len(), received, "Aggregation cancelled");
            }
        }

        if outcome != AggregationOutcome::Cancelled {
            self.persist(&records).await;
        }

        Ok(Aggregation {
            outcome,
            records,
            received,
        })
    }

    async fn next_message(&self, stream: &mut BoxStream<'static, Envelope<Payload>>) -> Next {
        let next = match self.idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, stream.next()).await {
                Ok(next) => next,
                Err(_) => return Next::Idle,
            },
            None => stream.next().await,
        };
        next.map_or(Next::Closed, Next::Message)
    }

    fn observe(&self, ledger: &mut Ledger, envelope: Envelope<Payload>) {
        let result = match envelope.into_payload() {
            Payload::Score(result) => result,
            other => {
                warn!(kind = other.kind(), "Unexpected payload kind on aggregation channel");
                return;
            }
        };

        let processor = result.processor.clone();
        let correlation_id = result.correlation_id.clone();
        let (observation, _) = ledger.observe(result);

        match observation {
            Observation::Accumulated { count } => {
                info!(
                    correlation_id = %correlation_id,
                    processor = %processor,
                    "Observed result {}/{}",
                    count,
                    PAIR
                );
            }
            Observation::Consolidated { score, .. } => {
                info!(
                    correlation_id = %correlation_id,
                    processor = %processor,
                    score,
                    consolidated = ledger.output().len(),
                    "Consolidated record"
                );
            }
            Observation::Discarded(reason) => {
                warn!(
                    correlation_id = %correlation_id,
                    processor = %processor,
                    reason = ?reason,
                    "Discarding result"
                );
            }
        }
    }

    async fn persist(&self, records: &[ConsolidatedRecord]) {
        let Some(sink) = &self.sink else { return };
        if let Err(e) = sink.persist(records).await {
            error!(error = %e, records = records.len(), "Failed to persist report");
        }
    }
}
