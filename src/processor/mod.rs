//! Processor loop.
//!
//! Reads work items from one channel, scores each record and publishes the
//! result to the aggregation channel under the inbound correlation id.
//!
//! States: `Idle` while waiting for a message, `Processing` while scoring
//! and publishing one item, `ShuttingDown` once cancelled. One bad item
//! (missing record, scoring failure, publish failure) is logged and skipped;
//! it never ends the loop.

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, MessageBus, MessageBusExt, Result};
use crate::message::{Envelope, Payload};
use crate::scoring::Scorer;
use crate::utils::retry::connection_backoff;

/// Lifecycle state of a processor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Processing,
    ShuttingDown,
}

/// Per-run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Results published.
    pub processed: usize,
    /// Messages without a record to score, or of the wrong kind.
    pub skipped: usize,
    /// Items whose scoring or result publish failed.
    pub failed: usize,
}

enum ItemOutcome {
    Published,
    Skipped,
    Failed,
}

/// One scoring worker bound to an input channel.
pub struct ProcessorLoop {
    identity: String,
    input: String,
    output: String,
    bus: Arc<dyn MessageBus>,
    scorer: Arc<dyn Scorer>,
    state: watch::Sender<ProcessorState>,
}

impl ProcessorLoop {
    pub fn new(
        identity: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
        bus: Arc<dyn MessageBus>,
        scorer: Arc<dyn Scorer>,
    ) -> Self {
        let (state, _) = watch::channel(ProcessorState::Idle);
        Self {
            identity: identity.into(),
            input: input.into(),
            output: output.into(),
            bus,
            scorer,
            state,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ProcessorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ProcessorState) {
        self.state.send_replace(state);
    }

    /// Run until `cancel` fires.
    ///
    /// Only a subscription that cannot be established is an error;
    /// cancellation returns the counters accumulated so far.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ProcessorStats> {
        let mut stream = (|| async {
            self.bus
                .subscribe::<Envelope<Payload>>(&self.input, cancel.child_token())
                .await
        })
        .retry(connection_backoff())
        .when(|e: &BusError| e.is_transient() && !cancel.is_cancelled())
        .notify(|err: &BusError, dur: Duration| {
            warn!(processor = %self.identity, error = %err, delay = ?dur, "Subscribe failed, retrying");
        })
        .await?;

        info!(processor = %self.identity, channel = %self.input, "Processor started");
        let mut stats = ProcessorStats::default();

        let acknowledge_last = loop {
            self.set_state(ProcessorState::Idle);

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break true,
                envelope = stream.next() => envelope,
            };
            let Some(envelope) = next else { break false };

            // Received but not started: leave it for redelivery.
            if cancel.is_cancelled() {
                debug!(
                    processor = %self.identity,
                    correlation_id = %envelope.correlation_id(),
                    "Cancelled before scoring, dropping item"
                );
                break false;
            }

            self.set_state(ProcessorState::Processing);
            match self.handle(envelope).await {
                ItemOutcome::Published => stats.processed += 1,
                ItemOutcome::Skipped => stats.skipped += 1,
                ItemOutcome::Failed => stats.failed += 1,
            }
        };

        self.set_state(ProcessorState::ShuttingDown);
        if acknowledge_last {
            // The subscription is cancelled too; one more poll only settles
            // the acknowledgement of the item handled last.
            let _ = stream.next().await;
        }
        info!(
            processor = %self.identity,
            processed = stats.processed,
            skipped = stats.skipped,
            failed = stats.failed,
            "Processor stopped"
        );
        Ok(stats)
    }

    async fn handle(&self, envelope: Envelope<Payload>) -> ItemOutcome {
        let correlation_id = envelope.correlation_id().to_string();

        let record = match envelope.payload() {
            Payload::WorkItem(item) => match &item.record {
                Some(record) => record,
                None => {
                    warn!(
                        processor = %self.identity,
                        correlation_id = %correlation_id,
                        "Received an empty work item"
                    );
                    return ItemOutcome::Skipped;
                }
            },
            other => {
                warn!(
                    processor = %self.identity,
                    kind = other.kind(),
                    correlation_id = %correlation_id,
                    "Unexpected payload kind on work channel"
                );
                return ItemOutcome::Skipped;
            }
        };

        let mut result = match self.scorer.score(record, &self.identity).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    processor = %self.identity,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Failed to score work item"
                );
                return ItemOutcome::Failed;
            }
        };

        if result.correlation_id != correlation_id {
            warn!(
                processor = %self.identity,
                expected = %correlation_id,
                actual = %result.correlation_id,
                "Scorer returned a foreign correlation id, overriding"
            );
            result.correlation_id = correlation_id.clone();
        }

        let title = record.title.clone();
        let score = result.score;
        let published = match envelope.reply(self.identity.as_str(), self.output.as_str(), Payload::Score(result)) {
            Ok(outbound) => self.bus.publish_envelope(&outbound).await,
            Err(e) => Err(e.into()),
        };

        match published {
            Ok(()) => {
                info!(
                    processor = %self.identity,
                    title = %title,
                    score,
                    correlation_id = %correlation_id,
                    "Completed scoring"
                );
                ItemOutcome::Published
            }
            Err(e) => {
                error!(
                    processor = %self.identity,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Failed to publish result"
                );
                ItemOutcome::Failed
            }
        }
    }
}
