//! Run coordinator.
//!
//! Wires one run end to end: fetch the batch, start the aggregator and both
//! processor loops, dispatch, wait for aggregation, then stop the
//! processors. Only the fetch and the dispatch may fail the run.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregator::{AggregationOutcome, Aggregator};
use crate::bus::{BusError, MessageBus};
use crate::config::{AggregationConfig, ChannelsConfig};
use crate::dispatch::Dispatcher;
use crate::message::{ConsolidatedRecord, SourceRecord};
use crate::processor::{ProcessorLoop, ProcessorStats};
use crate::report::ReportSink;
use crate::scoring::Scorer;
use crate::source::{SourceError, SourceProvider};

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to fetch source records: {0}")]
    Source(#[from] SourceError),

    #[error("Failed to dispatch work: {0}")]
    Dispatch(#[source] BusError),

    #[error("Failed to start aggregation: {0}")]
    Aggregation(#[source] BusError),
}

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: AggregationOutcome,
    /// Distinct records dispatched.
    pub dispatched: usize,
    pub records: Vec<ConsolidatedRecord>,
    /// Per-processor counters, in dispatch route order.
    pub processors: Vec<(String, ProcessorStats)>,
}

impl RunSummary {
    fn empty() -> Self {
        Self {
            outcome: AggregationOutcome::Complete,
            dispatched: 0,
            records: Vec::new(),
            processors: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome == AggregationOutcome::Complete
    }
}

/// Owns the collaborators of a run.
pub struct Coordinator {
    bus: Arc<dyn MessageBus>,
    source: Arc<dyn SourceProvider>,
    scorer: Arc<dyn Scorer>,
    sink: Arc<dyn ReportSink>,
    channels: ChannelsConfig,
    aggregation: AggregationConfig,
}

impl Coordinator {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        source: Arc<dyn SourceProvider>,
        scorer: Arc<dyn Scorer>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            bus,
            source,
            scorer,
            sink,
            channels: ChannelsConfig::default(),
            aggregation: AggregationConfig::default(),
        }
    }

    pub fn with_channels(mut self, channels: ChannelsConfig) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationConfig) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Execute one run under `cancel`.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary, RunError> {
        let fetched = self.source.fetch_current_batch().await?;
        let records = dedup_records(fetched);
        info!(count = records.len(), "Fetched records for the current batch");

        if records.is_empty() {
            warn!("No records in the current batch, nothing to do");
            return Ok(RunSummary::empty());
        }

        // Everything below is torn down together once aggregation returns.
        let scope = cancel.child_token();
        let dispatcher = Dispatcher::new(Arc::clone(&self.bus), self.channels.clone());

        let expected = records.len();
        let budget = self.aggregation.budget_for(expected);
        let aggregator = Aggregator::new(
            Arc::clone(&self.bus),
            self.channels.aggregation.clone(),
            records.clone(),
        )
        .with_sink(Arc::clone(&self.sink))
        .with_idle_timeout(self.aggregation.idle_timeout());
        let aggregation_scope = scope.clone();
        let aggregation =
            tokio::spawn(async move { aggregator.run(expected, budget, aggregation_scope).await });

        let processors: Vec<_> = dispatcher
            .routes()
            .into_iter()
            .map(|(identity, channel)| {
                let processor = ProcessorLoop::new(
                    identity,
                    channel,
                    self.channels.aggregation.clone(),
                    Arc::clone(&self.bus),
                    Arc::clone(&self.scorer),
                );
                let processor_scope = scope.clone();
                let handle = tokio::spawn(async move { processor.run(processor_scope).await });
                (identity.to_string(), handle)
            })
            .collect();

        if let Err(e) = dispatcher.dispatch(&records, &cancel).await {
            scope.cancel();
            Self::join_processors(processors).await;
            let _ = aggregation.await;

            if matches!(e, BusError::Cancelled) {
                info!("Run cancelled during dispatch");
                return Ok(RunSummary {
                    outcome: AggregationOutcome::Cancelled,
                    ..RunSummary::empty()
                });
            }
            error!(error = %e, "Dispatch failed, aborting run");
            return Err(RunError::Dispatch(e));
        }

        let aggregated = aggregation.await;
        // Aggregation is over either way; the processors must stop.
        scope.cancel();
        let processors = Self::join_processors(processors).await;

        let aggregation = match aggregated {
            Ok(Ok(aggregation)) => aggregation,
            Ok(Err(e)) => return Err(RunError::Aggregation(e)),
            Err(e) => {
                return Err(RunError::Aggregation(BusError::Subscribe(format!(
                    "aggregator task failed: {e}"
                ))))
            }
        };

        info!(
            dispatched = expected,
            consolidated = aggregation.records.len(),
            outcome = ?aggregation.outcome,
            "Run finished"
        );

        Ok(RunSummary {
            outcome: aggregation.outcome,
            dispatched: expected,
            records: aggregation.records,
            processors,
        })
    }

    async fn join_processors(
        handles: Vec<(String, tokio::task::JoinHandle<crate::bus::Result<ProcessorStats>>)>,
    ) -> Vec<(String, ProcessorStats)> {
        let mut stats = Vec::with_capacity(handles.len());
        for (identity, handle) in handles {
            match tokio::time::timeout(PROCESSOR_STOP_TIMEOUT, handle).await {
                Ok(Ok(Ok(processed))) => stats.push((identity, processed)),
                Ok(Ok(Err(e))) => {
                    error!(processor = %identity, error = %e, "Processor failed to start");
                }
                Ok(Err(e)) => {
                    error!(processor = %identity, error = %e, "Processor task failed");
                }
                Err(_) => {
                    warn!(processor = %identity, "Processor did not stop in time");
                }
            }
        }
        stats
    }
}

/// Upper bound on waiting for a processor to wind down after cancellation.
const PROCESSOR_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Keep the first record per correlation id, preserving order.
fn dedup_records(records: Vec<SourceRecord>) -> Vec<SourceRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| {
            let fresh = seen.insert(record.correlation_id());
            if !fresh {
                warn!(
                    title = %record.title,
                    url = %record.url,
                    "Dropping record with duplicate correlation id"
                );
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests;
