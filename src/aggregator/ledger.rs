//! Bucket bookkeeping for the aggregator.
//!
//! The ledger is a plain state machine: every result goes through one
//! `observe` call that both updates the buckets and reports whether the run
//! may terminate, so completion and budget exhaustion are decided together.

use std::collections::{HashMap, HashSet};

use crate::message::{ConsolidatedRecord, ScoreResult, SourceRecord};
use crate::scoring::{MAX_SCORE, MIN_SCORE};

use super::consensus::consensus;

/// Results needed to complete one bucket.
pub const PAIR: usize = 2;

/// Why a result was not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No dispatched record carries this correlation id.
    UnknownCorrelation,
    /// The same processor already reported for this correlation id.
    Duplicate,
    /// The correlation id was already consolidated.
    AlreadyCompleted,
    /// The score lies outside the scoring range.
    OutOfRange,
}

/// Effect of observing one result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Added to its bucket; `count` results seen for the correlation id.
    Accumulated { count: usize },
    /// Completed its bucket and produced a consolidated record.
    Consolidated { correlation_id: String, score: i32 },
    Discarded(DiscardReason),
}

/// Whether the aggregation may stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStatus {
    Open,
    /// Every expected record was consolidated.
    Complete,
    /// The result budget was used up first.
    Exhausted,
}

/// Buckets of results keyed by correlation id.
pub struct Ledger {
    lookup: HashMap<String, SourceRecord>,
    buckets: HashMap<String, Vec<ScoreResult>>,
    completed: HashSet<String>,
    output: Vec<ConsolidatedRecord>,
    expected: usize,
    budget: usize,
    received: usize,
}

impl Ledger {
    pub fn new(records: &[SourceRecord], expected: usize, budget: usize) -> Self {
        let lookup = records
            .iter()
            .map(|r| (r.correlation_id(), r.clone()))
            .collect();
        Self {
            lookup,
            buckets: HashMap::new(),
            completed: HashSet::new(),
            output: Vec::with_capacity(expected),
            expected,
            budget,
            received: 0,
        }
    }

    /// Record one result and report the resulting status.
    pub fn observe(&mut self, result: ScoreResult) -> (Observation, LedgerStatus) {
        let observation = self.accept(result);
        (observation, self.status())
    }

    fn accept(&mut self, result: ScoreResult) -> Observation {
        let correlation_id = result.correlation_id.clone();
        let Some(record) = self.lookup.get(&correlation_id) else {
            return Observation::Discarded(DiscardReason::UnknownCorrelation);
        };
        if self.completed.contains(&correlation_id) {
            return Observation::Discarded(DiscardReason::AlreadyCompleted);
        }
        if !(MIN_SCORE..=MAX_SCORE).contains(&result.score) {
            return Observation::Discarded(DiscardReason::OutOfRange);
        }

        let bucket = self.buckets.entry(correlation_id.clone()).or_default();
        if bucket.iter().any(|r| r.processor == result.processor) {
            return Observation::Discarded(DiscardReason::Duplicate);
        }

        self.received += 1;
        bucket.push(result);
        if bucket.len() < PAIR {
            return Observation::Accumulated {
                count: bucket.len(),
            };
        }

        let pair = std::mem::take(bucket);
        self.buckets.remove(&correlation_id);
        let consolidated = consolidate(record, pair, &correlation_id);
        let score = consolidated.consensus_score;
        self.output.push(consolidated);
        self.completed.insert(correlation_id.clone());

        Observation::Consolidated {
            correlation_id,
            score,
        }
    }

    /// Complete wins over exhausted when both hold.
    pub fn status(&self) -> LedgerStatus {
        if self.output.len() >= self.expected {
            LedgerStatus::Complete
        } else if self.received >= self.budget {
            LedgerStatus::Exhausted
        } else {
            LedgerStatus::Open
        }
    }

    /// Results counted so far (discarded results excluded).
    pub fn received(&self) -> usize {
        self.received
    }

    /// Expected records not yet consolidated.
    pub fn missing(&self) -> usize {
        self.expected.saturating_sub(self.output.len())
    }

    pub fn output(&self) -> &[ConsolidatedRecord] {
        &self.output
    }

    pub fn into_output(self) -> Vec<ConsolidatedRecord> {
        self.output
    }
}

/// Order a completed pair by completion time and apply the consensus rule.
///
/// `pair` holds exactly `PAIR` results.
fn consolidate(
    record: &SourceRecord,
    mut pair: Vec<ScoreResult>,
    correlation_id: &str,
) -> ConsolidatedRecord {
    // Stable: equal timestamps keep arrival order.
    pair.sort_by_key(|r| r.completed_at);
    let (first, second) = (&pair[0], &pair[1]);
    let agreed = consensus(first.score, second.score);

    let notes = pair
        .iter()
        .map(|r| format!("{}:{}", r.processor, r.notes))
        .collect::<Vec<_>>()
        .join(" | ");

    ConsolidatedRecord {
        title: record.title.clone(),
        url: record.url.clone(),
        published_at: record.published_at,
        author: record.author.clone(),
        first_score: first.score,
        second_score: second.score,
        consensus_score: agreed.score,
        notes,
        comment: agreed.comment,
        correlation_id: correlation_id.to_string(),
    }
}
