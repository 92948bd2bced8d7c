//! Shared utilities for integration tests.
//!
//! Provides record builders and in-memory collaborators for running the
//! pipeline without network access.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use tokio::sync::RwLock;

use tandem::message::{ConsolidatedRecord, ScoreResult, SourceRecord};
use tandem::report::{self, ReportSink};
use tandem::scoring::{self, ScoreError, Scorer};
use tandem::source::{self, SourceProvider};

/// Build `count` distinct source records.
pub fn make_records(count: usize) -> Vec<SourceRecord> {
    (0..count)
        .map(|i| SourceRecord {
            title: format!("Integration post {i}"),
            url: format!("https://example.com/integration/{i}"),
            published_at: Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap() + Duration::hours(i as i64),
            body: format!("Body {i}"),
            author: None,
        })
        .collect()
}

/// Source provider returning a fixed batch.
pub struct StaticSource(pub Vec<SourceRecord>);

#[async_trait]
impl SourceProvider for StaticSource {
    async fn fetch_current_batch(&self) -> source::Result<Vec<SourceRecord>> {
        Ok(self.0.clone())
    }
}

/// Scorer with fixed per-processor scores that can refuse chosen records.
#[derive(Default)]
pub struct TableScorer {
    scores: HashMap<String, i32>,
    refuse: HashSet<String>,
    calls: AtomicUsize,
}

impl TableScorer {
    pub fn new(scores: &[(&str, i32)]) -> Self {
        Self {
            scores: scores.iter().map(|(p, s)| (p.to_string(), *s)).collect(),
            ..Self::default()
        }
    }

    /// Fail every attempt to score the record with this title.
    pub fn refusing(mut self, title: &str) -> Self {
        self.refuse.insert(title.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scorer for TableScorer {
    async fn score(&self, record: &SourceRecord, processor: &str) -> scoring::Result<ScoreResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse.contains(&record.title) {
            return Err(ScoreError::Backend(format!("refused {}", record.title)));
        }
        Ok(ScoreResult {
            correlation_id: record.correlation_id(),
            processor: processor.to_string(),
            score: self.scores.get(processor).copied().unwrap_or(5),
            notes: format!("scored by {processor}"),
            confidence: Some(0.5),
            completed_at: Utc::now(),
        })
    }
}

/// Report sink keeping every persisted batch in memory.
#[derive(Default)]
pub struct MemorySink {
    batches: RwLock<Vec<Vec<ConsolidatedRecord>>>,
}

impl MemorySink {
    pub async fn batches(&self) -> Vec<Vec<ConsolidatedRecord>> {
        self.batches.read().await.clone()
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    async fn persist(&self, records: &[ConsolidatedRecord]) -> report::Result<()> {
        self.batches.write().await.push(records.to_vec());
        Ok(())
    }
}
