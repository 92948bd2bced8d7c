//! Test utilities and mock implementations.
//!
//! Mock collaborators for exercising the pipeline without network access or
//! a filesystem.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use tokio::sync::RwLock;

use crate::message::{ConsolidatedRecord, ScoreResult, SourceRecord};
use crate::report::{self, ReportError, ReportSink};
use crate::scoring::{self, ScoreError, Scorer};
use crate::source::{self, SourceError, SourceProvider};

/// Build a distinct source record.
pub fn make_record(index: usize) -> SourceRecord {
    SourceRecord {
        title: format!("Post {index}"),
        url: format!("https://example.com/posts/{index}"),
        published_at: Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap() + Duration::minutes(index as i64),
        body: format!("Body of post {index}"),
        author: Some(format!("author-{index}")),
    }
}

/// Build `count` distinct source records.
pub fn make_records(count: usize) -> Vec<SourceRecord> {
    (0..count).map(make_record).collect()
}

/// Build a score result for a record.
pub fn make_score(record: &SourceRecord, processor: &str, score: i32) -> ScoreResult {
    ScoreResult {
        correlation_id: record.correlation_id(),
        processor: processor.to_string(),
        score,
        notes: format!("{processor} notes"),
        confidence: None,
        completed_at: Utc::now(),
    }
}

/// Mock scorer with per-processor fixed scores.
#[derive(Default)]
pub struct MockScorer {
    scores: RwLock<HashMap<String, i32>>,
    fail_titles: RwLock<HashSet<String>>,
    calls: AtomicUsize,
}

impl MockScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score every record from `processor` with `score` (default 5).
    pub async fn set_score(&self, processor: &str, score: i32) {
        self.scores.write().await.insert(processor.to_string(), score);
    }

    /// Fail scoring for records with this title.
    pub async fn fail_on_title(&self, title: &str) {
        self.fail_titles.write().await.insert(title.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scorer for MockScorer {
    async fn score(&self, record: &SourceRecord, processor: &str) -> scoring::Result<ScoreResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_titles.read().await.contains(&record.title) {
            return Err(ScoreError::Backend(format!("Mock failure for {}", record.title)));
        }
        let score = self.scores.read().await.get(processor).copied().unwrap_or(5);
        Ok(make_score(record, processor, score))
    }
}

/// Report sink that records every persisted batch.
#[derive(Default)]
pub struct RecordingReportSink {
    persisted: RwLock<Vec<Vec<ConsolidatedRecord>>>,
    fail_on_persist: RwLock<bool>,
}

impl RecordingReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_persist(&self, fail: bool) {
        *self.fail_on_persist.write().await = fail;
    }

    /// Every batch handed to `persist`, in call order.
    pub async fn persisted(&self) -> Vec<Vec<ConsolidatedRecord>> {
        self.persisted.read().await.clone()
    }
}

#[async_trait]
impl ReportSink for RecordingReportSink {
    async fn persist(&self, records: &[ConsolidatedRecord]) -> report::Result<()> {
        self.persisted.write().await.push(records.to_vec());
        if *self.fail_on_persist.read().await {
            return Err(ReportError::Io(std::io::Error::other("Mock persist failure")));
        }
        Ok(())
    }
}

/// Source provider returning a fixed batch.
#[derive(Default)]
pub struct StaticSourceProvider {
    records: Vec<SourceRecord>,
    fail: bool,
}

impl StaticSourceProvider {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self {
            records,
            fail: false,
        }
    }

    /// Provider whose fetch always fails.
    pub fn failing() -> Self {
        Self {
            records: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl SourceProvider for StaticSourceProvider {
    async fn fetch_current_batch(&self) -> source::Result<Vec<SourceRecord>> {
        if self.fail {
            return Err(SourceError::Config("Mock source failure".to_string()));
        }
        Ok(self.records.clone())
    }
}
