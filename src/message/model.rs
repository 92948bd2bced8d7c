//! Records exchanged between the dispatcher, processors and aggregator.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tandem UUID namespace derived from DNS-based UUIDv5.
///
/// Used for deterministic correlation ids: the same source record always maps
/// to the same id, across runs and across processes.
pub static TANDEM_UUID_NAMESPACE: LazyLock<uuid::Uuid> =
    LazyLock::new(|| uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_DNS, b"tandem.dev"));

/// Derive a correlation id from a record's identity.
///
/// The URL identifies a record; records without one fall back to their title.
pub fn correlation_id_for(url: &str, title: &str) -> String {
    let identity = if url.trim().is_empty() { title } else { url };
    uuid::Uuid::new_v5(&TANDEM_UUID_NAMESPACE, identity.as_bytes())
        .simple()
        .to_string()
}

/// One record to be scored, as delivered by the source provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
}

impl SourceRecord {
    pub fn correlation_id(&self) -> String {
        correlation_id_for(&self.url, &self.title)
    }
}

/// Unit of work addressed to a single processor.
///
/// `record` is optional on the wire: a payload that arrives without one is
/// structurally incomplete and is skipped by the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(default)]
    pub record: Option<SourceRecord>,
    pub processor: String,
    pub dispatched_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(record: SourceRecord, processor: impl Into<String>) -> Self {
        Self {
            record: Some(record),
            processor: processor.into(),
            dispatched_at: Utc::now(),
        }
    }
}

/// Output of one processor for one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub correlation_id: String,
    pub processor: String,
    pub score: i32,
    pub notes: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub completed_at: DateTime<Utc>,
}

/// Closed set of payload kinds carried by envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Payload {
    WorkItem(WorkItem),
    Score(ScoreResult),
}

impl Payload {
    /// Short name of the payload kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::WorkItem(_) => "work_item",
            Payload::Score(_) => "score",
        }
    }
}

/// One reconciled record per correlation id, produced by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedRecord {
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub author: Option<String>,
    /// Score from the processor that completed first.
    pub first_score: i32,
    /// Score from the processor that completed second.
    pub second_score: i32,
    pub consensus_score: i32,
    pub notes: String,
    pub comment: String,
    pub correlation_id: String,
}
