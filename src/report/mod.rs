//! Report sink.
//!
//! The aggregator hands its consolidated records to a `ReportSink` once per
//! run. Sink failures are logged by the caller and never undo aggregation.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::ConsolidatedRecord;
use crate::source::week_label;

mod file;

pub use file::FileReportSink;

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

/// Errors raised while persisting a report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persists the output of one run.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn persist(&self, records: &[ConsolidatedRecord]) -> Result<()>;
}

/// Report sink configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Directory reports are written to (created if missing).
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
        }
    }
}

/// Weekly report document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Week covered, e.g. `2024-03-04 to 2024-03-10`.
    pub week: String,
    pub items: Vec<ConsolidatedRecord>,
    pub generated_at: DateTime<Utc>,
}

impl Report {
    pub fn new(items: Vec<ConsolidatedRecord>, generated_at: DateTime<Utc>) -> Self {
        Self {
            week: week_label(generated_at),
            items,
            generated_at,
        }
    }
}
