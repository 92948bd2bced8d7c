//! Source-record providers.
//!
//! A `SourceProvider` returns the batch of records a run dispatches. The
//! pipeline treats the batch as opaque and already filtered.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::message::SourceRecord;

mod file;
mod http;
mod week;

pub use file::FileSourceProvider;
pub use http::HttpSourceProvider;
pub use week::{week_label, week_start};

/// Result type for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Errors raised while retrieving source records.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to read records: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode records: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Page did not contain embedded post data")]
    MissingData,

    #[error("Source configuration error: {0}")]
    Config(String),
}

/// Supplies the batch of records for one run.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_current_batch(&self) -> Result<Vec<SourceRecord>>;
}

/// Default community page the HTTP provider reads.
pub const DEFAULT_BASE_URL: &str = "https://techcommunity.microsoft.com/category/azure-ai-foundry";

/// Source provider configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Page to scrape for records.
    pub base_url: String,
    /// Maximum number of records per batch.
    pub page_size: usize,
    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
    /// Read records from this JSON file instead of over HTTP.
    pub records_file: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: 50,
            timeout_secs: 30,
            records_file: None,
        }
    }
}

/// Build the provider selected by configuration.
pub fn init_source_provider(config: &SourceConfig) -> Result<Arc<dyn SourceProvider>> {
    match &config.records_file {
        Some(path) => Ok(Arc::new(FileSourceProvider::new(path.clone()))),
        None => Ok(Arc::new(HttpSourceProvider::new(config.clone())?)),
    }
}

/// Built-in batch used when the live source cannot be read.
pub fn sample_batch() -> Vec<SourceRecord> {
    let now = Utc::now();
    vec![
        SourceRecord {
            title: "Sample: Azure AI Foundry release".to_string(),
            url: "https://techcommunity.microsoft.com/sample1".to_string(),
            published_at: now - Duration::days(1),
            body: "Great release week with new features".to_string(),
            author: Some("azure-team".to_string()),
        },
        SourceRecord {
            title: "Sample: Troubleshooting prompt flow".to_string(),
            url: "https://techcommunity.microsoft.com/sample2".to_string(),
            published_at: now - Duration::days(2),
            body: "Encountered an issue configuring prompt flow. Need help!".to_string(),
            author: Some("community-member".to_string()),
        },
    ]
}
