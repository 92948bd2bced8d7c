//! Records read from a local JSON file.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use super::{Result, SourceProvider};
use crate::message::SourceRecord;

/// Reads a JSON array of records. No filtering is applied.
pub struct FileSourceProvider {
    path: PathBuf,
}

impl FileSourceProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SourceProvider for FileSourceProvider {
    async fn fetch_current_batch(&self) -> Result<Vec<SourceRecord>> {
        let contents = tokio::fs::read(&self.path).await?;
        let records: Vec<SourceRecord> = serde_json::from_slice(&contents)?;
        info!(path = %self.path.display(), count = records.len(), "Loaded records from file");
        Ok(records)
    }
}
