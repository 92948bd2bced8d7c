//! Records scraped from a community listing page.
//!
//! The page embeds its data as JSON in a `__NEXT_DATA__` script tag. Posts
//! live under `props.pageProps.dehydratedState.queries[].state.data.messages[]`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, info};

use super::{sample_batch, week_start, Result, SourceConfig, SourceError, SourceProvider};
use crate::message::SourceRecord;

const NEXT_DATA_MARKER: &str = "__NEXT_DATA__";

/// HTTP source provider.
///
/// Keeps posts published in the current week. Any retrieval or parse
/// failure is logged and answered with the built-in sample batch.
pub struct HttpSourceProvider {
    client: Client,
    config: SourceConfig,
}

impl HttpSourceProvider {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(SourceError::Config("source.base_url is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    async fn fetch_page(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.config.base_url)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }

    async fn fetch_posts(&self) -> Result<Vec<SourceRecord>> {
        let page = self.fetch_page().await?;
        let mut posts = parse_posts(&page).unwrap_or_else(|e| {
            debug!(error = %e, "Could not extract posts from page");
            Vec::new()
        });
        if posts.is_empty() {
            info!("Page contained no posts, using sample batch");
            posts = sample_batch();
        }

        let start = week_start(Utc::now());
        posts.retain(|p| p.published_at.date_naive() >= start);
        posts.truncate(self.config.page_size);
        Ok(posts)
    }
}

#[async_trait]
impl SourceProvider for HttpSourceProvider {
    async fn fetch_current_batch(&self) -> Result<Vec<SourceRecord>> {
        match self.fetch_posts().await {
            Ok(posts) => {
                info!(url = %self.config.base_url, count = posts.len(), "Fetched posts");
                Ok(posts)
            }
            Err(e) => {
                error!(
                    url = %self.config.base_url,
                    error = %e,
                    "Failed to read posts from source, returning sample batch"
                );
                Ok(sample_batch())
            }
        }
    }
}

/// Extract posts from the page's embedded `__NEXT_DATA__` JSON.
pub(crate) fn parse_posts(html: &str) -> Result<Vec<SourceRecord>> {
    let marker = html.find(NEXT_DATA_MARKER).ok_or(SourceError::MissingData)?;
    let rest = &html[marker..];
    let start = rest.find('{').ok_or(SourceError::MissingData)?;
    let end = rest[start..]
        .find("</script>")
        .ok_or(SourceError::MissingData)?;
    let data: Value = serde_json::from_str(&rest[start..start + end])?;

    let queries = data
        .pointer("/props/pageProps/dehydratedState/queries")
        .and_then(Value::as_array)
        .ok_or(SourceError::MissingData)?;

    Ok(queries
        .iter()
        .filter_map(|query| query.pointer("/state/data/messages").and_then(Value::as_array))
        .flatten()
        .filter_map(parse_message)
        .collect())
}

fn parse_message(item: &Value) -> Option<SourceRecord> {
    let text = |pointer: &str| item.pointer(pointer).and_then(Value::as_str);

    // Posts without a creation date cannot be placed in a week.
    let published_at = DateTime::<Utc>::from_timestamp_millis(item.get("createdDate")?.as_i64()?)?;

    Some(SourceRecord {
        title: text("/subject").unwrap_or("Untitled").to_string(),
        url: text("/messageLink").unwrap_or_default().to_string(),
        published_at,
        body: text("/body").unwrap_or_default().to_string(),
        author: text("/author/login").map(str::to_string),
    })
}
