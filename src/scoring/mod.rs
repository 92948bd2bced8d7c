//! Scoring collaborator.
//!
//! A `Scorer` turns one source record into a `ScoreResult`. Processors call
//! it once per work item and treat any error as a per-item failure.

use async_trait::async_trait;
use chrono::Utc;

use crate::message::{ScoreResult, SourceRecord};

/// Result type for scoring operations.
pub type Result<T> = std::result::Result<T, ScoreError>;

/// Errors raised by a scorer for a single record.
#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("Record has no content to score: {0}")]
    EmptyRecord(String),

    #[error("Scoring backend failed: {0}")]
    Backend(String),
}

/// Pluggable scoring function.
///
/// Must not depend on or mutate pipeline state; the same record may be scored
/// more than once under at-least-once delivery.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, record: &SourceRecord, processor: &str) -> Result<ScoreResult>;
}

const POSITIVE_KEYWORDS: &[&str] = &[
    "great", "thanks", "awesome", "excellent", "love", "helpful", "success", "resolved",
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "issue", "problem", "fail", "error", "bug", "blocked", "concern", "confused",
];

/// Lowest score a scorer may produce.
pub const MIN_SCORE: i32 = 1;
/// Highest score a scorer may produce.
pub const MAX_SCORE: i32 = 10;

const BASE_SCORE: i32 = 5;
/// Keyword hits beyond this count do not move the score further.
const MAX_HITS: usize = 5;

/// Offline keyword heuristic.
///
/// Starts at 5, adds one per positive keyword hit and subtracts one per
/// negative hit (each capped at 5), then clamps to 1..=10. Matching is
/// case-insensitive and counts substring occurrences.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordScorer;

impl KeywordScorer {
    pub fn new() -> Self {
        Self
    }

    fn count_hits(text: &str, keywords: &[&str]) -> usize {
        keywords.iter().map(|k| text.matches(k).count()).sum()
    }
}

/// Human-readable label for a score.
pub fn sentiment_band(score: i32) -> &'static str {
    match score {
        s if s >= 8 => "Highly positive and solution oriented",
        s if s >= 6 => "Optimistic with minor concerns",
        s if s >= 4 => "Neutral or mixed sentiment",
        s if s >= 2 => "Frustrated and seeking help",
        _ => "Negative experience reported",
    }
}

#[async_trait]
impl Scorer for KeywordScorer {
    async fn score(&self, record: &SourceRecord, processor: &str) -> Result<ScoreResult> {
        let text = record.body.to_lowercase();
        let positive = Self::count_hits(&text, POSITIVE_KEYWORDS);
        let negative = Self::count_hits(&text, NEGATIVE_KEYWORDS);

        let score = (BASE_SCORE + positive.min(MAX_HITS) as i32 - negative.min(MAX_HITS) as i32)
            .clamp(MIN_SCORE, MAX_SCORE);
        let confidence = (0.5 + 0.05 * positive.abs_diff(negative) as f64).min(1.0);

        Ok(ScoreResult {
            correlation_id: record.correlation_id(),
            processor: processor.to_string(),
            score,
            notes: sentiment_band(score).to_string(),
            confidence: Some(confidence),
            completed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests;
