use super::*;
use crate::test_utils::make_record;

async fn score_body(body: &str) -> ScoreResult {
    let mut record = make_record(0);
    record.body = body.to_string();
    KeywordScorer::new().score(&record, "worker1").await.unwrap()
}

#[tokio::test]
async fn test_neutral_body_scores_base() {
    let result = score_body("Release notes for this week.").await;
    assert_eq!(result.score, 5);
    assert_eq!(result.notes, "Neutral or mixed sentiment");
    assert_eq!(result.confidence, Some(0.5));
}

#[tokio::test]
async fn test_positive_keywords_raise_score() {
    let result = score_body("Great release week with new features").await;
    assert_eq!(result.score, 6);
    assert_eq!(result.notes, "Optimistic with minor concerns");
}

#[tokio::test]
async fn test_negative_keywords_lower_score() {
    let result = score_body("Encountered an issue configuring prompt flow. Need help!").await;
    assert_eq!(result.score, 4);
}

#[tokio::test]
async fn test_matching_is_case_insensitive() {
    let result = score_body("THANKS, this is AWESOME and Excellent").await;
    assert_eq!(result.score, 8);
    assert_eq!(result.notes, "Highly positive and solution oriented");
}

#[tokio::test]
async fn test_hits_are_capped_and_score_clamped() {
    let result = score_body(&"bug ".repeat(20)).await;
    assert_eq!(result.score, 1);
    assert_eq!(result.notes, "Negative experience reported");
    // Confidence uses uncapped hits but saturates at 1.
    assert_eq!(result.confidence, Some(1.0));
}

#[tokio::test]
async fn test_result_carries_record_identity() {
    let record = make_record(3);
    let result = KeywordScorer::new().score(&record, "worker2").await.unwrap();
    assert_eq!(result.correlation_id, record.correlation_id());
    assert_eq!(result.processor, "worker2");
}

#[test]
fn test_sentiment_bands() {
    assert_eq!(sentiment_band(10), "Highly positive and solution oriented");
    assert_eq!(sentiment_band(6), "Optimistic with minor concerns");
    assert_eq!(sentiment_band(4), "Neutral or mixed sentiment");
    assert_eq!(sentiment_band(2), "Frustrated and seeking help");
    assert_eq!(sentiment_band(1), "Negative experience reported");
}
