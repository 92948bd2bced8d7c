//! Consensus rule for two independent scores.

use crate::scoring::{MAX_SCORE, MIN_SCORE};

/// Deviation at or above which the processors are considered to disagree.
pub const HIGH_DISAGREEMENT: i32 = 3;

/// Comment used when both processors produced the same score.
pub const CONSISTENT_COMMENT: &str = "Scores consistent across processors.";

/// Reconciled score with its explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consensus {
    pub score: i32,
    pub deviation: i32,
    pub comment: String,
}

/// Combine two scores, given in completion order.
///
/// The mean is rounded half to even. Agreeing scores are clamped to the
/// score range; disagreeing ones keep the plain rounded mean. Deviations
/// beyond `i32::MAX` saturate.
pub fn consensus(first: i32, second: i32) -> Consensus {
    let deviation = i32::try_from(first.abs_diff(second)).unwrap_or(i32::MAX);
    let average = ((f64::from(first) + f64::from(second)) / 2.0).round_ties_even() as i32;

    let score = if deviation >= HIGH_DISAGREEMENT {
        average
    } else {
        average.clamp(MIN_SCORE, MAX_SCORE)
    };

    let comment = if deviation == 0 {
        CONSISTENT_COMMENT.to_string()
    } else {
        format!("Normalized scores by averaging due to deviation of {deviation}; final={score}.")
    };

    Consensus {
        score,
        deviation,
        comment,
    }
}
