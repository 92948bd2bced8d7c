//! Monday-based week window.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

/// First day (Monday) of the week containing `now`.
pub fn week_start(now: DateTime<Utc>) -> NaiveDate {
    let date = now.date_naive();
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Label for the week containing `now`, e.g. `2024-03-04 to 2024-03-10`.
pub fn week_label(now: DateTime<Utc>) -> String {
    let start = week_start(now);
    let end = start + Duration::days(6);
    format!("{} to {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
}
