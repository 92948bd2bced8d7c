//! Retry utilities: backoff builders.
//!
//! Uses `backon` for exponential backoff with jitter. Provides standard
//! backoff configurations for transport publishes and queue setup.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff for publishing a message to a transport.
///
/// - Min delay: 50ms
/// - Max delay: 2s
/// - Max attempts: 5
/// - Jitter enabled
pub fn publish_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(5)
        .with_jitter()
}

/// Backoff for connecting to a queue service or creating queues.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}
