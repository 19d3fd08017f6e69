//! Retry utilities: backoff builders and retryable status classification.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::ExponentialBuilder;
use reqwest::StatusCode;

/// Backoff for retries within a single webhook delivery.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 3
/// - Jitter enabled
///
/// Anything still failing after that is left unsent for the bus sweep.
pub fn delivery_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(3)
        .with_jitter()
}

/// Whether an HTTP response status is worth retrying.
///
/// Retryable: `429 Too Many Requests` and every 5xx. Other 4xx responses
/// will not change on retry.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
