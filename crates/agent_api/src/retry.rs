use std::time::Duration;

use crate::error::{classify_error, ErrorCategory};

/// Maximum retry attempts after an initial request attempt.
pub const MAX_RETRIES: u32 = 3;
/// Base delay before the first retry.
pub const BASE_DELAY_MS: u64 = 1000;

/// Retry policy for failures observed before any streaming began.
///
/// Retries transient statuses and transient error text; never retries when
/// the message classifies as user-action (credits, quota) since nothing will
/// change until the user intervenes.
pub fn is_retryable_http_error(status: u16, error_text: &str) -> bool {
    let classification = classify_error(error_text);
    if classification.category == ErrorCategory::UserAction {
        return false;
    }

    matches!(status, 429 | 500 | 502 | 503 | 504) || classification.retryable
}

/// Compute exponential backoff delay for a retry attempt.
pub fn retry_delay_ms(attempt: u32) -> Duration {
    let exponent = attempt.min(30);
    Duration::from_millis(BASE_DELAY_MS * 2u64.saturating_pow(exponent))
}
