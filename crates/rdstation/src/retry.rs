use std::time::Duration;

use reqwest::StatusCode;

/// Upper bound applied to a server-supplied `Retry-After`.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// A numeric `Retry-After` wins; an HTTP-date or garbage value falls back to
    /// `base * 2^attempt + jitter * attempt`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<&str>) -> Duration {
        if let Some(delay) = retry_after.and_then(parse_retry_after) {
            return delay;
        }

        self.backoff_base
            .saturating_mul(2_u32.saturating_pow(attempt))
            .saturating_add(self.jitter.saturating_mul(attempt))
    }
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds = value.trim().parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds.min(MAX_RETRY_AFTER.as_secs_f64())))
}
