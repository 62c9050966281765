use std::time::Duration;

/// Exponential backoff for oracle transport failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), or None once retries are exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let exp = 1u64 << attempt.min(30);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        Some(Duration::from_millis(delay))
    }

    /// 429 and 5xx are worth retrying; other statuses are caller errors.
    pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }
}
