use std::time::Duration;

use rand::Rng;

/// Retry policy for one logical fetch.
///
/// Delay before retry `k` (0-indexed):
/// `min(base_delay * 2^k, max_delay) + uniform[0, jitter)`.
/// Restricted targets double that and never wait less than
/// `restricted_min_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_backoff: bool,
    /// Upper bound (exclusive) of the random jitter added to every delay.
    pub jitter: Duration,
    pub restricted_min_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8000),
            exponential_backoff: true,
            jitter: Duration::from_millis(1000),
            restricted_min_delay: Duration::from_millis(3000),
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_restricted_min_delay(mut self, min: Duration) -> Self {
        self.restricted_min_delay = min;
        self
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Deterministic part of the delay before retry `attempt`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let delay = if self.exponential_backoff {
            self.base_delay
                .saturating_mul(2u32.saturating_pow(attempt))
        } else {
            self.base_delay
        };
        std::cmp::min(delay, self.max_delay)
    }

    /// Full delay before retry `attempt`, jitter and restricted-site pacing included.
    pub fn delay_for_attempt(&self, attempt: u32, restricted: bool) -> Duration {
        let delay = self.backoff_for_attempt(attempt) + random_jitter(self.jitter);
        if restricted {
            std::cmp::max(delay.saturating_mul(2), self.restricted_min_delay)
        } else {
            delay
        }
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}
