//! Retry configuration and backoff policy for queued requests.

use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts allowed before a request is rejected.
    pub max_retries: u32,
    /// Delay before the first re-attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    #[must_use]
    pub fn with_initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff = duration;
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff = duration;
        self
    }

    /// Delay owed after `failed_attempts` failures:
    /// `min(initial * 2^(failed_attempts - 1), max)`, zero before any failure.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32
            .checked_shl(failed_attempts - 1)
            .unwrap_or(u32::MAX);
        std::cmp::min(
            self.initial_backoff.saturating_mul(factor),
            self.max_backoff,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry(Duration),
    DontRetry,
}

/// Per-request attempt bookkeeping.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub attempts: u32,
    config: RetryConfig,
}

impl RetryState {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            attempts: 0,
            config,
        }
    }

    /// Count a failed attempt and decide what happens next.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.attempts += 1;
        if self.attempts >= self.config.max_retries {
            return RetryDecision::DontRetry;
        }
        RetryDecision::Retry(self.config.delay_for(self.attempts))
    }

    /// Backoff the sweep must wait out since the last try.
    pub fn current_delay(&self) -> Duration {
        self.config.delay_for(self.attempts)
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}
