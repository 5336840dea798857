//! Exponential retry backoff

use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Backoff state for one write call.
///
/// Starts with no prior attempts, so the first try is immediate. After that attempt
/// `n` (counting from zero) waits `min(base * 2^n, max)`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    prior_attempts: Option<u32>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            prior_attempts: None,
        }
    }

    /// Delay that precedes a retry after `attempt` earlier failures
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match 2u32.checked_pow(attempt) {
            Some(factor) => self.base.saturating_mul(factor).min(self.max),
            None => self.max,
        }
    }

    /// Delay the next call to [`Backoff::wait`] will sleep for, if any
    pub fn pending_delay(&self) -> Option<Duration> {
        self.prior_attempts.map(|attempt| self.delay_for(attempt))
    }

    /// Sleep if a prior attempt exists, then count this attempt
    pub async fn wait(&mut self) {
        if let Some(delay) = self.pending_delay() {
            debug!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.prior_attempts.unwrap_or_default() + 1,
                "Backing off before retrying upstream"
            );
            sleep(delay).await;
        }

        self.prior_attempts = Some(self.prior_attempts.map_or(0, |n| n.saturating_add(1)));
    }

    /// Forget prior failures (call after a successful connect)
    pub fn reset(&mut self) {
        self.prior_attempts = None;
    }

    pub fn prior_attempts(&self) -> Option<u32> {
        self.prior_attempts
    }
}
