//! Bounded retry with exponential backoff and jitter
//!
//! One policy object is injected into each provider-facing adapter
//! (embeddings, vector index) so every outbound call retries the same way.

use anyhow::Result;
use log::warn;
use rand::Rng;
use std::time::Duration;

/// Retry policy for provider calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; also the jitter bound
    pub initial_delay: Duration,
    /// Ceiling for any single wait
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(6),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
        }
    }

    /// Retry without sleeping (tests)
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Wait before retry number `retry` (0-based): `initial * 2^retry`
    /// plus jitter in `[0, initial)`, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(retry.min(16)));
        let jitter_bound = self.initial_delay.as_millis() as u64;
        let jitter = if jitter_bound == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_bound))
        };
        (base + jitter).min(self.max_delay)
    }

    /// Run `op` until it succeeds or attempts run out.
    ///
    /// The last error is returned with the operation name attached.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => {
                    return Err(e.context(format!("{} failed after {} attempts", what, attempt)));
                }
                Err(e) => {
                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        "{} attempt {}/{} failed: {:#}; retrying in {:?}",
                        what, attempt, attempts, e, delay
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
