//! Retry with exponential backoff
//!
//! Retryable errors (see [`SyncError::is_retryable`]) are retried up to the
//! attempt ceiling. Rate limits wait at least as long as the provider asked;
//! everything else waits `base * 2^(attempt-1)` capped at the maximum, plus
//! jitter.

use log::warn;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Upper bound of the random jitter added to computed backoff
const MAX_JITTER_MS: u64 = 250;

/// Longest provider-requested pause that is honored
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(15 * 60);

/// Retry ceiling and backoff shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 60_000,
        }
    }
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff_ms: config.backoff_base_ms,
            max_backoff_ms: config.backoff_max_ms,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
        let base = self
            .initial_backoff_ms
            .saturating_mul(exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(base)
    }

    /// Delay before the next attempt, honoring a provider `Retry-After`
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.backoff(attempt);
        match retry_after {
            Some(requested) => {
                if requested > MAX_RETRY_AFTER {
                    warn!(
                        "Provider asked to wait {:?}, capping at {:?}",
                        requested, MAX_RETRY_AFTER
                    );
                }
                requested.min(MAX_RETRY_AFTER).max(backoff)
            }
            None => {
                let jitter = rand::thread_rng().gen_range(0..=MAX_JITTER_MS);
                backoff + Duration::from_millis(jitter)
            }
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or runs out of attempts
///
/// `op` receives the 1-based attempt number. A retryable error on the last
/// attempt is escalated to `RetriesExhausted`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> SyncResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = policy.delay(attempt, err.retry_after());
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what, attempt, attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) if err.is_retryable() => {
                return Err(SyncError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            Err(err) => return Err(err),
        }
    }
}
