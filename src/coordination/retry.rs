//! Retry policy executor for write submissions
//!
//! Wraps a single submission attempt with classification-driven retry and
//! exponential backoff. Transient failures are absorbed here until the retry
//! budget is exhausted; terminal failures propagate immediately.

use crate::config::NetworkProfile;
use crate::error::{ErrorClass, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Retry/backoff parameters for one class of submissions
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Backoff delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single backoff delay
    pub max_delay: Duration,
    /// Exponential growth factor between retries
    pub multiplier: u32,
    /// Short fixed delay before the single nonce-conflict retry
    pub nonce_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_profile(NetworkProfile::Standard)
    }
}

impl RetryPolicy {
    /// Profile-tuned policy: the constrained profile gets a larger attempt
    /// budget and longer caps to ride out flaky connectivity.
    pub fn for_profile(profile: NetworkProfile) -> Self {
        match profile {
            NetworkProfile::Standard => Self {
                max_retries: 3,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(8),
                multiplier: 2,
                nonce_retry_delay: Duration::from_millis(300),
            },
            NetworkProfile::Constrained => Self {
                max_retries: 5,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                multiplier: 2,
                nonce_retry_delay: Duration::from_millis(500),
            },
        }
    }

    /// Backoff delay after failed attempt `i` (1-based):
    /// `min(max_delay, initial_delay * multiplier^(i-1))`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let factor = self.multiplier.saturating_pow(exp);
        let delay = self.initial_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Progress event emitted before each sleep so callers can surface a
/// "still working" signal
#[derive(Debug, Clone)]
pub struct RetryEvent {
    /// The attempt number that just failed (1-based)
    pub attempt: u32,
    pub class: ErrorClass,
    pub delay: Duration,
}

/// Execute `op` with classification-driven retry.
///
/// The first attempt runs immediately. Failures classified as transient are
/// retried per `policy`; a nonce conflict is retried exactly once after a
/// short fixed delay; terminal classes (user rejection, revert, unknown
/// cause) propagate at once. Exhausting the budget rethrows the last error.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
    status: Option<mpsc::UnboundedSender<RetryEvent>>,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    let mut nonce_retry_used = false;

    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Submission succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let class = err.classify();
        if !class.is_retryable() {
            debug!("Attempt {} failed with terminal class {}: {}", attempt, class, err);
            return Err(err);
        }

        if attempt > policy.max_retries {
            warn!(
                "Retry budget exhausted after {} attempts ({}): {}",
                attempt, class, err
            );
            return Err(err);
        }

        let delay = match class {
            ErrorClass::NonceConflict => {
                if nonce_retry_used {
                    warn!("Second nonce conflict, giving up: {}", err);
                    return Err(err);
                }
                nonce_retry_used = true;
                policy.nonce_retry_delay
            }
            _ => policy.backoff_delay(attempt),
        };

        warn!(
            "Attempt {} failed ({}), retrying in {:?}: {}",
            attempt, class, delay, err
        );
        if let Some(tx) = &status {
            let _ = tx.send(RetryEvent {
                attempt,
                class,
                delay,
            });
        }

        tokio::time::sleep(delay).await;
    }
}
