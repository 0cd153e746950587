//! Backoff and deadline helpers for network calls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::PwaKitError;

/// Exponential backoff: `base_delay`, doubled per retry, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, first one included. Never below 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Single attempt.
    pub fn none() -> Self {
        Self::attempts(1)
    }

    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Pause before `attempt` (1-based). The first attempt starts at once.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let doublings = (attempt - 2).min(20);
        self.base_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or attempts run out.
///
/// `operation` gets the 1-based attempt number. On exhaustion the error of
/// the final attempt is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let last = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if attempt == last {
            if last > 1 {
                warn!(attempts = last, error = %error, "Giving up");
            }
            return Err(error);
        }

        attempt += 1;
        let pause = config.delay_before(attempt);
        debug!(attempt, ?pause, error = %error, "Retrying");
        tokio::time::sleep(pause).await;
    }
}

/// Fail with [`PwaKitError::Timeout`] if `operation` runs past `limit`.
pub async fn with_timeout<T, F, Fut>(limit: Duration, operation: F) -> Result<T, PwaKitError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    tokio::time::timeout(limit, operation())
        .await
        .map_err(|_| PwaKitError::Timeout(limit))
}
