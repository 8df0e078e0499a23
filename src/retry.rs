//! Exponential back-off around any fallible API call.
//!
//! DESIGN
//! ======
//! Retry is a decorator, never part of `ApiClient::request`. Callers opt in by
//! wrapping the call:
//!
//! ```ignore
//! let boards: Vec<Board> = with_retry(policy, || client.get("/boards")).await?;
//! ```
//!
//! The operation runs at most `retries + 1` times. A `Forbidden` error stops
//! immediately. Every other failure waits `base_delay * 2^n` before attempt
//! `n + 2`, and the last error is returned unchanged.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{ApiError, ErrorKind};

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    /// Delay before the first retry; doubled for each one after.
    pub base_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self { retries, base_delay }
    }

    /// Single attempt, no back-off.
    #[must_use]
    pub fn none() -> Self {
        Self { retries: 0, base_delay: Duration::ZERO }
    }

    /// Delay slept after failed attempt `attempt` (0-based). Saturates at
    /// [`Duration::MAX`].
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2_u32
            .checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// `Forbidden` will not change on repeat; everything else may.
    #[must_use]
    pub fn should_retry(err: &ApiError) -> bool {
        !err.is(ErrorKind::Forbidden)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRIES, Duration::from_millis(DEFAULT_RETRY_BASE_MS))
    }
}

/// Run `op` until it succeeds, hits a non-retryable error, or exhausts
/// `policy.retries`.
///
/// # Errors
///
/// Returns the error from the final attempt.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    with_retry_when(policy, RetryPolicy::should_retry, op).await
}

/// [`with_retry`] with a caller-chosen predicate deciding which errors are
/// worth another attempt.
///
/// # Errors
///
/// Returns the error from the final attempt, or the first error for which
/// `retry_on` is false.
pub async fn with_retry_when<T, F, Fut, P>(policy: RetryPolicy, retry_on: P, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
    P: Fn(&ApiError) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.retries && retry_on(&e) => {
                let delay = policy.delay_for(attempt);
                attempt += 1;
                warn!(
                    error = %e,
                    kind = %e.kind(),
                    attempt,
                    total = policy.retries,
                    ?delay,
                    "request failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
