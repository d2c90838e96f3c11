//! Bounded retry with exponential backoff.
//!
//! One combinator replaces the nested retry loops that otherwise grow around
//! every fetch call site. Only transient errors are retried, the attempt
//! count is capped, and a small random jitter keeps callers from
//! synchronizing on the upstream.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Errors that can distinguish a retryable failure from a terminal one
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for crate::errors::FetchError {
    fn is_transient(&self) -> bool {
        self.is_transient()
    }
}

impl Retryable for crate::errors::AppError {
    fn is_transient(&self) -> bool {
        self.is_transient()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Run `op` until it succeeds, fails terminally, or the attempt cap is hit.
///
/// The backoff doubles after every transient failure, saturating at
/// `max_backoff`, with up to 250ms of jitter added to each wait.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = policy.initial_backoff;
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                warn!(attempt, error = %e, "transient failure, backing off");
                let jitter = Duration::from_millis(fastrand::u64(0..250));
                tokio::time::sleep(delay + jitter).await;
                delay = (delay * 2).min(policy.max_backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);

        let result = retry_with_backoff(quick_policy(5), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FetchError::transient("flaky"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(quick_policy(3), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::transient("still down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(quick_policy(5), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::not_found("2024-01-01")) }
        })
        .await;

        assert!(matches!(result, Err(FetchError::NotFound { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
