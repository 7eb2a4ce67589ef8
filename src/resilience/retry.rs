// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with exponential backoff.
//!
//! Used for opening source connections. Only errors the caller classifies
//! as transient are retried; cancellation and configuration errors return
//! at once.
//!
//! # Example
//!
//! ```
//! use sync_adapter::RetryConfig;
//! use std::time::Duration;
//!
//! let connect = RetryConfig::connect();
//! assert_eq!(connect.max_retries, Some(3));
//! assert_eq!(connect.delay_for(1), Duration::from_millis(200));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Backoff schedule. `max_retries` counts attempts in total; `None` retries forever.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::connect()
    }
}

impl RetryConfig {
    /// Three quick attempts, then give up.
    #[must_use]
    pub fn connect() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Single attempt.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: Some(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Delay after the `attempt`-th failure (0-based), capped at `max_delay`.
    /// Growth past what a `Duration` can hold saturates at the cap.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

/// Retry `operation` while it fails with an error `is_transient` accepts.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    is_transient: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts: usize = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(operation = operation_name, retries = attempts, "Operation succeeded after retry");
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if !is_transient(&err) {
                    return Err(err);
                }
                if config.max_retries.is_some_and(|max| attempts >= max) {
                    return Err(err);
                }

                let delay = config.delay_for(u32::try_from(attempts - 1).unwrap_or(u32::MAX));
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max = ?config.max_retries,
                    error = %err,
                    ?delay,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

/// Retry on every error.
pub async fn retry<F, Fut, T, E>(operation_name: &str, config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(operation_name, config, |_| true, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky(usize),
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Flaky(n) => write!(f, "flaky {}", n),
                Self::Fatal => write!(f, "fatal"),
            }
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result: Result<i32, TestError> = retry("open", &RetryConfig::test(), || {
            let a = counter.clone();
            async move {
                let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 3 {
                    Err(TestError::Flaky(count))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result: Result<i32, TestError> = retry("open", &RetryConfig::test(), || {
            let a = counter.clone();
            async move { Err(TestError::Flaky(a.fetch_add(1, Ordering::SeqCst))) }
        })
        .await;

        assert_eq!(result.unwrap_err(), TestError::Flaky(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result: Result<i32, TestError> = retry_if(
            "open",
            &RetryConfig::test(),
            |e| matches!(e, TestError::Flaky(_)),
            || {
                let a = counter.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Fatal)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap_err(), TestError::Fatal);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_backoff_caps_at_max() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            factor: 2.0,
            max_retries: Some(5),
        };
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(350));
        assert_eq!(RetryConfig::none().max_retries, Some(1));
    }

    #[test]
    fn test_delay_saturates_for_huge_attempts() {
        let config = RetryConfig::connect();
        assert_eq!(config.delay_for(70), config.max_delay);
        assert_eq!(config.delay_for(1_100), config.max_delay);
        assert_eq!(config.delay_for(u32::MAX), config.max_delay);

        let flat = RetryConfig {
            factor: 1.0,
            ..RetryConfig::connect()
        };
        assert_eq!(flat.delay_for(u32::MAX), Duration::from_millis(100));
    }
}
