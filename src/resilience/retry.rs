// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff for store calls.
//!
//! Only transient failures (I/O, timeouts, cluster reconfiguration) are
//! retried; a `WRONGTYPE` or similar reply is returned immediately.
//!
//! # Example
//!
//! ```
//! use migrate_proxy::RetryConfig;
//!
//! // Startup: fail fast on a bad address
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, 5);
//!
//! // Query: quick retry, then hand the error to the caller
//! let query = RetryConfig::query();
//! assert_eq!(query.max_retries, 3);
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Backoff settings for a retried operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts, including the first one
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Initial connection to source/target.
    /// 5 attempts, giving up after roughly 5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Individual commands. Kept short: the caller may be holding the
    /// concurrency guard.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            factor: 2.0,
        }
    }

    /// Single attempt, no backoff.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.factor).min(self.max_delay)
    }
}

/// Errors that may succeed when simply tried again.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for redis::RedisError {
    fn is_transient(&self) -> bool {
        self.is_io_error()
            || self.is_timeout()
            || self.is_connection_dropped()
            || self.is_connection_refusal()
            || matches!(
                self.kind(),
                redis::ErrorKind::TryAgain | redis::ErrorKind::ClusterDown | redis::ErrorKind::BusyLoadingError
            )
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + Transient,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(operation = operation_name, retries = attempts, "Store call succeeded after retry");
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if !err.is_transient() || attempts >= config.max_retries {
                    return Err(err);
                }

                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max = config.max_retries,
                    error = %err,
                    "Store call failed, retrying in {:?}",
                    delay
                );
                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
