//! Configuration for retries, confirmation tracking and the controller.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Configuration for retrying transient RPC failures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_attempts: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Exponential backoff multiplier.
    pub backoff_multiplier: f64,
    /// Upper bound on a single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Whether to add jitter to retry delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            backoff_multiplier: 2.0,
            max_delay_ms: 8_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 0,
            backoff_multiplier: 1.0,
            max_delay_ms: 0,
            jitter: false,
        }
    }

    /// Calculate delay for a given attempt number (0-indexed).
    #[must_use]
    #[allow(
        clippy::cast_possible_wrap,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = (self.initial_delay_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
        .min(self.max_delay_ms as f64);
        let delay_ms = if self.jitter {
            // Up to 25% jitter
            base_delay + base_delay * 0.25 * fastrand::f64()
        } else {
            base_delay
        };
        Duration::from_millis(delay_ms as u64)
    }

    /// Run `op`, retrying transient RPC failures with exponential backoff.
    ///
    /// Any other error, including user rejections, is returned immediately.
    ///
    /// # Errors
    ///
    /// Returns the last error once `max_attempts` retries are exhausted.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(operation = what, attempt, ?delay, error = %err, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Configuration for [`TransactionTracker`](crate::tracker::TransactionTracker).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Delay between confirmation polls in milliseconds.
    pub poll_interval_ms: u64,
    /// Wall-clock bound on a single wait in milliseconds.
    pub timeout_ms: u64,
    /// Confirmations used when a caller asks for zero.
    pub default_confirmations: u64,
    /// Backoff for transient RPC failures while polling.
    pub retry: RetryConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            timeout_ms: 120_000,
            default_confirmations: 1,
            retry: RetryConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration for [`WalletController`](crate::controller::WalletController).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Backoff for transient failures while reading balances.
    pub balance_retry: RetryConfig,
}
