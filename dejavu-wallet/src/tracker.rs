//! Transaction lifecycle tracking.
//!
//! [`TransactionTracker`] polls a family-specific [`ConfirmationSource`]
//! until enough finality accrued on a transaction, bounded by a wall-clock
//! timeout and a retry budget for transient RPC failures.
//!
//! ```text
//! poll ──► Pending ───────────────┐
//!   │  ──► Included(n < N) ───────┤ sleep(poll_interval)
//!   │  ──► transient error ───────┘ sleep(backoff), up to max_attempts
//!   ├───► Included(n >= N) ─► Ok(receipt, Confirmed)
//!   ├───► Reverted ─────────► TransactionError::Reverted
//!   └─ deadline ────────────► TransactionError::Timeout
//! ```

use async_trait::async_trait;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, warn};

use crate::config::TrackerConfig;
use crate::error::{Result, TransactionError};
use crate::types::{TransactionReceipt, TxStatus};

/// What a single poll observed about a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxProgress {
    /// Not included yet, or unknown to the node.
    Pending,
    /// Included; `receipt.confirmations` holds the current depth.
    Included(TransactionReceipt),
    /// Included but failed on chain.
    Reverted {
        /// Reason exposed by the chain, if any.
        reason: Option<String>,
    },
}

/// Family-specific view of a transaction's settlement.
#[async_trait]
pub trait ConfirmationSource: Send + Sync {
    /// Observe the transaction once.
    ///
    /// # Errors
    ///
    /// Returns `Error::Rpc`; transient ones are retried by the tracker.
    async fn poll(&self, hash: &str) -> Result<TxProgress>;
}

/// Waits for transactions to reach a confirmation depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionTracker {
    config: TrackerConfig,
}

impl TransactionTracker {
    /// Create a tracker with the given configuration.
    #[must_use]
    pub const fn new(config: TrackerConfig) -> Self {
        Self { config }
    }

    /// The tracker's configuration.
    #[must_use]
    pub const fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Wait until `hash` has at least `confirmations` confirmations.
    ///
    /// Zero confirmations falls back to the configured default (at least
    /// one, i.e. inclusion).
    ///
    /// # Errors
    ///
    /// - [`TransactionError::Reverted`] if the transaction failed on chain
    /// - [`TransactionError::Timeout`] if the deadline passed first
    /// - `Error::Rpc` once transient retries are exhausted, or immediately for
    ///   non-transient RPC failures
    pub async fn wait(
        &self,
        source: &dyn ConfirmationSource,
        hash: &str,
        confirmations: u64,
    ) -> Result<TransactionReceipt> {
        let required = if confirmations == 0 {
            self.config.default_confirmations.max(1)
        } else {
            confirmations
        };
        let started = Instant::now();
        let deadline = started + self.config.timeout();
        debug!(%hash, required, timeout = ?self.config.timeout(), "waiting for transaction");

        if let Ok(outcome) = timeout_at(deadline, self.poll_until(source, hash, required)).await {
            outcome
        } else {
            let waited = started.elapsed();
            warn!(%hash, ?waited, "transaction not confirmed before deadline");
            Err(TransactionError::Timeout {
                hash: hash.to_owned(),
                waited,
            }
            .into())
        }
    }

    async fn poll_until(
        &self,
        source: &dyn ConfirmationSource,
        hash: &str,
        required: u64,
    ) -> Result<TransactionReceipt> {
        let retry = self.config.retry;
        let mut failures = 0;
        loop {
            match source.poll(hash).await {
                Ok(TxProgress::Included(mut receipt)) if receipt.confirmations >= required => {
                    receipt.status = TxStatus::Confirmed;
                    debug!(%hash, confirmations = receipt.confirmations, "transaction confirmed");
                    return Ok(receipt);
                }
                Ok(TxProgress::Included(receipt)) => {
                    debug!(%hash, confirmations = receipt.confirmations, required, "awaiting confirmations");
                    failures = 0;
                }
                Ok(TxProgress::Pending) => failures = 0,
                Ok(TxProgress::Reverted { reason }) => {
                    warn!(%hash, ?reason, "transaction reverted");
                    return Err(TransactionError::Reverted {
                        hash: hash.to_owned(),
                        reason,
                    }
                    .into());
                }
                Err(err) if err.is_transient() => {
                    if failures >= retry.max_attempts {
                        warn!(%hash, failures, error = %err, "giving up on transaction polling");
                        return Err(err);
                    }
                    let delay = retry.delay_for_attempt(failures);
                    failures += 1;
                    warn!(%hash, failures, ?delay, error = %err, "transient polling failure");
                    sleep(delay).await;
                    continue;
                }
                Err(err) => return Err(err),
            }
            sleep(self.config.poll_interval()).await;
        }
    }
}
