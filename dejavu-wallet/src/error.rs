//! Unified error types for wallet operations.
//!
//! The hierarchy follows how a caller reacts to a failure:
//! - [`ConnectionError`]: connecting or switching network failed
//! - [`SigningError`]: the wallet refused or cannot sign
//! - [`TransactionError`]: a transaction was invalid, refused, reverted or never settled
//! - [`RpcError`]: transient network/provider failure
//!
//! Controller-level failures (`AlreadyConnected`, `NotConnected`,
//! `UnsupportedChainFamily`) live directly on [`Error`].

use std::fmt;
use std::time::Duration;

use crate::chain::{ChainFamily, ChainId};
use crate::types::WalletStatus;

/// Result type alias for wallet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the wallet core.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Connecting to a wallet or switching its network failed.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Signing failed.
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    /// Transaction submission or settlement failed.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Network or provider failure.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// No adapter is registered for the family.
    #[error("unsupported chain family: {0}")]
    UnsupportedChainFamily(ChainFamily),

    /// A connect was issued while another is pending or live.
    #[error("wallet is already {status}")]
    AlreadyConnected {
        /// Status observed when the call was rejected.
        status: WalletStatus,
    },

    /// An address is not valid for the family.
    #[error("invalid {family} address '{address}'")]
    InvalidAddress {
        /// Family whose encoding was expected.
        family: ChainFamily,
        /// The offending input.
        address: String,
    },

    /// The operation needs a connected wallet.
    #[error("wallet is not connected")]
    NotConnected,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid-transaction error.
    #[must_use]
    pub fn invalid_transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(TransactionError::Invalid(msg.into()))
    }

    /// Create an invalid-address error.
    #[must_use]
    pub fn invalid_address(family: ChainFamily, address: impl Into<String>) -> Self {
        Self::InvalidAddress {
            family,
            address: address.into(),
        }
    }

    /// Create an unsupported-chain error.
    #[must_use]
    pub const fn unsupported_chain(chain: ChainId) -> Self {
        Self::Connection(ConnectionError::UnsupportedChain(chain))
    }

    /// Create a not-supported signing error.
    #[must_use]
    pub const fn not_supported(family: ChainFamily, capability: &'static str) -> Self {
        Self::Signing(SigningError::NotSupported { family, capability })
    }

    /// Whether the failure is a transient RPC error worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(err) if err.transient)
    }

    /// Whether the user explicitly declined the request.
    #[must_use]
    pub const fn is_user_rejection(&self) -> bool {
        matches!(
            self,
            Self::Connection(ConnectionError::Rejected)
                | Self::Signing(SigningError::Rejected)
                | Self::Transaction(TransactionError::Rejected)
        )
    }
}

/// Failures while establishing a wallet connection or changing network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The user declined the connection request.
    #[error("connection request rejected by user")]
    Rejected,

    /// No native wallet provider is installed for the family.
    #[error("no {0} wallet provider found")]
    NoProviderFound(ChainFamily),

    /// The adapter does not serve this network.
    #[error("unsupported chain: {0}")]
    UnsupportedChain(ChainId),

    /// The attempt was superseded by a disconnect or a newer connect.
    #[error("connection attempt was superseded")]
    Aborted,
}

/// Failures while signing messages or typed data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SigningError {
    /// The user declined the signature request.
    #[error("signature request rejected by user")]
    Rejected,

    /// The payload cannot be signed as given.
    #[error("invalid signing payload: {0}")]
    Invalid(String),

    /// The family has no such signing primitive.
    #[error("{capability} is not supported on {family}")]
    NotSupported {
        /// The family lacking the capability.
        family: ChainFamily,
        /// Name of the missing capability.
        capability: &'static str,
    },
}

/// Failures while submitting or settling a transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TransactionError {
    /// The request is malformed for the target family.
    #[error("invalid transaction: {0}")]
    Invalid(String),

    /// The sender cannot cover value plus fees.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The user declined the transaction.
    #[error("transaction rejected by user")]
    Rejected,

    /// The transaction was included but failed on chain.
    #[error("transaction {hash} reverted{}", revert_suffix(.reason.as_deref()))]
    Reverted {
        /// Transaction hash / signature / digest.
        hash: String,
        /// Revert reason, when the chain exposes one.
        reason: Option<String>,
    },

    /// No confirmation was observed before the deadline.
    #[error("transaction {hash} not confirmed after {waited:?}")]
    Timeout {
        /// Transaction hash / signature / digest.
        hash: String,
        /// How long the tracker waited.
        waited: Duration,
    },
}

fn revert_suffix(reason: Option<&str>) -> String {
    reason.map(|r| format!(": {r}")).unwrap_or_default()
}

/// Network or provider failure.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct RpcError {
    /// JSON-RPC error code, if the provider returned one.
    pub code: Option<i64>,
    /// Error message.
    pub message: String,
    /// Whether retrying the same request may succeed.
    pub transient: bool,
}

impl RpcError {
    /// Create a transient error (timeouts, dropped connections, rate limits).
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            transient: true,
        }
    }

    /// Create a non-retryable error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            transient: false,
        }
    }

    /// Attach a JSON-RPC error code.
    #[must_use]
    pub const fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    /// Check if this is a retryable error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.transient
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = self.code {
            write!(f, " (code: {code})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}
