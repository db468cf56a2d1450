//! Native wallet/RPC provider contracts.
//!
//! Adapters never talk to a chain directly. Each family consumes one of the
//! traits below, implemented by whatever the host environment injects: a
//! browser wallet bridge, a mobile SDK, or the bundled [`LocalEvmProvider`].
//!
//! # Architecture
//!
//! ```text
//! EvmAdapter    ──► dyn EvmProvider     (EIP-1193 shaped)
//! SolanaAdapter ──► dyn SolanaProvider  (wallet-standard shaped)
//! SuiAdapter    ──► dyn SuiProvider     (wallet-standard shaped)
//!
//! provider.events() ──► ProviderEvent ──► adapter listener sets
//! ```

pub mod local;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::chain::{ChainFamily, ChainId};
use crate::error::{ConnectionError, Error, RpcError, SigningError, TransactionError};
use crate::types::{TransactionReceipt, TransactionRequest};

pub use local::{LocalEvmProvider, LocalEvmProviderBuilder};

/// An event pushed by a native provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The selected account changed; `None` means the wallet revoked access.
    AccountChanged(Option<String>),
    /// The wallet moved to another network.
    ChainChanged(ChainId),
    /// The wallet disconnected on its own.
    Disconnected,
}

/// Error reported by a native provider, before adapter classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// The user declined the request (EIP-1193 4001).
    #[error("user rejected the request")]
    UserRejected,
    /// The account is not authorized (4100).
    #[error("unauthorized")]
    Unauthorized,
    /// The wallet does not implement the method (4200).
    #[error("unsupported method")]
    UnsupportedMethod,
    /// The wallet does not know the requested network (4902).
    #[error("unrecognized chain")]
    UnrecognizedChain,
    /// The wallet lost its connection (4900, 4901).
    #[error("provider disconnected")]
    Disconnected,
    /// The sender cannot cover value plus fees.
    #[error("insufficient funds")]
    InsufficientFunds,
    /// The request parameters were rejected (-32602).
    #[error("invalid params: {0}")]
    InvalidParams(String),
    /// Any other JSON-RPC error.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
    },
    /// Transport-level failure (timeout, connection reset).
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Classify an EIP-1193 / JSON-RPC error code.
    #[must_use]
    pub fn from_rpc_code(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            4001 => Self::UserRejected,
            4100 => Self::Unauthorized,
            4200 | -32601 => Self::UnsupportedMethod,
            4900 | 4901 => Self::Disconnected,
            4902 => Self::UnrecognizedChain,
            -32602 => Self::InvalidParams(message),
            -32000 if message.to_ascii_lowercase().contains("insufficient funds") => {
                Self::InsufficientFunds
            }
            _ => Self::Rpc { code, message },
        }
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Disconnected
                | Self::Rpc {
                    code: -32005 | -32603 | 429,
                    ..
                }
        )
    }

    /// Convert into the crate error for a plain query.
    #[must_use]
    pub fn into_rpc(self) -> Error {
        let transient = self.is_transient();
        let mut err = if transient {
            RpcError::transient(self.to_string())
        } else {
            RpcError::fatal(self.to_string())
        };
        if let Self::Rpc { code, .. } = self {
            err = err.with_code(code);
        }
        Error::Rpc(err)
    }

    /// Convert into the crate error for a connect request.
    #[must_use]
    pub fn into_connection(self, chain: ChainId) -> Error {
        match self {
            Self::UserRejected | Self::Unauthorized => ConnectionError::Rejected.into(),
            Self::UnrecognizedChain => ConnectionError::UnsupportedChain(chain).into(),
            other => other.into_rpc(),
        }
    }

    /// Convert into the crate error for a signing request.
    #[must_use]
    pub fn into_signing(self, family: ChainFamily, capability: &'static str) -> Error {
        match self {
            Self::UserRejected | Self::Unauthorized => SigningError::Rejected.into(),
            Self::UnsupportedMethod => Error::not_supported(family, capability),
            other => other.into_rpc(),
        }
    }

    /// Convert into the crate error for a transaction submission.
    #[must_use]
    pub fn into_transaction(self) -> Error {
        match self {
            Self::UserRejected | Self::Unauthorized => TransactionError::Rejected.into(),
            Self::InsufficientFunds => TransactionError::InsufficientFunds.into(),
            Self::InvalidParams(msg) => TransactionError::Invalid(msg).into(),
            other => other.into_rpc(),
        }
    }
}

/// Result type for native provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// An EIP-1193 shaped EVM wallet.
#[async_trait]
pub trait EvmProvider: Send + Sync + std::fmt::Debug {
    /// `eth_requestAccounts`: prompt the user for authorization.
    async fn request_accounts(&self) -> ProviderResult<Vec<Address>>;

    /// `eth_accounts`: already authorized accounts, without prompting.
    async fn accounts(&self) -> ProviderResult<Vec<Address>>;

    /// `eth_chainId`.
    async fn chain_id(&self) -> ProviderResult<u64>;

    /// `wallet_switchEthereumChain`.
    async fn switch_chain(&self, chain_id: u64) -> ProviderResult<()>;

    /// `eth_getBalance` at the latest block.
    async fn balance(&self, address: Address) -> ProviderResult<U256>;

    /// `personal_sign` (EIP-191); returns a `0x` hex signature.
    async fn personal_sign(&self, message: &[u8], address: Address) -> ProviderResult<String>;

    /// `eth_signTypedData_v4` (EIP-712); returns a `0x` hex signature.
    async fn sign_typed_data(&self, address: Address, data: &Value) -> ProviderResult<String>;

    /// `eth_sendTransaction`; returns the transaction hash.
    async fn send_transaction(
        &self,
        from: Address,
        tx: &TransactionRequest,
    ) -> ProviderResult<String>;

    /// `eth_blockNumber`.
    async fn block_number(&self) -> ProviderResult<u64>;

    /// `eth_getTransactionReceipt`; `None` while unmined. Receipts come back
    /// with `status` `Confirmed` or `Failed` and zero confirmations.
    async fn transaction_receipt(&self, hash: &str) -> ProviderResult<Option<TransactionReceipt>>;

    /// Revert reason of a failed transaction, when the node can replay it.
    async fn revert_reason(&self, _hash: &str) -> ProviderResult<Option<String>> {
        Ok(None)
    }

    /// Stream of wallet-originated events, if the provider emits any.
    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        None
    }
}

/// Confirmation status of a Solana signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    /// Slot the transaction landed in.
    pub slot: u64,
    /// Confirmed blocks on top of `slot`; `None` once rooted (finalized).
    pub confirmations: Option<u64>,
    /// Execution error, if the transaction failed.
    pub err: Option<String>,
    /// Fee paid in lamports.
    pub fee: u64,
}

/// A wallet-standard Solana wallet.
#[async_trait]
pub trait SolanaProvider: Send + Sync + std::fmt::Debug {
    /// `connect`; with `only_if_trusted` the wallet must not prompt.
    /// Returns the base58 public key.
    async fn connect(&self, only_if_trusted: bool) -> ProviderResult<String>;

    /// `disconnect`.
    async fn disconnect(&self) -> ProviderResult<()>;

    /// `getBalance` in lamports.
    async fn balance(&self, pubkey: &str) -> ProviderResult<u64>;

    /// `signMessage`; returns a base58 signature.
    async fn sign_message(&self, message: &[u8]) -> ProviderResult<String>;

    /// `signAndSendTransaction`; returns the transaction signature.
    async fn send_transaction(&self, tx: &TransactionRequest) -> ProviderResult<String>;

    /// `getSignatureStatuses` for one signature; `None` if unknown.
    async fn signature_status(&self, signature: &str) -> ProviderResult<Option<SignatureStatus>>;

    /// Stream of wallet-originated events, if the provider emits any.
    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        None
    }
}

/// Execution status of a Sui transaction block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiTransactionStatus {
    /// Checkpoint that includes the transaction, once checkpointed.
    pub checkpoint: Option<u64>,
    /// Failure message from the effects, if execution failed.
    pub error: Option<String>,
    /// Total gas charged in MIST.
    pub gas_used: u128,
}

/// A wallet-standard Sui wallet.
#[async_trait]
pub trait SuiProvider: Send + Sync + std::fmt::Debug {
    /// `standard:connect`: prompt the user; returns authorized addresses.
    async fn request_accounts(&self) -> ProviderResult<Vec<String>>;

    /// Already authorized addresses, without prompting.
    async fn accounts(&self) -> ProviderResult<Vec<String>>;

    /// `standard:disconnect`.
    async fn disconnect(&self) -> ProviderResult<()>;

    /// `suix_getBalance` of SUI in MIST.
    async fn balance(&self, address: &str) -> ProviderResult<u128>;

    /// `sui:signPersonalMessage`; returns a base64 signature.
    async fn sign_personal_message(&self, message: &[u8]) -> ProviderResult<String>;

    /// `sui:signAndExecuteTransaction`; returns the transaction digest.
    async fn sign_and_execute(&self, tx: &TransactionRequest) -> ProviderResult<String>;

    /// `sui_getTransactionBlock`; `None` if unknown.
    async fn transaction_status(&self, digest: &str)
    -> ProviderResult<Option<SuiTransactionStatus>>;

    /// `sui_getLatestCheckpointSequenceNumber`.
    async fn latest_checkpoint(&self) -> ProviderResult<u64>;

    /// Stream of wallet-originated events, if the provider emits any.
    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_code_classification() {
        assert_eq!(ProviderError::from_rpc_code(4001, "denied"), ProviderError::UserRejected);
        assert_eq!(
            ProviderError::from_rpc_code(4902, "unknown chain"),
            ProviderError::UnrecognizedChain
        );
        assert_eq!(
            ProviderError::from_rpc_code(-32000, "Insufficient funds for gas * price + value"),
            ProviderError::InsufficientFunds
        );
        assert!(matches!(
            ProviderError::from_rpc_code(-32000, "nonce too low"),
            ProviderError::Rpc { code: -32000, .. }
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Transport("reset".into()).is_transient());
        assert!(ProviderError::from_rpc_code(-32005, "limit exceeded").is_transient());
        assert!(!ProviderError::UserRejected.is_transient());
        assert!(ProviderError::from_rpc_code(-32603, "internal").into_rpc().is_transient());
    }

    #[test]
    fn test_context_mapping() {
        assert!(matches!(
            ProviderError::UserRejected.into_connection(ChainId::Base),
            Error::Connection(ConnectionError::Rejected)
        ));
        assert!(matches!(
            ProviderError::UnrecognizedChain.into_connection(ChainId::Base),
            Error::Connection(ConnectionError::UnsupportedChain(ChainId::Base))
        ));
        assert!(matches!(
            ProviderError::UnsupportedMethod.into_signing(ChainFamily::Evm, "signTypedData"),
            Error::Signing(SigningError::NotSupported { .. })
        ));
        assert!(matches!(
            ProviderError::InsufficientFunds.into_transaction(),
            Error::Transaction(TransactionError::InsufficientFunds)
        ));
        assert!(matches!(
            ProviderError::UserRejected.into_transaction(),
            Error::Transaction(TransactionError::Rejected)
        ));
    }
}
