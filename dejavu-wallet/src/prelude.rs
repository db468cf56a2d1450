//! Common imports for applications driving the wallet.

pub use alloy::primitives::U256;

pub use crate::adapter::{ChainAdapter, EvmAdapter, SolanaAdapter, SuiAdapter};
pub use crate::chain::{ChainFamily, ChainId};
pub use crate::config::{RetryConfig, TrackerConfig, WalletConfig};
pub use crate::controller::WalletController;
pub use crate::error::{ConnectionError, Error, Result, SigningError, TransactionError};
pub use crate::provider::{EvmProvider, LocalEvmProvider, SolanaProvider, SuiProvider};
pub use crate::registry::AdapterRegistry;
pub use crate::types::{TransactionReceipt, TransactionRequest, WalletState, WalletStatus};
