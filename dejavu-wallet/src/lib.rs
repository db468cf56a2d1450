#![cfg_attr(docsrs, feature(doc_cfg))]
//! Dejavu Wallet is a multi-chain wallet core: one connection state machine
//! over EVM, Solana and Sui wallets.
//!
//! A [`WalletController`] drives whichever [`ChainAdapter`] the
//! [`AdapterRegistry`] resolves for a [`ChainFamily`]. Adapters talk to the
//! host's native wallet through the provider traits in [`provider`], and
//! [`TransactionTracker`] follows submitted transactions to the requested
//! confirmation depth.
//!
//! ```rust,ignore
//! let evm = EvmAdapter::builder().provider(Arc::new(local_provider)).build()?;
//! let wallet = WalletController::new(
//!     AdapterRegistry::builder().register(Arc::new(evm)).build(),
//! );
//! let state = wallet.connect(ChainFamily::Evm, Some(ChainId::Base)).await?;
//! ```

pub mod adapter;
pub mod chain;
pub mod config;
pub mod controller;
pub mod error;
pub mod prelude;
pub mod provider;
pub mod registry;
pub mod tracker;
pub mod types;

pub use adapter::{AdapterStatus, ChainAdapter, EvmAdapter, SolanaAdapter, SuiAdapter, Subscription};
pub use chain::{ChainFamily, ChainId};
pub use controller::WalletController;
pub use error::{Error, Result};
pub use registry::AdapterRegistry;
pub use tracker::TransactionTracker;
pub use types::{TransactionReceipt, TransactionRequest, TxStatus, WalletState, WalletStatus};
