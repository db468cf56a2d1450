//! Chain adapters: one capability contract, one implementation per family.
//!
//! This module defines the [`ChainAdapter`] trait that normalizes a family's
//! native wallet surface into chain-agnostic primitives: addresses as
//! strings, amounts as [`U256`].
//!
//! # Supported Families
//!
//! - EVM ([`EvmAdapter`]): every capability, including EIP-712 typed data
//! - Solana ([`SolanaAdapter`]): no typed-data signing
//! - Sui ([`SuiAdapter`]): no typed-data signing
//!
//! Families lacking a capability fail with
//! [`SigningError::NotSupported`](crate::error::SigningError::NotSupported);
//! nothing is ever silently skipped.

/// Boilerplate shared by adapters that keep their state in an [`AdapterCore`].
macro_rules! delegate_to_core {
    () => {
        fn family(&self) -> $crate::chain::ChainFamily {
            self.core.family()
        }

        fn supported_chains(&self) -> &[$crate::chain::ChainId] {
            self.core.supported_chains()
        }

        fn connection_status(&self) -> $crate::adapter::AdapterStatus {
            self.core.status()
        }

        fn address(&self) -> Option<String> {
            self.core.address()
        }

        fn chain_id(&self) -> Option<$crate::chain::ChainId> {
            self.core.chain_id()
        }

        fn on_account_change(
            &self,
            callback: Box<dyn Fn(Option<String>) + Send + Sync>,
        ) -> $crate::adapter::Subscription {
            self.core.on_account_change(callback)
        }

        fn on_chain_change(
            &self,
            callback: Box<dyn Fn($crate::chain::ChainId) + Send + Sync>,
        ) -> $crate::adapter::Subscription {
            self.core.on_chain_change(callback)
        }

        fn on_disconnect(
            &self,
            callback: Box<dyn Fn() + Send + Sync>,
        ) -> $crate::adapter::Subscription {
            self.core.on_disconnect(callback)
        }

        fn listener_counts(&self) -> $crate::adapter::ListenerCounts {
            self.core.listener_counts()
        }

        fn handle_event(&self, event: $crate::provider::ProviderEvent) {
            self.core.dispatch(event);
        }
    };
}

pub(crate) use delegate_to_core;

mod base;
pub mod evm;
pub mod listeners;
pub mod solana;
pub mod sui;

use alloy::primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::{ChainFamily, ChainId};
use crate::error::Result;
use crate::provider::ProviderEvent;
use crate::types::{TransactionReceipt, TransactionRequest};

pub use base::{AdapterBuilder, AdapterCore, ProviderSlot};
pub use evm::EvmAdapter;
pub use listeners::{ListenerSet, Subscription};
pub use solana::SolanaAdapter;
pub use sui::SuiAdapter;

/// Connectivity state of a single adapter.
///
/// `Idle → Connecting → {Connected | Error}`, and
/// `Connected → Disconnected → Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterStatus {
    /// Never connected, or fully torn down.
    #[default]
    Idle,
    /// Waiting for the wallet to authorize.
    Connecting,
    /// Authorized.
    Connected,
    /// The last connect failed.
    Error,
    /// Disconnect listeners are being notified.
    Disconnected,
}

/// Number of callbacks in each of an adapter's listener sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerCounts {
    /// Account-change listeners.
    pub accounts: usize,
    /// Chain-change listeners.
    pub chains: usize,
    /// Disconnect listeners.
    pub disconnects: usize,
}

/// Capability contract every chain family implements.
///
/// Implement this trait to add support for a new family, then register the
/// instance with an [`AdapterRegistry`](crate::registry::AdapterRegistry).
#[async_trait]
pub trait ChainAdapter: Send + Sync + std::fmt::Debug {
    /// The family served (the wallet state's `chain_type`).
    fn family(&self) -> ChainFamily;

    /// Networks this adapter can connect or switch to.
    fn supported_chains(&self) -> &[ChainId];

    /// Current connectivity status.
    fn connection_status(&self) -> AdapterStatus;

    /// Ask the wallet for authorization and return the selected address.
    ///
    /// # Errors
    ///
    /// `ConnectionError::Rejected`, `ConnectionError::NoProviderFound` or
    /// `ConnectionError::UnsupportedChain`.
    async fn connect(&self, chain: Option<ChainId>) -> Result<String>;

    /// Reconnect to an already authorized wallet without prompting.
    ///
    /// Returns `Ok(None)` when the wallet would have to ask the user.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect), minus user rejection.
    async fn reconnect(&self, chain: Option<ChainId>) -> Result<Option<String>>;

    /// Drop the local identity and notify disconnect listeners.
    ///
    /// Idempotent: calling it while disconnected still notifies and never
    /// fails because of the current state.
    ///
    /// # Errors
    ///
    /// Only if the native provider reports a failure it cannot recover from.
    async fn disconnect(&self) -> Result<()>;

    /// Move the wallet to another network of the same family.
    ///
    /// # Errors
    ///
    /// `ConnectionError::UnsupportedChain` when `chain` is not in
    /// [`supported_chains`](Self::supported_chains).
    async fn switch_chain(&self, chain: ChainId) -> Result<()>;

    /// Last known address; `None` when disconnected.
    fn address(&self) -> Option<String>;

    /// Last known network; `None` when disconnected.
    fn chain_id(&self) -> Option<ChainId>;

    /// Native balance of `address`; zero is a normal result.
    ///
    /// # Errors
    ///
    /// `Error::Rpc` on network failure.
    async fn balance(&self, address: &str) -> Result<U256>;

    /// Sign an arbitrary message with the connected account.
    ///
    /// # Errors
    ///
    /// `SigningError::Rejected` or `SigningError::NotSupported`.
    async fn sign_message(&self, message: &[u8]) -> Result<String>;

    /// Sign structured data (EIP-712 on EVM).
    ///
    /// # Errors
    ///
    /// `SigningError::NotSupported` on families without the primitive.
    async fn sign_typed_data(&self, data: &Value) -> Result<String>;

    /// Validate and submit a transaction; returns its hash.
    ///
    /// # Errors
    ///
    /// `TransactionError::Invalid`, `TransactionError::InsufficientFunds` or
    /// `TransactionError::Rejected`.
    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<String>;

    /// Wait until `confirmations` units of finality accrued on `hash`.
    ///
    /// # Errors
    ///
    /// `TransactionError::Reverted`, `TransactionError::Timeout` or
    /// `Error::Rpc` after exhausting transient retries.
    async fn wait_for_transaction(
        &self,
        hash: &str,
        confirmations: u64,
    ) -> Result<TransactionReceipt>;

    /// Register an account-change callback; `None` means access was revoked.
    fn on_account_change(
        &self,
        callback: Box<dyn Fn(Option<String>) + Send + Sync>,
    ) -> Subscription;

    /// Register a chain-change callback.
    fn on_chain_change(&self, callback: Box<dyn Fn(ChainId) + Send + Sync>) -> Subscription;

    /// Register a disconnect callback.
    fn on_disconnect(&self, callback: Box<dyn Fn() + Send + Sync>) -> Subscription;

    /// Sizes of the three listener sets.
    fn listener_counts(&self) -> ListenerCounts;

    /// Feed a provider-originated event into the adapter.
    fn handle_event(&self, event: ProviderEvent);
}
