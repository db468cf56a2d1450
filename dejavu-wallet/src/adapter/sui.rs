//! Sui adapter over a wallet-standard [`SuiProvider`].
//!
//! Finality on Sui is measured in checkpoints: a transaction has
//! `latest - tx_checkpoint + 1` confirmations once it is checkpointed.

use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::{AdapterBuilder, AdapterCore, ChainAdapter, ProviderSlot, delegate_to_core};
use crate::chain::{ChainFamily, ChainId};
use crate::error::{ConnectionError, Error, Result};
use crate::provider::{ProviderError, SuiProvider};
use crate::tracker::{ConfirmationSource, TransactionTracker, TxProgress};
use crate::types::{TransactionReceipt, TransactionRequest};

const FAMILY: ChainFamily = ChainFamily::Sui;

/// Builder for [`SuiAdapter`].
pub type SuiAdapterBuilder = AdapterBuilder<dyn SuiProvider>;

impl AdapterBuilder<dyn SuiProvider> {
    /// Build the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the supported set names a network of
    /// another family.
    pub fn build(self) -> Result<SuiAdapter> {
        let parts = self.into_parts(FAMILY)?;
        Ok(SuiAdapter {
            core: parts.core,
            provider: parts.provider,
            tracker: parts.tracker,
        })
    }
}

/// Adapter for Sui wallets.
#[derive(Debug)]
pub struct SuiAdapter {
    core: Arc<AdapterCore>,
    provider: ProviderSlot<dyn SuiProvider>,
    tracker: TransactionTracker,
}

impl SuiAdapter {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> SuiAdapterBuilder {
        SuiAdapterBuilder::default()
    }

    /// Install or replace the native provider.
    pub fn install_provider(&self, provider: Arc<dyn SuiProvider>) {
        self.provider.install(provider);
    }

    /// Whether a native provider is present.
    #[must_use]
    pub fn has_provider(&self) -> bool {
        self.provider.is_installed()
    }

    async fn establish(&self, chain: Option<ChainId>) -> Result<(String, Arc<dyn SuiProvider>)> {
        let target = self.core.target_chain(chain)?;
        let provider = self.provider.get()?;
        let accounts = provider
            .request_accounts()
            .await
            .map_err(|e| e.into_connection(target))?;
        let address = accounts
            .into_iter()
            .next()
            .ok_or(ConnectionError::Rejected)?;
        check_address(&address)?;
        Ok((address, provider))
    }
}

#[async_trait]
impl ChainAdapter for SuiAdapter {
    delegate_to_core!();

    #[instrument(skip(self), fields(family = "sui"))]
    async fn connect(&self, chain: Option<ChainId>) -> Result<String> {
        self.core.begin_connect();
        match self.establish(chain).await {
            Ok((address, provider)) => {
                self.core.connected(address.clone(), ChainId::Sui);
                self.core.attach(provider.events());
                Ok(address)
            }
            Err(err) => {
                self.core.connect_failed(&err);
                Err(err)
            }
        }
    }

    async fn reconnect(&self, chain: Option<ChainId>) -> Result<Option<String>> {
        self.core.target_chain(chain)?;
        let Some(provider) = self.provider.current() else {
            return Ok(None);
        };
        let accounts = match provider.accounts().await {
            Ok(accounts) => accounts,
            Err(ProviderError::UserRejected | ProviderError::Unauthorized) => return Ok(None),
            Err(err) => return Err(err.into_rpc()),
        };
        let Some(address) = accounts.into_iter().next() else {
            debug!("Sui wallet has no authorized account, skipping silent reconnect");
            return Ok(None);
        };
        check_address(&address)?;
        self.core.connected(address.clone(), ChainId::Sui);
        self.core.attach(provider.events());
        Ok(Some(address))
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(provider) = self.provider.current() {
            if let Err(err) = provider.disconnect().await {
                warn!(error = %err, "Sui wallet disconnect failed, clearing local state anyway");
            }
        }
        self.core.disconnected();
        Ok(())
    }

    async fn switch_chain(&self, chain: ChainId) -> Result<()> {
        self.core.ensure_supported(chain)?;
        self.core.chain_changed(chain);
        Ok(())
    }

    async fn balance(&self, address: &str) -> Result<U256> {
        check_address(address)?;
        let mist = self
            .provider
            .get()?
            .balance(address)
            .await
            .map_err(ProviderError::into_rpc)?;
        Ok(U256::from(mist))
    }

    async fn sign_message(&self, message: &[u8]) -> Result<String> {
        self.core.require_address()?;
        self.provider.get()?
            .sign_personal_message(message)
            .await
            .map_err(|e| e.into_signing(FAMILY, "signPersonalMessage"))
    }

    async fn sign_typed_data(&self, _data: &Value) -> Result<String> {
        Err(Error::not_supported(FAMILY, "signTypedData"))
    }

    #[instrument(skip_all, fields(family = "sui", to = %tx.to))]
    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<String> {
        validate_transaction(tx)?;
        self.core.require_address()?;
        let digest = self
            .provider
            .get()?
            .sign_and_execute(tx)
            .await
            .map_err(ProviderError::into_transaction)?;
        info!(%digest, "Sui transaction executed");
        Ok(digest)
    }

    async fn wait_for_transaction(
        &self,
        hash: &str,
        confirmations: u64,
    ) -> Result<TransactionReceipt> {
        let provider = self.provider.get()?;
        let source = SuiConfirmations {
            provider: provider.as_ref(),
        };
        self.tracker.wait(&source, hash, confirmations).await
    }
}

struct SuiConfirmations<'a> {
    provider: &'a dyn SuiProvider,
}

#[async_trait]
impl ConfirmationSource for SuiConfirmations<'_> {
    async fn poll(&self, digest: &str) -> Result<TxProgress> {
        let Some(status) = self
            .provider
            .transaction_status(digest)
            .await
            .map_err(ProviderError::into_rpc)?
        else {
            return Ok(TxProgress::Pending);
        };
        if let Some(reason) = status.error {
            return Ok(TxProgress::Reverted {
                reason: Some(reason),
            });
        }
        let Some(checkpoint) = status.checkpoint else {
            return Ok(TxProgress::Pending);
        };
        let latest = self
            .provider
            .latest_checkpoint()
            .await
            .map_err(ProviderError::into_rpc)?;
        let mut receipt = TransactionReceipt::new(digest, checkpoint);
        receipt.gas_used = status.gas_used;
        receipt.effective_gas_price = 1;
        receipt.confirmations = if latest >= checkpoint {
            latest - checkpoint + 1
        } else {
            0
        };
        Ok(TxProgress::Included(receipt))
    }
}

fn is_sui_address(value: &str) -> bool {
    value.strip_prefix("0x").is_some_and(|hex| {
        (1..=64).contains(&hex.len()) && hex.chars().all(|c| c.is_ascii_hexdigit())
    })
}

fn check_address(value: &str) -> Result<()> {
    if is_sui_address(value) {
        Ok(())
    } else {
        Err(Error::invalid_address(FAMILY, value))
    }
}

/// Check a request against Sui rules before it reaches the wallet.
///
/// `gas` is read as the gas budget.
///
/// # Errors
///
/// Returns `TransactionError::Invalid` describing the first violated rule.
pub fn validate_transaction(tx: &TransactionRequest) -> Result<()> {
    if !is_sui_address(&tx.to) {
        return Err(Error::invalid_transaction(format!(
            "'{}' is not a 0x-prefixed Sui address",
            tx.to
        )));
    }
    if tx.gas == Some(0) {
        return Err(Error::invalid_transaction("gas budget must be non-zero"));
    }
    if tx.has_evm_fee_fields() {
        return Err(Error::invalid_transaction(
            "fee-market fields do not apply to Sui; set a gas budget instead",
        ));
    }
    if tx.nonce.is_some() {
        return Err(Error::invalid_transaction("Sui transactions carry no nonce"));
    }
    Ok(())
}
