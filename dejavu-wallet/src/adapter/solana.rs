//! Solana adapter over a wallet-standard [`SolanaProvider`].
//!
//! Solana has a single network in scope, so switching chains never reaches
//! the wallet. Confirmation depth is the cluster's confirmation count for the
//! signature; a rooted (finalized) signature reports [`FINALIZED`].

use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::{AdapterBuilder, AdapterCore, ChainAdapter, ProviderSlot, delegate_to_core};
use crate::chain::{ChainFamily, ChainId};
use crate::error::{Error, Result};
use crate::provider::{ProviderError, SolanaProvider};
use crate::tracker::{ConfirmationSource, TransactionTracker, TxProgress};
use crate::types::{TransactionReceipt, TransactionRequest};

const FAMILY: ChainFamily = ChainFamily::Solana;

/// Confirmation count reported for rooted signatures; satisfies any request.
pub const FINALIZED: u64 = u64::MAX;

/// Builder for [`SolanaAdapter`].
pub type SolanaAdapterBuilder = AdapterBuilder<dyn SolanaProvider>;

impl AdapterBuilder<dyn SolanaProvider> {
    /// Build the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the supported set names a network of
    /// another family.
    pub fn build(self) -> Result<SolanaAdapter> {
        let parts = self.into_parts(FAMILY)?;
        Ok(SolanaAdapter {
            core: parts.core,
            provider: parts.provider,
            tracker: parts.tracker,
        })
    }
}

/// Adapter for Solana wallets.
#[derive(Debug)]
pub struct SolanaAdapter {
    core: Arc<AdapterCore>,
    provider: ProviderSlot<dyn SolanaProvider>,
    tracker: TransactionTracker,
}

impl SolanaAdapter {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> SolanaAdapterBuilder {
        SolanaAdapterBuilder::default()
    }

    /// Install or replace the native provider.
    pub fn install_provider(&self, provider: Arc<dyn SolanaProvider>) {
        self.provider.install(provider);
    }

    /// Whether a native provider is present.
    #[must_use]
    pub fn has_provider(&self) -> bool {
        self.provider.is_installed()
    }

    async fn establish(&self, chain: Option<ChainId>) -> Result<(String, Arc<dyn SolanaProvider>)> {
        let target = self.core.target_chain(chain)?;
        let provider = self.provider.get()?;
        let pubkey = provider
            .connect(false)
            .await
            .map_err(|e| e.into_connection(target))?;
        check_pubkey(&pubkey)?;
        Ok((pubkey, provider))
    }
}

#[async_trait]
impl ChainAdapter for SolanaAdapter {
    delegate_to_core!();

    #[instrument(skip(self), fields(family = "solana"))]
    async fn connect(&self, chain: Option<ChainId>) -> Result<String> {
        self.core.begin_connect();
        match self.establish(chain).await {
            Ok((pubkey, provider)) => {
                self.core.connected(pubkey.clone(), ChainId::Solana);
                self.core.attach(provider.events());
                Ok(pubkey)
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
        let pubkey = match provider.connect(true).await {
            Ok(pubkey) => pubkey,
            Err(ProviderError::UserRejected | ProviderError::Unauthorized) => {
                debug!("Solana wallet not trusted, skipping silent reconnect");
                return Ok(None);
            }
            Err(err) => return Err(err.into_rpc()),
        };
        check_pubkey(&pubkey)?;
        self.core.connected(pubkey.clone(), ChainId::Solana);
        self.core.attach(provider.events());
        Ok(Some(pubkey))
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(provider) = self.provider.current() {
            if let Err(err) = provider.disconnect().await {
                warn!(error = %err, "Solana wallet disconnect failed, clearing local state anyway");
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
        check_pubkey(address)?;
        let lamports = self
            .provider
            .get()?
            .balance(address)
            .await
            .map_err(ProviderError::into_rpc)?;
        Ok(U256::from(lamports))
    }

    async fn sign_message(&self, message: &[u8]) -> Result<String> {
        self.core.require_address()?;
        self.provider.get()?
            .sign_message(message)
            .await
            .map_err(|e| e.into_signing(FAMILY, "signMessage"))
    }

    async fn sign_typed_data(&self, _data: &Value) -> Result<String> {
        Err(Error::not_supported(FAMILY, "signTypedData"))
    }

    #[instrument(skip_all, fields(family = "solana", to = %tx.to))]
    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<String> {
        validate_transaction(tx)?;
        self.core.require_address()?;
        let signature = self
            .provider
            .get()?
            .send_transaction(tx)
            .await
            .map_err(ProviderError::into_transaction)?;
        info!(%signature, "Solana transaction submitted");
        Ok(signature)
    }

    async fn wait_for_transaction(
        &self,
        hash: &str,
        confirmations: u64,
    ) -> Result<TransactionReceipt> {
        let provider = self.provider.get()?;
        let source = SolanaConfirmations {
            provider: provider.as_ref(),
        };
        self.tracker.wait(&source, hash, confirmations).await
    }
}

struct SolanaConfirmations<'a> {
    provider: &'a dyn SolanaProvider,
}

#[async_trait]
impl ConfirmationSource for SolanaConfirmations<'_> {
    async fn poll(&self, signature: &str) -> Result<TxProgress> {
        let Some(status) = self
            .provider
            .signature_status(signature)
            .await
            .map_err(ProviderError::into_rpc)?
        else {
            return Ok(TxProgress::Pending);
        };
        if let Some(reason) = status.err {
            return Ok(TxProgress::Reverted {
                reason: Some(reason),
            });
        }
        let mut receipt = TransactionReceipt::new(signature, status.slot);
        receipt.gas_used = u128::from(status.fee);
        receipt.effective_gas_price = 1;
        receipt.confirmations = status.confirmations.unwrap_or(FINALIZED);
        Ok(TxProgress::Included(receipt))
    }
}

/// Ed25519 public key length.
const PUBKEY_LEN: usize = 32;

/// Base58 text that decodes to exactly a 32-byte key.
fn is_base58_pubkey(value: &str) -> bool {
    (32..=44).contains(&value.len())
        && bs58::decode(value)
            .into_vec()
            .is_ok_and(|bytes| bytes.len() == PUBKEY_LEN)
}

fn check_pubkey(value: &str) -> Result<()> {
    if is_base58_pubkey(value) {
        Ok(())
    } else {
        Err(Error::invalid_address(FAMILY, value))
    }
}

/// Check a request against Solana rules before it reaches the wallet.
///
/// # Errors
///
/// Returns `TransactionError::Invalid` describing the first violated rule.
pub fn validate_transaction(tx: &TransactionRequest) -> Result<()> {
    if !is_base58_pubkey(&tx.to) {
        return Err(Error::invalid_transaction(format!(
            "'{}' is not a base58 public key",
            tx.to
        )));
    }
    if tx.gas.is_some() || tx.has_evm_fee_fields() {
        return Err(Error::invalid_transaction(
            "gas and fee-market fields do not apply to Solana",
        ));
    }
    if tx.nonce.is_some() {
        return Err(Error::invalid_transaction("Solana transactions carry no nonce"));
    }
    if !tx.has_value() && tx.data.is_none() {
        return Err(Error::invalid_transaction(
            "a Solana transfer needs lamports or a serialized transaction",
        ));
    }
    Ok(())
}
