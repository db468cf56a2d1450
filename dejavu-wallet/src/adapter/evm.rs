//! EVM adapter over an EIP-1193 shaped [`EvmProvider`].
//!
//! Addresses are reported EIP-55 checksummed, typed data is EIP-712, and
//! confirmation depth is `head - included_block + 1`.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::{AdapterBuilder, AdapterCore, ChainAdapter, ProviderSlot, delegate_to_core};
use crate::chain::{ChainFamily, ChainId};
use crate::error::{ConnectionError, Error, Result, SigningError};
use crate::provider::{EvmProvider, ProviderError};
use crate::tracker::{ConfirmationSource, TransactionTracker, TxProgress};
use crate::types::{TransactionReceipt, TransactionRequest, TxStatus};

const FAMILY: ChainFamily = ChainFamily::Evm;

/// Builder for [`EvmAdapter`].
pub type EvmAdapterBuilder = AdapterBuilder<dyn EvmProvider>;

impl AdapterBuilder<dyn EvmProvider> {
    /// Build the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the supported set is empty or contains a
    /// non-EVM network.
    pub fn build(self) -> Result<EvmAdapter> {
        let parts = self.into_parts(FAMILY)?;
        Ok(EvmAdapter {
            core: parts.core,
            provider: parts.provider,
            tracker: parts.tracker,
        })
    }
}

/// Adapter for EVM wallets.
#[derive(Debug)]
pub struct EvmAdapter {
    core: Arc<AdapterCore>,
    provider: ProviderSlot<dyn EvmProvider>,
    tracker: TransactionTracker,
}

impl EvmAdapter {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> EvmAdapterBuilder {
        EvmAdapterBuilder::default()
    }

    /// Install or replace the native provider, e.g. once the user installed
    /// a wallet extension after a failed connect.
    pub fn install_provider(&self, provider: Arc<dyn EvmProvider>) {
        self.provider.install(provider);
    }

    /// Whether a native provider is present.
    #[must_use]
    pub fn has_provider(&self) -> bool {
        self.provider.is_installed()
    }

    fn connected_address(&self) -> Result<Address> {
        let address = self.core.require_address()?;
        parse_address(&address)
    }

    async fn establish(
        &self,
        provider: &dyn EvmProvider,
        requested: Option<ChainId>,
    ) -> Result<(String, ChainId)> {
        let fallback = self.core.target_chain(requested)?;
        let accounts = provider
            .request_accounts()
            .await
            .map_err(|e| e.into_connection(fallback))?;
        let address = accounts
            .first()
            .copied()
            .ok_or(ConnectionError::Rejected)?;

        let current = provider
            .chain_id()
            .await
            .map_err(ProviderError::into_rpc)?;
        let current = ChainId::from_evm_id(current);
        let target = match (requested, current) {
            (Some(chain), _) => chain,
            (None, Some(chain)) if self.core.supported_chains().contains(&chain) => chain,
            _ => fallback,
        };
        if current != Some(target) {
            debug!(from = ?current, to = %target, "moving wallet to target chain");
            provider
                .switch_chain(evm_id(target)?)
                .await
                .map_err(|e| e.into_connection(target))?;
        }
        Ok((address.to_checksum(None), target))
    }

    async fn authorized(
        &self,
        provider: &dyn EvmProvider,
        requested: Option<ChainId>,
    ) -> Result<Option<(String, ChainId)>> {
        let accounts = match provider.accounts().await {
            Ok(accounts) => accounts,
            Err(ProviderError::UserRejected | ProviderError::Unauthorized) => return Ok(None),
            Err(err) => return Err(err.into_rpc()),
        };
        let Some(address) = accounts.first() else {
            return Ok(None);
        };
        let current = provider
            .chain_id()
            .await
            .map_err(ProviderError::into_rpc)?;
        let Some(current) = ChainId::from_evm_id(current)
            .filter(|chain| self.core.supported_chains().contains(chain))
        else {
            return Ok(None);
        };
        if requested.is_some_and(|chain| chain != current) {
            return Ok(None);
        }
        Ok(Some((address.to_checksum(None), current)))
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    delegate_to_core!();

    #[instrument(skip(self), fields(family = "evm"))]
    async fn connect(&self, chain: Option<ChainId>) -> Result<String> {
        self.core.begin_connect();
        let outcome = match self.provider.get() {
            Ok(provider) => self
                .establish(provider.as_ref(), chain)
                .await
                .map(|identity| (identity, provider)),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(((address, chain), provider)) => {
                self.core.connected(address.clone(), chain);
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
        let Some(provider) = self.provider.current() else {
            return Ok(None);
        };
        let Some((address, chain)) = self.authorized(provider.as_ref(), chain).await? else {
            debug!("EVM wallet not authorized, skipping silent reconnect");
            return Ok(None);
        };
        self.core.connected(address.clone(), chain);
        self.core.attach(provider.events());
        Ok(Some(address))
    }

    async fn disconnect(&self) -> Result<()> {
        // EIP-1193 has no revoke; forgetting the identity is the disconnect.
        self.core.disconnected();
        Ok(())
    }

    #[instrument(skip(self), fields(family = "evm"))]
    async fn switch_chain(&self, chain: ChainId) -> Result<()> {
        self.core.ensure_supported(chain)?;
        let provider = self.provider.get()?;
        provider
            .switch_chain(evm_id(chain)?)
            .await
            .map_err(|e| e.into_connection(chain))?;
        info!(%chain, "EVM chain switched");
        self.core.chain_changed(chain);
        Ok(())
    }

    async fn balance(&self, address: &str) -> Result<U256> {
        let address = parse_address(address)?;
        self.provider.get()?
            .balance(address)
            .await
            .map_err(ProviderError::into_rpc)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<String> {
        let address = self.connected_address()?;
        self.provider.get()?
            .personal_sign(message, address)
            .await
            .map_err(|e| e.into_signing(FAMILY, "personal_sign"))
    }

    async fn sign_typed_data(&self, data: &Value) -> Result<String> {
        check_typed_data(data)?;
        let address = self.connected_address()?;
        self.provider.get()?
            .sign_typed_data(address, data)
            .await
            .map_err(|e| e.into_signing(FAMILY, "signTypedData"))
    }

    #[instrument(skip_all, fields(family = "evm", to = %tx.to))]
    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<String> {
        validate_transaction(tx)?;
        let from = self.connected_address()?;
        let hash = self
            .provider
            .get()?
            .send_transaction(from, tx)
            .await
            .map_err(ProviderError::into_transaction)?;
        info!(%hash, "EVM transaction submitted");
        Ok(hash)
    }

    async fn wait_for_transaction(
        &self,
        hash: &str,
        confirmations: u64,
    ) -> Result<TransactionReceipt> {
        let provider = self.provider.get()?;
        let source = EvmConfirmations {
            provider: provider.as_ref(),
        };
        self.tracker.wait(&source, hash, confirmations).await
    }
}

struct EvmConfirmations<'a> {
    provider: &'a dyn EvmProvider,
}

#[async_trait]
impl ConfirmationSource for EvmConfirmations<'_> {
    async fn poll(&self, hash: &str) -> Result<TxProgress> {
        let Some(mut receipt) = self
            .provider
            .transaction_receipt(hash)
            .await
            .map_err(ProviderError::into_rpc)?
        else {
            return Ok(TxProgress::Pending);
        };
        if receipt.status == TxStatus::Failed {
            let reason = self.provider.revert_reason(hash).await.ok().flatten();
            return Ok(TxProgress::Reverted { reason });
        }
        let head = self
            .provider
            .block_number()
            .await
            .map_err(ProviderError::into_rpc)?;
        receipt.confirmations = depth(head, receipt.block_number);
        Ok(TxProgress::Included(receipt))
    }
}

/// Blocks on top of `included`, counting the including block itself.
const fn depth(head: u64, included: u64) -> u64 {
    if head >= included {
        head - included + 1
    } else {
        0
    }
}

fn evm_id(chain: ChainId) -> Result<u64> {
    chain.evm_id().ok_or(Error::unsupported_chain(chain))
}

fn parse_address(address: &str) -> Result<Address> {
    address
        .parse::<Address>()
        .map_err(|_| Error::invalid_address(FAMILY, address))
}

/// Check a request against EVM rules before it reaches the wallet.
///
/// # Errors
///
/// Returns `TransactionError::Invalid` describing the first violated rule.
pub fn validate_transaction(tx: &TransactionRequest) -> Result<()> {
    if tx.to.parse::<Address>().is_err() {
        return Err(Error::invalid_transaction(format!(
            "'{}' is not a 20-byte hex address",
            tx.to
        )));
    }
    if tx.gas == Some(0) {
        return Err(Error::invalid_transaction("gas limit must be non-zero"));
    }
    let eip1559 = tx.max_fee_per_gas.is_some() || tx.max_priority_fee_per_gas.is_some();
    if tx.gas_price.is_some() && eip1559 {
        return Err(Error::invalid_transaction(
            "gas_price cannot be combined with EIP-1559 fee fields",
        ));
    }
    if let (Some(max_fee), Some(priority)) = (tx.max_fee_per_gas, tx.max_priority_fee_per_gas) {
        if priority > max_fee {
            return Err(Error::invalid_transaction(format!(
                "max_priority_fee_per_gas ({priority}) exceeds max_fee_per_gas ({max_fee})"
            )));
        }
    }
    Ok(())
}

fn check_typed_data(data: &Value) -> Result<()> {
    let Some(object) = data.as_object() else {
        return Err(SigningError::Invalid("typed data must be a JSON object".into()).into());
    };
    for field in ["types", "primaryType", "domain", "message"] {
        if !object.contains_key(field) {
            return Err(SigningError::Invalid(format!("typed data is missing '{field}'")).into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::adapter::AdapterStatus;
    use crate::error::TransactionError;

    const RECIPIENT: &str = "0x000000000000000000000000000000000000dEaD";

    fn invalid(tx: &TransactionRequest) -> String {
        match validate_transaction(tx) {
            Err(Error::Transaction(TransactionError::Invalid(msg))) => msg,
            other => panic!("expected invalid transaction, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_transfer() {
        let tx = TransactionRequest::new(RECIPIENT)
            .with_value(U256::from(1))
            .with_eip1559_fees(30, 2)
            .with_gas(21_000);
        assert!(validate_transaction(&tx).is_ok());
    }

    #[test]
    fn test_rejects_malformed_recipient() {
        let msg = invalid(&TransactionRequest::new("0x1234"));
        assert!(msg.contains("0x1234"));
        invalid(&TransactionRequest::new("GjwcWFQYzemBtpUoN5fMAP2FZviTtMRWCmrppGuTthJS"));
    }

    #[test]
    fn test_rejects_mixed_fee_models() {
        let tx = TransactionRequest::new(RECIPIENT)
            .with_gas_price(10)
            .with_eip1559_fees(30, 2);
        assert!(invalid(&tx).contains("gas_price"));
    }

    #[test]
    fn test_rejects_priority_above_cap() {
        let tx = TransactionRequest::new(RECIPIENT).with_eip1559_fees(10, 11);
        assert!(invalid(&tx).contains("exceeds"));
    }

    #[test]
    fn test_rejects_zero_gas() {
        invalid(&TransactionRequest::new(RECIPIENT).with_gas(0));
    }

    #[test]
    fn test_typed_data_shape() {
        let good = json!({"types": {}, "primaryType": "Mail", "domain": {}, "message": {}});
        assert!(check_typed_data(&good).is_ok());
        let err = check_typed_data(&json!({"types": {}})).unwrap_err();
        assert!(matches!(err, Error::Signing(SigningError::Invalid(_))));
        assert!(check_typed_data(&json!("Mail")).is_err());
    }

    #[test]
    fn test_depth() {
        assert_eq!(depth(100, 100), 1);
        assert_eq!(depth(102, 100), 3);
        assert_eq!(depth(99, 100), 0);
    }

    #[tokio::test]
    async fn test_connect_without_provider() {
        let adapter = EvmAdapter::builder().build().unwrap();
        assert!(!adapter.has_provider());
        let err = adapter.connect(None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ConnectionError::NoProviderFound(ChainFamily::Evm))
        ));
        assert_eq!(adapter.connection_status(), AdapterStatus::Error);
        assert_eq!(adapter.reconnect(None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unsupported_switch_fails_before_provider() {
        let adapter = EvmAdapter::builder()
            .supported_chains([ChainId::Ethereum, ChainId::Base])
            .build()
            .unwrap();
        let err = adapter.switch_chain(ChainId::Polygon).await.unwrap_err();
        assert!(err.to_string().contains("polygon"));
    }

    #[test]
    fn test_builder_rejects_foreign_chain() {
        assert!(
            EvmAdapter::builder()
                .supported_chains([ChainId::Solana])
                .build()
                .is_err()
        );
    }
}
