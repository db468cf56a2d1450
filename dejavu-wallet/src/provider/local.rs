//! A local-key EVM provider.
//!
//! [`LocalEvmProvider`] plays the role of an injected EVM wallet for
//! servers, scripts and tests: keys come from a BIP39 mnemonic ([`kobe`]) or
//! a raw private key, signing is local ([`alloy`] `PrivateKeySigner`), and
//! every configured network gets its own JSON-RPC endpoint.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use alloy::dyn_abi::TypedData;
use alloy::network::{Ethereum, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, B256, U256, hex};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::Signer;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{EvmProvider, ProviderError, ProviderEvent, ProviderResult};
use crate::chain::ChainId;
use crate::error::{Error, Result};
use crate::types::{ReceiptLog, TransactionReceipt, TransactionRequest, TxStatus};

const EVENT_CAPACITY: usize = 16;

/// Builder for constructing a [`LocalEvmProvider`].
///
/// # Examples
///
/// ```rust,ignore
/// let provider = LocalEvmProvider::builder()
///     .mnemonic("abandon abandon ...")
///     .index(0)
///     .chain_rpc(ChainId::Ethereum, "https://eth.llamarpc.com")
///     .chain_rpc(ChainId::Base, "https://mainnet.base.org")
///     .build()
///     .await?;
/// ```
#[derive(Debug, Default)]
pub struct LocalEvmProviderBuilder {
    mnemonic: Option<String>,
    passphrase: Option<String>,
    index: u32,
    private_key: Option<String>,
    endpoints: Vec<(Option<ChainId>, String)>,
    initial_chain: Option<ChainId>,
}

impl LocalEvmProviderBuilder {
    /// Set the BIP39 mnemonic phrase for HD key derivation.
    #[must_use]
    pub fn mnemonic(mut self, mnemonic: impl Into<String>) -> Self {
        self.mnemonic = Some(mnemonic.into());
        self
    }

    /// Set the BIP39 passphrase (optional "25th word").
    #[must_use]
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Set the HD derivation index (default 0).
    #[must_use]
    pub const fn index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    /// Set the private key directly (hex string, with or without 0x prefix).
    #[must_use]
    pub fn private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    /// Add the JSON-RPC endpoint serving `chain`.
    #[must_use]
    pub fn chain_rpc(mut self, chain: ChainId, url: impl Into<String>) -> Self {
        self.endpoints.push((Some(chain), url.into()));
        self
    }

    /// Add an endpoint whose network is detected with `eth_chainId`.
    #[must_use]
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.endpoints.push((None, url.into()));
        self
    }

    /// Network selected right after build (default: the first endpoint).
    #[must_use]
    pub const fn initial_chain(mut self, chain: ChainId) -> Self {
        self.initial_chain = Some(chain);
        self
    }

    /// Build the [`LocalEvmProvider`].
    ///
    /// Either `mnemonic` or `private_key` must be set, plus at least one
    /// endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for missing or invalid keys, unreachable
    /// endpoints, non-EVM chains or an initial chain without an endpoint.
    pub async fn build(self) -> Result<LocalEvmProvider> {
        if self.endpoints.is_empty() {
            return Err(Error::config("at least one rpc endpoint is required"));
        }

        let signer = if let Some(ref mnemonic) = self.mnemonic {
            self.signer_from_mnemonic(mnemonic)?
        } else if let Some(ref key) = self.private_key {
            signer_from_private_key(key)?
        } else {
            return Err(Error::config("either mnemonic or private_key is required"));
        };
        let address = signer.address();

        let mut endpoints = BTreeMap::new();
        let mut order = Vec::with_capacity(self.endpoints.len());
        for (chain, url) in self.endpoints {
            let provider: DynProvider<Ethereum> = ProviderBuilder::new()
                .wallet(signer.clone())
                .connect(&url)
                .await
                .map_err(|e| Error::config(format!("failed to connect to '{url}': {e}")))?
                .erased();

            let id = match chain {
                Some(chain) => chain
                    .evm_id()
                    .ok_or_else(|| Error::config(format!("{chain} is not an EVM chain")))?,
                None => provider
                    .get_chain_id()
                    .await
                    .map_err(|e| Error::config(format!("failed to get chain ID from '{url}': {e}")))?,
            };
            debug!(chain_id = id, %url, "endpoint configured");
            order.push(id);
            endpoints.insert(id, provider);
        }

        let active = match self.initial_chain {
            Some(chain) => chain
                .evm_id()
                .filter(|id| endpoints.contains_key(id))
                .ok_or_else(|| Error::config(format!("no endpoint configured for {chain}")))?,
            None => order[0],
        };

        info!(
            address = %address,
            chain_id = active,
            chains = endpoints.len(),
            "local EVM provider initialized",
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(LocalEvmProvider {
            signer,
            address,
            endpoints,
            active: RwLock::new(active),
            events,
        })
    }

    /// Derive a signer from a BIP39 mnemonic using kobe.
    fn signer_from_mnemonic(&self, mnemonic: &str) -> Result<PrivateKeySigner> {
        let wallet = kobe::Wallet::from_mnemonic(mnemonic, self.passphrase.as_deref())
            .map_err(|e| Error::config(format!("invalid mnemonic: {e}")))?;

        let deriver = kobe_eth::Deriver::new(&wallet);
        let derived = deriver
            .derive(self.index)
            .map_err(|e| Error::config(format!("key derivation failed: {e}")))?;

        let key_hex = &*derived.private_key_hex;
        key_hex
            .parse::<PrivateKeySigner>()
            .map_err(|e| Error::config(format!("signer creation failed: {e}")))
    }
}

fn signer_from_private_key(key: &str) -> Result<PrivateKeySigner> {
    let key = key.strip_prefix("0x").unwrap_or(key);
    key.parse::<PrivateKeySigner>()
        .map_err(|e| Error::config(format!("invalid private key: {e}")))
}

/// An [`EvmProvider`] that signs with a local key.
///
/// The account is always authorized, so `request_accounts` never prompts;
/// `switch_chain` moves between the configured endpoints and emits
/// [`ProviderEvent::ChainChanged`].
pub struct LocalEvmProvider {
    signer: PrivateKeySigner,
    address: Address,
    endpoints: BTreeMap<u64, DynProvider<Ethereum>>,
    active: RwLock<u64>,
    events: broadcast::Sender<ProviderEvent>,
}

impl std::fmt::Debug for LocalEvmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEvmProvider")
            .field("address", &self.address)
            .field("chains", &self.endpoints.keys().collect::<Vec<_>>())
            .field("active", &self.active_id())
            .finish_non_exhaustive()
    }
}

impl LocalEvmProvider {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> LocalEvmProviderBuilder {
        LocalEvmProviderBuilder::default()
    }

    /// The signing address.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    fn active_id(&self) -> u64 {
        *self.active.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn rpc(&self) -> ProviderResult<&DynProvider<Ethereum>> {
        self.endpoints
            .get(&self.active_id())
            .ok_or(ProviderError::UnrecognizedChain)
    }

    fn ensure_signer(&self, address: Address) -> ProviderResult<()> {
        if address == self.address {
            Ok(())
        } else {
            Err(ProviderError::Unauthorized)
        }
    }
}

#[async_trait]
impl EvmProvider for LocalEvmProvider {
    async fn request_accounts(&self) -> ProviderResult<Vec<Address>> {
        Ok(vec![self.address])
    }

    async fn accounts(&self) -> ProviderResult<Vec<Address>> {
        Ok(vec![self.address])
    }

    async fn chain_id(&self) -> ProviderResult<u64> {
        Ok(self.active_id())
    }

    async fn switch_chain(&self, chain_id: u64) -> ProviderResult<()> {
        if !self.endpoints.contains_key(&chain_id) {
            return Err(ProviderError::UnrecognizedChain);
        }
        let previous = std::mem::replace(
            &mut *self.active.write().unwrap_or_else(PoisonError::into_inner),
            chain_id,
        );
        if previous != chain_id {
            debug!(from = previous, to = chain_id, "local provider switched endpoint");
            if let Some(chain) = ChainId::from_evm_id(chain_id) {
                // no receivers is fine
                let _ = self.events.send(ProviderEvent::ChainChanged(chain));
            }
        }
        Ok(())
    }

    async fn balance(&self, address: Address) -> ProviderResult<U256> {
        self.rpc()?
            .get_balance(address)
            .await
            .map_err(map_transport)
    }

    async fn personal_sign(&self, message: &[u8], address: Address) -> ProviderResult<String> {
        self.ensure_signer(address)?;
        let sig = self
            .signer
            .sign_message(message)
            .await
            .map_err(|e| ProviderError::InvalidParams(format!("message signing failed: {e}")))?;
        Ok(hex::encode_prefixed(sig.as_bytes()))
    }

    async fn sign_typed_data(&self, address: Address, data: &Value) -> ProviderResult<String> {
        self.ensure_signer(address)?;
        let typed: TypedData = serde_json::from_value(data.clone())
            .map_err(|e| ProviderError::InvalidParams(format!("malformed typed data: {e}")))?;
        let hash = typed
            .eip712_signing_hash()
            .map_err(|e| ProviderError::InvalidParams(format!("typed data hashing failed: {e}")))?;
        let sig = self
            .signer
            .sign_hash(&hash)
            .await
            .map_err(|e| ProviderError::InvalidParams(format!("typed data signing failed: {e}")))?;
        Ok(hex::encode_prefixed(sig.as_bytes()))
    }

    async fn send_transaction(
        &self,
        from: Address,
        tx: &TransactionRequest,
    ) -> ProviderResult<String> {
        self.ensure_signer(from)?;
        let to = tx
            .to
            .parse::<Address>()
            .map_err(|e| ProviderError::InvalidParams(format!("invalid recipient: {e}")))?;

        let mut request = alloy::rpc::types::TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_value(tx.value.unwrap_or_default());
        if let Some(data) = &tx.data {
            request = request.with_input(data.clone());
        }
        if let Some(gas) = tx.gas {
            request = request.with_gas_limit(gas);
        }
        if let Some(gas_price) = tx.gas_price {
            request = request.with_gas_price(gas_price);
        }
        if let Some(max_fee) = tx.max_fee_per_gas {
            request = request.with_max_fee_per_gas(max_fee);
        }
        if let Some(priority) = tx.max_priority_fee_per_gas {
            request = request.with_max_priority_fee_per_gas(priority);
        }
        if let Some(nonce) = tx.nonce {
            request = request.with_nonce(nonce);
        }

        let pending = self
            .rpc()?
            .send_transaction(request)
            .await
            .map_err(map_transport)?;
        Ok(format!("{:#x}", pending.tx_hash()))
    }

    async fn block_number(&self) -> ProviderResult<u64> {
        self.rpc()?.get_block_number().await.map_err(map_transport)
    }

    async fn transaction_receipt(&self, hash: &str) -> ProviderResult<Option<TransactionReceipt>> {
        let hash = hash
            .parse::<B256>()
            .map_err(|e| ProviderError::InvalidParams(format!("invalid transaction hash: {e}")))?;
        let Some(receipt) = self
            .rpc()?
            .get_transaction_receipt(hash)
            .await
            .map_err(map_transport)?
        else {
            return Ok(None);
        };
        // Mined receipts always carry a block number.
        let Some(block_number) = receipt.block_number() else {
            return Ok(None);
        };

        let mut converted = TransactionReceipt::new(format!("{hash:#x}"), block_number);
        converted.status = if receipt.status() {
            TxStatus::Confirmed
        } else {
            TxStatus::Failed
        };
        converted.block_hash = receipt.block_hash().map(|h| format!("{h:#x}"));
        converted.gas_used = u128::from(receipt.gas_used());
        converted.effective_gas_price = receipt.effective_gas_price();
        converted.logs = receipt
            .inner
            .logs()
            .iter()
            .map(|log| ReceiptLog {
                address: log.address().to_checksum(None),
                topics: log.topics().iter().map(|t| format!("{t:#x}")).collect(),
                data: hex::encode_prefixed(&log.data().data),
            })
            .collect();
        Ok(Some(converted))
    }

    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        Some(self.events.subscribe())
    }
}

/// Classify a transport failure: JSON-RPC error payloads by code, anything
/// else as a transient transport error.
fn map_transport(err: TransportError) -> ProviderError {
    match err.as_error_resp() {
        Some(payload) => ProviderError::from_rpc_code(payload.code, payload.message.to_string()),
        None => ProviderError::Transport(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const LOCAL_RPC: &str = "http://127.0.0.1:8545";

    async fn local() -> LocalEvmProvider {
        LocalEvmProvider::builder()
            .private_key(TEST_KEY)
            .chain_rpc(ChainId::Ethereum, LOCAL_RPC)
            .chain_rpc(ChainId::Base, LOCAL_RPC)
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_private_key_address() {
        let provider = local().await;
        assert_eq!(
            provider.address().to_checksum(None),
            "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23"
        );
        assert_eq!(provider.accounts().await.unwrap(), vec![provider.address()]);
        assert_eq!(provider.chain_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mnemonic_derivation() {
        let provider = LocalEvmProvider::builder()
            .mnemonic(TEST_MNEMONIC)
            .chain_rpc(ChainId::Ethereum, LOCAL_RPC)
            .build()
            .await
            .unwrap();
        assert_eq!(
            provider.address().to_checksum(None),
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"
        );
    }

    #[tokio::test]
    async fn test_builder_requires_key_and_endpoint() {
        let err = LocalEvmProvider::builder()
            .chain_rpc(ChainId::Ethereum, LOCAL_RPC)
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = LocalEvmProvider::builder()
            .private_key(TEST_KEY)
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = LocalEvmProvider::builder()
            .private_key(TEST_KEY)
            .chain_rpc(ChainId::Solana, LOCAL_RPC)
            .build()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("solana"));
    }

    #[tokio::test]
    async fn test_switch_chain_emits_event() {
        let provider = local().await;
        let mut events = provider.events().unwrap();

        provider.switch_chain(8453).await.unwrap();
        assert_eq!(provider.chain_id().await.unwrap(), 8453);
        assert_eq!(
            events.recv().await.unwrap(),
            ProviderEvent::ChainChanged(ChainId::Base)
        );

        assert_eq!(
            provider.switch_chain(137).await.unwrap_err(),
            ProviderError::UnrecognizedChain
        );
        assert_eq!(provider.chain_id().await.unwrap(), 8453);
    }

    #[tokio::test]
    async fn test_personal_sign_offline() {
        let provider = local().await;
        let sig = provider
            .personal_sign(b"hello", provider.address())
            .await
            .unwrap();
        assert!(sig.starts_with("0x"));
        assert_eq!(sig.len(), 2 + 65 * 2);

        let other = Address::repeat_byte(0x11);
        assert_eq!(
            provider.personal_sign(b"hello", other).await.unwrap_err(),
            ProviderError::Unauthorized
        );
    }

    #[tokio::test]
    async fn test_typed_data_offline() {
        let provider = local().await;
        let data = json!({
            "types": {
                "EIP712Domain": [
                    {"name": "name", "type": "string"},
                    {"name": "chainId", "type": "uint256"}
                ],
                "Login": [{"name": "nonce", "type": "uint256"}]
            },
            "primaryType": "Login",
            "domain": {"name": "dejavu", "chainId": 1},
            "message": {"nonce": 7}
        });
        let sig = provider
            .sign_typed_data(provider.address(), &data)
            .await
            .unwrap();
        assert_eq!(sig.len(), 2 + 65 * 2);

        let err = provider
            .sign_typed_data(provider.address(), &json!({"primaryType": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidParams(_)));
    }
}
