//! Chain-agnostic value types shared by adapters and the controller.

use std::fmt;

use alloy::primitives::{Bytes, U256};
use serde::{Deserialize, Serialize, Serializer};

use crate::chain::{ChainFamily, ChainId};

/// A transaction to submit through the connected wallet.
///
/// Addresses stay strings so one request type serves every family; each
/// adapter validates the fields its family understands before submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Recipient address in the family's native encoding.
    pub to: String,
    /// Amount in the chain's smallest unit (wei, lamports, MIST).
    pub value: Option<U256>,
    /// Calldata (EVM) or a serialized transaction (Solana, Sui).
    pub data: Option<Bytes>,
    /// Gas limit (EVM) or gas budget (Sui).
    pub gas: Option<u64>,
    /// Legacy gas price.
    pub gas_price: Option<u128>,
    /// EIP-1559 fee cap.
    pub max_fee_per_gas: Option<u128>,
    /// EIP-1559 priority fee.
    pub max_priority_fee_per_gas: Option<u128>,
    /// Explicit nonce.
    pub nonce: Option<u64>,
}

impl TransactionRequest {
    /// Create a request targeting `to`.
    #[must_use]
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            ..Self::default()
        }
    }

    /// Set the transferred value.
    #[must_use]
    pub const fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    /// Set calldata or a serialized transaction payload.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the gas limit / budget.
    #[must_use]
    pub const fn with_gas(mut self, gas: u64) -> Self {
        self.gas = Some(gas);
        self
    }

    /// Set a legacy gas price.
    #[must_use]
    pub const fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    /// Set EIP-1559 fee parameters.
    #[must_use]
    pub const fn with_eip1559_fees(mut self, max_fee: u128, max_priority_fee: u128) -> Self {
        self.max_fee_per_gas = Some(max_fee);
        self.max_priority_fee_per_gas = Some(max_priority_fee);
        self
    }

    /// Set an explicit nonce.
    #[must_use]
    pub const fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Whether the request moves a non-zero amount.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.value.is_some_and(|v| !v.is_zero())
    }

    /// Whether any EVM fee-market field is set.
    #[must_use]
    pub const fn has_evm_fee_fields(&self) -> bool {
        self.gas_price.is_some()
            || self.max_fee_per_gas.is_some()
            || self.max_priority_fee_per_gas.is_some()
    }
}

/// Settlement status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Submitted, not yet settled.
    Pending,
    /// Included and confirmed to the requested depth.
    Confirmed,
    /// Included but failed on chain.
    Failed,
}

/// An event log emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLog {
    /// Emitting contract / program / package.
    pub address: String,
    /// Indexed topics, hex encoded.
    pub topics: Vec<String>,
    /// Non-indexed payload, hex encoded.
    pub data: String,
}

/// The settled outcome of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Transaction hash (EVM), signature (Solana) or digest (Sui).
    pub hash: String,
    /// Settlement status.
    pub status: TxStatus,
    /// Block number, slot or checkpoint that included the transaction.
    pub block_number: u64,
    /// Including block hash, when the family exposes one.
    pub block_hash: Option<String>,
    /// Gas (or compute units) consumed.
    pub gas_used: u128,
    /// Price paid per unit of gas.
    pub effective_gas_price: u128,
    /// Emitted logs.
    pub logs: Vec<ReceiptLog>,
    /// Confirmations observed when the receipt was produced.
    pub confirmations: u64,
}

impl TransactionReceipt {
    /// Create a pending receipt for `hash` included at `block_number`.
    #[must_use]
    pub fn new(hash: impl Into<String>, block_number: u64) -> Self {
        Self {
            hash: hash.into(),
            status: TxStatus::Pending,
            block_number,
            block_hash: None,
            gas_used: 0,
            effective_gas_price: 0,
            logs: Vec::new(),
            confirmations: 0,
        }
    }

    /// Total fee paid, `gas_used * effective_gas_price`.
    #[must_use]
    pub fn fee(&self) -> U256 {
        U256::from(self.gas_used) * U256::from(self.effective_gas_price)
    }
}

/// Connection status of the wallet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    /// No wallet connected.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// A wallet is connected.
    Connected,
    /// The last connect attempt failed.
    Error,
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        })
    }
}

/// Snapshot of the process-wide wallet state.
///
/// `address`, `chain_id`, `chain_type` and `balance` are `Some` exactly when
/// `status` is [`WalletStatus::Connected`]; `error` is `Some` exactly when it
/// is [`WalletStatus::Error`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    /// Connection status.
    pub status: WalletStatus,
    /// Connected address.
    pub address: Option<String>,
    /// Active network.
    pub chain_id: Option<ChainId>,
    /// Family of the active network.
    pub chain_type: Option<ChainFamily>,
    /// Native balance of `address` on `chain_id`.
    #[serde(serialize_with = "serialize_balance")]
    pub balance: Option<U256>,
    /// Message of the error that ended the last connect attempt.
    pub error: Option<String>,
}

impl WalletState {
    /// The initial, disconnected state.
    #[must_use]
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// State while a connect attempt is in flight.
    #[must_use]
    pub fn connecting() -> Self {
        Self {
            status: WalletStatus::Connecting,
            ..Self::default()
        }
    }

    /// State after a successful connect.
    #[must_use]
    pub fn connected(address: impl Into<String>, chain_id: ChainId, balance: U256) -> Self {
        Self {
            status: WalletStatus::Connected,
            address: Some(address.into()),
            chain_id: Some(chain_id),
            chain_type: Some(chain_id.family()),
            balance: Some(balance),
            error: None,
        }
    }

    /// State after a failed connect.
    #[must_use]
    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            status: WalletStatus::Error,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    /// Whether a wallet is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status == WalletStatus::Connected
    }
}

#[allow(clippy::ref_option)]
fn serialize_balance<S: Serializer>(balance: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
    match balance {
        Some(value) => serializer.serialize_some(&value.to_string()),
        None => serializer.serialize_none(),
    }
}
