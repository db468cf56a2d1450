//! In-memory native providers for integration tests.

#![allow(dead_code, clippy::unwrap_used, missing_docs)]

use std::collections::HashMap;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use dejavu_wallet::adapter::{EvmAdapter, SolanaAdapter, SuiAdapter};
use dejavu_wallet::chain::ChainId;
use dejavu_wallet::config::{RetryConfig, TrackerConfig};
use dejavu_wallet::provider::{
    EvmProvider, ProviderError, ProviderEvent, ProviderResult, SignatureStatus, SolanaProvider,
    SuiProvider, SuiTransactionStatus,
};
use dejavu_wallet::types::{TransactionReceipt, TransactionRequest, TxStatus};
use serde_json::Value;
use tokio::sync::{Notify, broadcast};

pub const EVM_ACCOUNT: Address = Address::new([0xab; 20]);
pub const SOLANA_ACCOUNT: &str = "GjwcWFQYzemBtpUoN5fMAP2FZviTtMRWCmrppGuTthJS";
pub const SUI_ACCOUNT: &str = "0x5a3c4f1e0b2d";

pub fn fast_tracker() -> TrackerConfig {
    TrackerConfig {
        poll_interval_ms: 1_000,
        timeout_ms: 10_000,
        default_confirmations: 1,
        retry: RetryConfig {
            max_attempts: 2,
            jitter: false,
            ..RetryConfig::default()
        },
    }
}

/// Optional barrier a mock waits on before answering a request.
#[derive(Debug, Default)]
pub struct Gate {
    closed: AtomicBool,
    notify: Notify,
}

impl Gate {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn pass(&self) {
        while self.closed.load(Ordering::SeqCst) {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if !self.closed.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
        tokio::task::yield_now().await;
    }
}

#[derive(Debug)]
pub struct MockEvm {
    pub chain: AtomicU64,
    pub known_chains: Vec<u64>,
    pub authorized: AtomicBool,
    pub reject: AtomicBool,
    pub balance: Mutex<ProviderResult<U256>>,
    pub head: AtomicU64,
    /// Added to `head` on every `block_number` call.
    pub head_step: AtomicU64,
    pub receipts: Mutex<HashMap<String, TransactionReceipt>>,
    pub receipt_error: Mutex<Option<ProviderError>>,
    pub receipt_calls: AtomicU32,
    pub sent: Mutex<Vec<TransactionRequest>>,
    pub gate: Gate,
    /// Held by `balance` reads.
    pub balance_gate: Gate,
    events: broadcast::Sender<ProviderEvent>,
}

impl MockEvm {
    pub fn new() -> Arc<Self> {
        Self::with_known_chains(vec![1, 10, 137, 8453, 42161])
    }

    /// A wallet that only recognizes `known_chains` (EIP-155 ids).
    pub fn with_known_chains(known_chains: Vec<u64>) -> Arc<Self> {
        Arc::new(Self {
            chain: AtomicU64::new(1),
            known_chains,
            authorized: AtomicBool::new(false),
            reject: AtomicBool::new(false),
            balance: Mutex::new(Ok(U256::from(1_000_000_000_000_000_000_u128))),
            head: AtomicU64::new(100),
            head_step: AtomicU64::new(0),
            receipts: Mutex::new(HashMap::new()),
            receipt_error: Mutex::new(None),
            receipt_calls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            gate: Gate::default(),
            balance_gate: Gate::default(),
            events: broadcast::channel(16).0,
        })
    }

    pub fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    pub fn mine(&self, hash: &str, block: u64, status: TxStatus) {
        let mut receipt = TransactionReceipt::new(hash, block);
        receipt.status = status;
        receipt.gas_used = 21_000;
        receipt.effective_gas_price = 1_000_000_000;
        self.receipts.lock().unwrap().insert(hash.to_owned(), receipt);
    }
}

#[async_trait]
impl EvmProvider for MockEvm {
    async fn request_accounts(&self) -> ProviderResult<Vec<Address>> {
        self.gate.pass().await;
        if self.reject.load(Ordering::SeqCst) {
            return Err(ProviderError::from_rpc_code(4001, "User rejected the request."));
        }
        self.authorized.store(true, Ordering::SeqCst);
        Ok(vec![EVM_ACCOUNT])
    }

    async fn accounts(&self) -> ProviderResult<Vec<Address>> {
        if self.authorized.load(Ordering::SeqCst) {
            Ok(vec![EVM_ACCOUNT])
        } else {
            Ok(Vec::new())
        }
    }

    async fn chain_id(&self) -> ProviderResult<u64> {
        Ok(self.chain.load(Ordering::SeqCst))
    }

    async fn switch_chain(&self, chain_id: u64) -> ProviderResult<()> {
        if !self.known_chains.contains(&chain_id) {
            return Err(ProviderError::from_rpc_code(4902, "Unrecognized chain ID"));
        }
        self.chain.store(chain_id, Ordering::SeqCst);
        if let Some(chain) = ChainId::from_evm_id(chain_id) {
            self.emit(ProviderEvent::ChainChanged(chain));
        }
        Ok(())
    }

    async fn balance(&self, _address: Address) -> ProviderResult<U256> {
        self.balance_gate.pass().await;
        self.balance.lock().unwrap().clone()
    }

    async fn personal_sign(&self, message: &[u8], _address: Address) -> ProviderResult<String> {
        Ok(format!("0xsigned{}", message.len()))
    }

    async fn sign_typed_data(&self, _address: Address, _data: &Value) -> ProviderResult<String> {
        Ok("0xtyped".into())
    }

    async fn send_transaction(
        &self,
        _from: Address,
        tx: &TransactionRequest,
    ) -> ProviderResult<String> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(tx.clone());
        Ok(format!("0x{:064x}", sent.len()))
    }

    async fn block_number(&self) -> ProviderResult<u64> {
        let step = self.head_step.load(Ordering::SeqCst);
        Ok(self.head.fetch_add(step, Ordering::SeqCst))
    }

    async fn transaction_receipt(&self, hash: &str) -> ProviderResult<Option<TransactionReceipt>> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.receipt_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.receipts.lock().unwrap().get(hash).cloned())
    }

    async fn revert_reason(&self, _hash: &str) -> ProviderResult<Option<String>> {
        Ok(Some("execution reverted: slippage".into()))
    }

    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        Some(self.events.subscribe())
    }
}

#[derive(Debug)]
pub struct MockSolana {
    pub trusted: AtomicBool,
    pub reject: AtomicBool,
    pub lamports: AtomicU64,
    pub statuses: Mutex<HashMap<String, SignatureStatus>>,
    pub disconnects: AtomicU32,
    /// Held by `disconnect`.
    pub disconnect_gate: Gate,
    events: broadcast::Sender<ProviderEvent>,
}

impl MockSolana {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            trusted: AtomicBool::new(false),
            reject: AtomicBool::new(false),
            lamports: AtomicU64::new(2_500_000_000),
            statuses: Mutex::new(HashMap::new()),
            disconnects: AtomicU32::new(0),
            disconnect_gate: Gate::default(),
            events: broadcast::channel(16).0,
        })
    }

    pub fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl SolanaProvider for MockSolana {
    async fn connect(&self, only_if_trusted: bool) -> ProviderResult<String> {
        if self.reject.load(Ordering::SeqCst)
            || (only_if_trusted && !self.trusted.load(Ordering::SeqCst))
        {
            return Err(ProviderError::UserRejected);
        }
        self.trusted.store(true, Ordering::SeqCst);
        Ok(SOLANA_ACCOUNT.into())
    }

    async fn disconnect(&self) -> ProviderResult<()> {
        self.disconnect_gate.pass().await;
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn balance(&self, _pubkey: &str) -> ProviderResult<u64> {
        Ok(self.lamports.load(Ordering::SeqCst))
    }

    async fn sign_message(&self, _message: &[u8]) -> ProviderResult<String> {
        Ok("5VERYbase58signature".into())
    }

    async fn send_transaction(&self, _tx: &TransactionRequest) -> ProviderResult<String> {
        Ok("4sGjMW1sUnHzSxGspuhpqLDx6wiyjNtZAMdL4VZHirAn".into())
    }

    async fn signature_status(&self, signature: &str) -> ProviderResult<Option<SignatureStatus>> {
        Ok(self.statuses.lock().unwrap().get(signature).cloned())
    }

    fn events(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        Some(self.events.subscribe())
    }
}

#[derive(Debug)]
pub struct MockSui {
    pub authorized: AtomicBool,
    pub mist: Mutex<u128>,
    pub statuses: Mutex<HashMap<String, SuiTransactionStatus>>,
    pub latest_checkpoint: AtomicU64,
}

impl MockSui {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            authorized: AtomicBool::new(false),
            mist: Mutex::new(7_000_000_000),
            statuses: Mutex::new(HashMap::new()),
            latest_checkpoint: AtomicU64::new(500),
        })
    }
}

#[async_trait]
impl SuiProvider for MockSui {
    async fn request_accounts(&self) -> ProviderResult<Vec<String>> {
        self.authorized.store(true, Ordering::SeqCst);
        Ok(vec![SUI_ACCOUNT.into()])
    }

    async fn accounts(&self) -> ProviderResult<Vec<String>> {
        if self.authorized.load(Ordering::SeqCst) {
            Ok(vec![SUI_ACCOUNT.into()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn disconnect(&self) -> ProviderResult<()> {
        self.authorized.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn balance(&self, _address: &str) -> ProviderResult<u128> {
        Ok(*self.mist.lock().unwrap())
    }

    async fn sign_personal_message(&self, _message: &[u8]) -> ProviderResult<String> {
        Ok("AJ4base64signature==".into())
    }

    async fn sign_and_execute(&self, _tx: &TransactionRequest) -> ProviderResult<String> {
        Ok("9Yx3digest".into())
    }

    async fn transaction_status(
        &self,
        digest: &str,
    ) -> ProviderResult<Option<SuiTransactionStatus>> {
        Ok(self.statuses.lock().unwrap().get(digest).cloned())
    }

    async fn latest_checkpoint(&self) -> ProviderResult<u64> {
        Ok(self.latest_checkpoint.load(Ordering::SeqCst))
    }
}

pub fn evm_adapter(provider: &Arc<MockEvm>, chains: &[ChainId]) -> Arc<EvmAdapter> {
    Arc::new(
        EvmAdapter::builder()
            .supported_chains(chains.iter().copied())
            .provider(Arc::clone(provider) as Arc<dyn EvmProvider>)
            .tracker(fast_tracker())
            .build()
            .unwrap(),
    )
}

pub fn solana_adapter(provider: &Arc<MockSolana>) -> Arc<SolanaAdapter> {
    Arc::new(
        SolanaAdapter::builder()
            .provider(Arc::clone(provider) as Arc<dyn SolanaProvider>)
            .tracker(fast_tracker())
            .build()
            .unwrap(),
    )
}

pub fn sui_adapter(provider: &Arc<MockSui>) -> Arc<SuiAdapter> {
    Arc::new(
        SuiAdapter::builder()
            .provider(Arc::clone(provider) as Arc<dyn SuiProvider>)
            .tracker(fast_tracker())
            .build()
            .unwrap(),
    )
}

/// Let spawned event pumps run.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
