//! Process-wide wallet state and the connect/disconnect state machine.
//!
//! [`WalletController`] is the single writer of [`WalletState`]. It owns at
//! most one active session (an adapter plus the subscriptions the controller
//! holds on it) and tags every connect attempt with a generation so late
//! results and late events from superseded attempts are discarded.
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected
//!      ▲                        │                 │
//!      │                        └──err──► Error   │ disconnect / revoked /
//!      └───────────────────────────────────────────┘ provider disconnect
//! ```
//!
//! The session lock is a `std::sync::Mutex` that is never held across an
//! `.await`. While it is held the controller only reads an adapter's cached
//! snapshot; anything that may emit events runs outside it, since adapters
//! invoke the controller's listeners synchronously.
//!
//! A connect subscribes to the adapter as soon as the wallet authorizes, and
//! re-reads the adapter's snapshot under the lock before committing, so a
//! disconnect or account switch that lands while the balance is being read
//! is never lost.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use alloy::primitives::U256;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{AdapterStatus, ChainAdapter, Subscription};
use crate::chain::{ChainFamily, ChainId};
use crate::config::WalletConfig;
use crate::error::{ConnectionError, Error, Result};
use crate::registry::AdapterRegistry;
use crate::types::{TransactionReceipt, TransactionRequest, WalletState, WalletStatus};

/// Handle to the wallet state machine. Cloning is cheap and every clone
/// drives the same state.
#[derive(Clone)]
pub struct WalletController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WalletController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletController")
            .field("families", &self.inner.registry.families())
            .field("status", &self.inner.state.borrow().status)
            .finish_non_exhaustive()
    }
}

struct Inner {
    registry: Arc<AdapterRegistry>,
    config: WalletConfig,
    session: Mutex<Session>,
    state: watch::Sender<WalletState>,
}

#[derive(Default)]
struct Session {
    generation: u64,
    pending: Option<ChainFamily>,
    active: Option<ActiveSession>,
}

struct ActiveSession {
    adapter: Arc<dyn ChainAdapter>,
    subscriptions: Vec<Subscription>,
}

impl Session {
    fn active_family(&self) -> Option<ChainFamily> {
        self.active.as_ref().map(|active| active.adapter.family())
    }

    fn live(&self, generation: u64) -> Option<&ActiveSession> {
        if self.generation == generation {
            self.active.as_ref()
        } else {
            None
        }
    }
}

/// How a connect attempt ended when it did not produce a session.
enum Outcome {
    /// The attempt is still current; the error belongs to it.
    Failed(Error),
    /// The attempt was superseded.
    Superseded,
    /// The wallet dropped the connection before the session was committed;
    /// the state is already back to `Disconnected`.
    Withdrawn,
}

/// What the commit-time check of the adapter's snapshot decided.
enum Verdict {
    Committed(WalletState),
    AccountMoved(String),
    Withdrawn,
    Superseded,
}

impl WalletController {
    /// Create a controller over `registry` with default configuration.
    #[must_use]
    pub fn new(registry: AdapterRegistry) -> Self {
        Self::with_config(registry, WalletConfig::default())
    }

    /// Create a controller with explicit configuration.
    #[must_use]
    pub fn with_config(registry: AdapterRegistry, config: WalletConfig) -> Self {
        let (state, _) = watch::channel(WalletState::disconnected());
        Self {
            inner: Arc::new(Inner {
                registry: Arc::new(registry),
                config,
                session: Mutex::new(Session::default()),
                state,
            }),
        }
    }

    /// The registry the controller resolves adapters from.
    #[must_use]
    pub fn registry(&self) -> &AdapterRegistry {
        &self.inner.registry
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> WalletState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WalletState> {
        self.inner.state.subscribe()
    }

    /// Connect the wallet of `family`, optionally on a specific network.
    ///
    /// Only one attempt or session may exist at a time: a call made while
    /// the state is `Connecting` or `Connected` fails without side effects.
    /// Dropping the returned future before it completes reverts the state to
    /// `Disconnected`.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConnected`] while an attempt or session exists
    /// - [`Error::UnsupportedChainFamily`] if no adapter serves `family`
    /// - adapter errors (`ConnectionError`, `Error::Rpc` for the balance read)
    /// - [`ConnectionError::Aborted`] if a disconnect superseded the attempt
    #[instrument(skip(self), fields(%family))]
    pub async fn connect(&self, family: ChainFamily, chain: Option<ChainId>) -> Result<WalletState> {
        let generation = self.inner.begin(family)?;
        let guard = AttemptGuard::new(&self.inner, generation);

        let outcome = match self.inner.registry.resolve(family) {
            Ok(adapter) => {
                let authorized = adapter.connect(chain).await;
                match authorized {
                    Ok(address) => self.inner.establish(generation, adapter, address).await,
                    Err(err) => Err(self.inner.classify(generation, err)),
                }
            }
            Err(err) => Err(Outcome::Failed(err)),
        };
        guard.disarm();

        match outcome {
            Ok(state) => Ok(state),
            Err(Outcome::Failed(err)) => {
                self.inner.fail(generation, &err);
                Err(err)
            }
            Err(Outcome::Superseded | Outcome::Withdrawn) => Err(ConnectionError::Aborted.into()),
        }
    }

    /// Silently reconnect to a wallet that already authorized this app.
    ///
    /// Never prompts. Returns `Ok(false)` and leaves the state
    /// `Disconnected` when the wallet declines or any step fails.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyConnected`] or [`Error::UnsupportedChainFamily`].
    #[instrument(skip(self), fields(%family))]
    pub async fn restore(&self, family: ChainFamily, chain: Option<ChainId>) -> Result<bool> {
        let adapter = self.inner.registry.resolve(family)?;
        let generation = self.inner.begin(family)?;
        let guard = AttemptGuard::new(&self.inner, generation);

        let authorized = adapter.reconnect(chain).await;
        let outcome = match authorized {
            Ok(Some(address)) => self.inner.establish(generation, adapter, address).await,
            Ok(None) => Err(Outcome::Failed(ConnectionError::Rejected.into())),
            Err(err) => Err(self.inner.classify(generation, err)),
        };
        guard.disarm();

        match outcome {
            Ok(_) => Ok(true),
            Err(Outcome::Failed(err)) => {
                debug!(error = %err, "silent reconnect declined");
                self.inner.reset_if_current(generation);
                Ok(false)
            }
            Err(Outcome::Superseded | Outcome::Withdrawn) => Ok(false),
        }
    }

    /// Disconnect the active session.
    ///
    /// No-op when nothing is connected; a pending attempt is invalidated.
    ///
    /// # Errors
    ///
    /// Propagates a failure reported by the adapter; the state is reset
    /// regardless.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let (generation, active) = {
            let mut session = self.inner.lock();
            let status = self.inner.state.borrow().status;
            if session.active.is_none() && session.pending.is_none() {
                if status == WalletStatus::Error {
                    self.inner.state.send_replace(WalletState::disconnected());
                }
                return Ok(());
            }
            session.generation += 1;
            session.pending = None;
            self.inner.state.send_replace(WalletState::disconnected());
            (session.generation, session.active.take())
        };

        let Some(ActiveSession {
            adapter,
            subscriptions,
        }) = active
        else {
            debug!(generation, "pending connect invalidated");
            return Ok(());
        };

        drop(subscriptions);
        let result = adapter.disconnect().await;
        info!(family = %adapter.family(), generation, "wallet disconnected");
        result
    }

    /// Move the connected wallet to another network of its family.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`], or the adapter's error (typically
    /// `ConnectionError::UnsupportedChain`) with the state left untouched.
    #[instrument(skip(self))]
    pub async fn switch_chain(&self, chain: ChainId) -> Result<()> {
        let (adapter, generation) = self.inner.active()?;
        adapter.switch_chain(chain).await?;
        self.inner.update(generation, |state| {
            if state.chain_id == Some(chain) {
                return false;
            }
            state.chain_id = Some(chain);
            true
        });
        info!(%chain, "chain switched");
        Ok(())
    }

    /// Re-read the balance of the connected address.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] or `Error::Rpc` once retries are exhausted.
    pub async fn refresh_balance(&self) -> Result<U256> {
        let (adapter, generation) = self.inner.active()?;
        let address = self
            .inner
            .state
            .borrow()
            .address
            .clone()
            .ok_or(Error::NotConnected)?;
        let balance = self.inner.read_balance(adapter.as_ref(), &address).await?;
        self.inner.update(generation, |state| {
            if state.address.as_deref() != Some(address.as_str()) || state.balance == Some(balance) {
                return false;
            }
            state.balance = Some(balance);
            true
        });
        Ok(balance)
    }

    /// Sign a message with the connected account.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] or the adapter's signing error.
    pub async fn sign_message(&self, message: &[u8]) -> Result<String> {
        let (adapter, _) = self.inner.active()?;
        adapter.sign_message(message).await
    }

    /// Sign structured data with the connected account.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] or the adapter's signing error
    /// (`SigningError::NotSupported` outside EVM).
    pub async fn sign_typed_data(&self, data: &Value) -> Result<String> {
        let (adapter, _) = self.inner.active()?;
        adapter.sign_typed_data(data).await
    }

    /// Submit a transaction from the connected account.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] or the adapter's transaction error.
    pub async fn send_transaction(&self, tx: &TransactionRequest) -> Result<String> {
        let (adapter, _) = self.inner.active()?;
        adapter.send_transaction(tx).await
    }

    /// Wait for a transaction submitted on the connected family.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] or the tracker's outcome.
    pub async fn wait_for_transaction(
        &self,
        hash: &str,
        confirmations: u64,
    ) -> Result<TransactionReceipt> {
        let (adapter, _) = self.inner.active()?;
        adapter.wait_for_transaction(hash, confirmations).await
    }

    /// End-of-session cleanup: drop listeners and state, but keep the
    /// wallet's authorization so [`restore`](Self::restore) can succeed on
    /// the next start.
    pub fn teardown(&self) {
        let active = {
            let mut session = self.inner.lock();
            session.generation += 1;
            session.pending = None;
            self.inner.state.send_replace(WalletState::disconnected());
            session.active.take()
        };
        if let Some(active) = active {
            debug!(family = %active.adapter.family(), "controller torn down");
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start an attempt: reject if one is pending or live, otherwise take a
    /// fresh generation and publish `Connecting`.
    fn begin(&self, family: ChainFamily) -> Result<u64> {
        let mut session = self.lock();
        let status = self.state.borrow().status;
        if matches!(status, WalletStatus::Connecting | WalletStatus::Connected) {
            warn!(%family, %status, "connect rejected, wallet busy");
            return Err(Error::AlreadyConnected { status });
        }
        session.generation += 1;
        session.pending = Some(family);
        self.state.send_replace(WalletState::connecting());
        debug!(generation = session.generation, "connect attempt started");
        Ok(session.generation)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn classify(&self, generation: u64, err: Error) -> Outcome {
        if self.is_current(generation) {
            Outcome::Failed(err)
        } else {
            Outcome::Superseded
        }
    }

    fn active(&self) -> Result<(Arc<dyn ChainAdapter>, u64)> {
        let session = self.lock();
        session
            .live(session.generation)
            .map(|active| (Arc::clone(&active.adapter), session.generation))
            .ok_or(Error::NotConnected)
    }

    async fn read_balance(&self, adapter: &dyn ChainAdapter, address: &str) -> Result<U256> {
        self.config
            .balance_retry
            .run("balance", || adapter.balance(address))
            .await
    }

    /// Finish a connect once the adapter authorized `address`: subscribe
    /// to the adapter, read the balance and commit the session.
    async fn establish(
        self: &Arc<Self>,
        generation: u64,
        adapter: Arc<dyn ChainAdapter>,
        mut address: String,
    ) -> std::result::Result<WalletState, Outcome> {
        if !self.is_current(generation) {
            self.release(adapter.as_ref()).await;
            return Err(Outcome::Superseded);
        }

        let mut subscriptions = self.watch(adapter.as_ref(), generation);
        let verdict = loop {
            let balance = match self.read_balance(adapter.as_ref(), &address).await {
                Ok(balance) => balance,
                Err(err) => {
                    drop(subscriptions);
                    if !self.is_current(generation) {
                        self.release(adapter.as_ref()).await;
                        return Err(Outcome::Superseded);
                    }
                    if let Err(release_err) = adapter.disconnect().await {
                        warn!(error = %release_err, "failed to disconnect after balance failure");
                    }
                    return Err(Outcome::Failed(err));
                }
            };
            match self.commit(generation, &adapter, &address, balance, &mut subscriptions) {
                Verdict::AccountMoved(current) => {
                    debug!(from = %address, to = %current, "account changed during connect");
                    address = current;
                }
                verdict => break verdict,
            }
        };
        drop(subscriptions);

        match verdict {
            Verdict::Committed(state) => {
                info!(
                    family = %adapter.family(),
                    address = state.address.as_deref().unwrap_or_default(),
                    chain = ?state.chain_id,
                    "wallet connected",
                );
                Ok(state)
            }
            Verdict::Withdrawn => {
                info!(family = %adapter.family(), "wallet went away during connect");
                Err(Outcome::Withdrawn)
            }
            Verdict::Superseded | Verdict::AccountMoved(_) => {
                self.release(adapter.as_ref()).await;
                Err(Outcome::Superseded)
            }
        }
    }

    /// Commit the session if `generation` is current and the adapter still
    /// holds `address`. On commit the subscriptions move into the session.
    fn commit(
        &self,
        generation: u64,
        adapter: &Arc<dyn ChainAdapter>,
        address: &str,
        balance: U256,
        subscriptions: &mut Vec<Subscription>,
    ) -> Verdict {
        let mut session = self.lock();
        if session.generation != generation {
            return Verdict::Superseded;
        }
        match (adapter.connection_status(), adapter.address()) {
            (AdapterStatus::Connected, Some(current)) if current == address => {
                let chain = adapter
                    .chain_id()
                    .unwrap_or_else(|| adapter.family().default_chain());
                let state = WalletState::connected(current, chain, balance);
                session.pending = None;
                session.active = Some(ActiveSession {
                    adapter: Arc::clone(adapter),
                    subscriptions: std::mem::take(subscriptions),
                });
                self.state.send_replace(state.clone());
                Verdict::Committed(state)
            }
            (AdapterStatus::Connected, Some(current)) => Verdict::AccountMoved(current),
            (status, _) => {
                debug!(?status, "adapter no longer connected at commit");
                session.generation += 1;
                session.pending = None;
                self.state.send_replace(WalletState::disconnected());
                Verdict::Withdrawn
            }
        }
    }

    /// Disconnect an adapter a superseded attempt left connected, unless a
    /// newer attempt or session is using the same family.
    async fn release(&self, adapter: &dyn ChainAdapter) {
        let family = adapter.family();
        let in_use = {
            let session = self.lock();
            session.pending == Some(family) || session.active_family() == Some(family)
        };
        if in_use {
            return;
        }
        debug!(%family, "releasing adapter of superseded attempt");
        if let Err(err) = adapter.disconnect().await {
            warn!(%family, error = %err, "failed to release adapter");
        }
    }

    fn watch(self: &Arc<Self>, adapter: &dyn ChainAdapter, generation: u64) -> Vec<Subscription> {
        let weak: Weak<Self> = Arc::downgrade(self);

        let on_account = {
            let weak = weak.clone();
            adapter.on_account_change(Box::new(move |account| {
                if let Some(inner) = weak.upgrade() {
                    inner.account_changed(generation, account);
                }
            }))
        };
        let on_chain = {
            let weak = weak.clone();
            adapter.on_chain_change(Box::new(move |chain| {
                if let Some(inner) = weak.upgrade() {
                    inner.chain_changed(generation, chain);
                }
            }))
        };
        let on_disconnect = adapter.on_disconnect(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.provider_disconnected(generation);
            }
        }));
        debug!(generation, "subscribed to adapter events");
        vec![on_account, on_chain, on_disconnect]
    }

    fn account_changed(&self, generation: u64, account: Option<String>) {
        let Some(address) = account else {
            info!(generation, "account access revoked");
            self.end_session(generation);
            return;
        };
        self.update(generation, |state| {
            if state.address.as_deref() == Some(address.as_str()) {
                return false;
            }
            debug!(%address, "account changed");
            state.address = Some(address.clone());
            true
        });
    }

    fn chain_changed(&self, generation: u64, chain: ChainId) {
        self.update(generation, |state| {
            if state.chain_id == Some(chain) {
                return false;
            }
            debug!(%chain, "chain changed");
            state.chain_id = Some(chain);
            true
        });
    }

    fn provider_disconnected(&self, generation: u64) {
        info!(generation, "wallet disconnected by provider");
        self.end_session(generation);
    }

    /// Drop the live session of `generation`, if any, and reset the state.
    fn end_session(&self, generation: u64) {
        let active = {
            let mut session = self.lock();
            if session.live(generation).is_none() {
                skip_event(&session, generation);
                return;
            }
            session.generation += 1;
            self.state.send_replace(WalletState::disconnected());
            session.active.take()
        };
        // Disposed outside the lock; we may be inside the adapter's emit.
        drop(active);
    }

    /// Apply `mutate` to the state if `generation` still owns a live
    /// session; `mutate` returns whether it changed anything.
    fn update(&self, generation: u64, mutate: impl FnOnce(&mut WalletState) -> bool) {
        let session = self.lock();
        if session.live(generation).is_none() {
            skip_event(&session, generation);
            return;
        }
        self.state.send_if_modified(mutate);
    }

    fn fail(&self, generation: u64, err: &Error) {
        let mut session = self.lock();
        if session.generation != generation {
            return;
        }
        session.pending = None;
        warn!(error = %err, "connect failed");
        self.state.send_replace(WalletState::failed(err));
    }

    fn reset_if_current(&self, generation: u64) {
        let mut session = self.lock();
        if session.generation != generation {
            return;
        }
        session.pending = None;
        self.state.send_replace(WalletState::disconnected());
    }
}

fn skip_event(session: &Session, generation: u64) {
    if session.generation == generation {
        // seen again by the commit-time check
        debug!(generation, "adapter event during connect");
    } else {
        warn!(generation, current = session.generation, "ignoring stale adapter event");
    }
}

/// Reverts an attempt whose future was dropped before completing.
struct AttemptGuard<'a> {
    inner: &'a Inner,
    generation: u64,
    armed: bool,
}

impl<'a> AttemptGuard<'a> {
    const fn new(inner: &'a Inner, generation: u64) -> Self {
        Self {
            inner,
            generation,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut session = self.inner.lock();
        if session.generation == self.generation && session.pending.is_some() {
            warn!(generation = self.generation, "connect abandoned");
            session.generation += 1;
            session.pending = None;
            self.inner.state.send_replace(WalletState::disconnected());
        }
    }
}
