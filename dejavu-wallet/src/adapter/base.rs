//! State every adapter carries regardless of family.
//!
//! [`AdapterCore`] holds the cached identity, the connectivity state machine
//! and the three listener sets, and turns [`ProviderEvent`]s into listener
//! notifications. Concrete adapters own one and delegate to it, keep their
//! native provider in a [`ProviderSlot`], and are built through an
//! [`AdapterBuilder`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::listeners::{ListenerSet, Subscription};
use super::{AdapterStatus, ListenerCounts};
use crate::chain::{ChainFamily, ChainId};
use crate::config::TrackerConfig;
use crate::error::{ConnectionError, Error, Result};
use crate::provider::ProviderEvent;
use crate::tracker::TransactionTracker;

#[derive(Debug, Clone, Default)]
struct Snapshot {
    status: AdapterStatus,
    address: Option<String>,
    chain: Option<ChainId>,
}

/// Identity, status and listeners shared by all adapter families.
#[derive(Debug)]
pub struct AdapterCore {
    family: ChainFamily,
    supported: Vec<ChainId>,
    snapshot: RwLock<Snapshot>,
    accounts: ListenerSet<Option<String>>,
    chains: ListenerSet<ChainId>,
    disconnects: ListenerSet<()>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl AdapterCore {
    /// Create a core serving `supported` networks of `family`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `supported` is empty or names a network
    /// of another family.
    pub fn new(family: ChainFamily, supported: Vec<ChainId>) -> Result<Self> {
        if supported.is_empty() {
            return Err(Error::config(format!("{family} adapter needs at least one chain")));
        }
        if let Some(foreign) = supported.iter().find(|chain| chain.family() != family) {
            return Err(Error::config(format!(
                "{foreign} does not belong to the {family} family"
            )));
        }
        Ok(Self {
            family,
            supported,
            snapshot: RwLock::new(Snapshot::default()),
            accounts: ListenerSet::new("accounts"),
            chains: ListenerSet::new("chains"),
            disconnects: ListenerSet::new("disconnects"),
            pump: Mutex::new(None),
        })
    }

    /// Family served.
    #[must_use]
    pub const fn family(&self) -> ChainFamily {
        self.family
    }

    /// Networks served.
    #[must_use]
    pub fn supported_chains(&self) -> &[ChainId] {
        &self.supported
    }

    /// Current connectivity status.
    #[must_use]
    pub fn status(&self) -> AdapterStatus {
        self.read().status
    }

    /// Last known address.
    #[must_use]
    pub fn address(&self) -> Option<String> {
        self.read().address.clone()
    }

    /// Last known network.
    #[must_use]
    pub fn chain_id(&self) -> Option<ChainId> {
        self.read().chain
    }

    /// Fail with `UnsupportedChain` unless `chain` is served.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::UnsupportedChain`](crate::error::ConnectionError::UnsupportedChain).
    pub fn ensure_supported(&self, chain: ChainId) -> Result<()> {
        if self.supported.contains(&chain) {
            Ok(())
        } else {
            Err(Error::unsupported_chain(chain))
        }
    }

    /// Resolve the network a connect should land on.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedChain` if `requested` is not served.
    pub fn target_chain(&self, requested: Option<ChainId>) -> Result<ChainId> {
        let chain = requested.unwrap_or_else(|| {
            let preferred = self.family.default_chain();
            if self.supported.contains(&preferred) {
                preferred
            } else {
                self.supported[0]
            }
        });
        self.ensure_supported(chain)?;
        Ok(chain)
    }

    /// The connected address, or `NotConnected`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] when no identity is cached.
    pub fn require_address(&self) -> Result<String> {
        self.address().ok_or(Error::NotConnected)
    }

    /// `Idle → Connecting`.
    pub fn begin_connect(&self) {
        self.write().status = AdapterStatus::Connecting;
    }

    /// `Connecting → Connected` with the authorized identity.
    pub fn connected(&self, address: String, chain: ChainId) {
        info!(family = %self.family, %address, %chain, "adapter connected");
        *self.write() = Snapshot {
            status: AdapterStatus::Connected,
            address: Some(address),
            chain: Some(chain),
        };
    }

    /// `Connecting → Error`.
    pub fn connect_failed(&self, err: &Error) {
        warn!(family = %self.family, error = %err, "adapter connect failed");
        *self.write() = Snapshot {
            status: AdapterStatus::Error,
            ..Snapshot::default()
        };
    }

    /// Record a network change and notify chain listeners.
    pub fn chain_changed(&self, chain: ChainId) {
        {
            let mut snapshot = self.write();
            if snapshot.status == AdapterStatus::Connected {
                snapshot.chain = Some(chain);
            }
        }
        debug!(family = %self.family, %chain, "chain changed");
        self.chains.emit(&chain);
    }

    /// `Connected → Disconnected → Idle`, notifying disconnect listeners.
    ///
    /// Listeners fire even if nothing was connected.
    pub fn disconnected(&self) {
        self.stop_pump();
        {
            let mut snapshot = self.write();
            *snapshot = Snapshot {
                status: AdapterStatus::Disconnected,
                ..Snapshot::default()
            };
        }
        info!(family = %self.family, "adapter disconnected");
        self.disconnects.emit(&());
        let mut snapshot = self.write();
        if snapshot.status == AdapterStatus::Disconnected {
            snapshot.status = AdapterStatus::Idle;
        }
    }

    /// Apply a provider-originated event.
    pub fn dispatch(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountChanged(Some(address)) => {
                {
                    let mut snapshot = self.write();
                    if snapshot.status == AdapterStatus::Connected {
                        snapshot.address = Some(address.clone());
                    }
                }
                debug!(family = %self.family, %address, "account changed");
                self.accounts.emit(&Some(address));
            }
            ProviderEvent::AccountChanged(None) => {
                *self.write() = Snapshot::default();
                info!(family = %self.family, "wallet revoked account access");
                self.accounts.emit(&None);
            }
            ProviderEvent::ChainChanged(chain) => {
                if self.ensure_supported(chain).is_err() {
                    warn!(family = %self.family, %chain, "wallet moved to an unsupported chain");
                }
                self.chain_changed(chain);
            }
            ProviderEvent::Disconnected => self.disconnected(),
        }
    }

    /// Forward events from `events` into [`dispatch`](Self::dispatch) on a
    /// background task, replacing any previous forwarder.
    ///
    /// Without a Tokio runtime the stream is ignored and the host must call
    /// `handle_event` itself.
    pub fn attach(self: &Arc<Self>, events: Option<broadcast::Receiver<ProviderEvent>>) {
        let Some(mut rx) = events else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(family = %self.family, "no tokio runtime, provider events are not forwarded");
            return;
        };

        let core: Weak<Self> = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(core) = core.upgrade() else { break };
                        core.dispatch(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "provider event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            previous.abort();
        }
    }

    fn stop_pump(&self) {
        if let Some(handle) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// Register an account-change callback.
    pub fn on_account_change(
        &self,
        callback: impl Fn(Option<String>) + Send + Sync + 'static,
    ) -> Subscription {
        self.accounts.subscribe(callback)
    }

    /// Register a chain-change callback.
    pub fn on_chain_change(&self, callback: impl Fn(ChainId) + Send + Sync + 'static) -> Subscription {
        self.chains.subscribe(callback)
    }

    /// Register a disconnect callback.
    pub fn on_disconnect(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.disconnects.subscribe(move |()| callback())
    }

    /// Sizes of the three listener sets.
    #[must_use]
    pub fn listener_counts(&self) -> ListenerCounts {
        ListenerCounts {
            accounts: self.accounts.len(),
            chains: self.chains.len(),
            disconnects: self.disconnects.len(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Snapshot> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Late-bindable native provider of one family.
pub struct ProviderSlot<P: ?Sized> {
    family: ChainFamily,
    provider: RwLock<Option<Arc<P>>>,
}

impl<P: ?Sized> ProviderSlot<P> {
    /// Create a slot, optionally already holding a provider.
    #[must_use]
    pub const fn new(family: ChainFamily, provider: Option<Arc<P>>) -> Self {
        Self {
            family,
            provider: RwLock::new(provider),
        }
    }

    /// Install or replace the provider.
    pub fn install(&self, provider: Arc<P>) {
        debug!(family = %self.family, "native provider installed");
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = Some(provider);
    }

    /// The provider, if one is installed.
    #[must_use]
    pub fn current(&self) -> Option<Arc<P>> {
        self.provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a provider is installed.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.current().is_some()
    }

    /// The provider, or `NoProviderFound`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoProviderFound`] when the slot is empty.
    pub fn get(&self) -> Result<Arc<P>> {
        self.current()
            .ok_or_else(|| ConnectionError::NoProviderFound(self.family).into())
    }
}

impl<P: ?Sized> fmt::Debug for ProviderSlot<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSlot")
            .field("family", &self.family)
            .field("installed", &self.is_installed())
            .finish()
    }
}

/// Builder shared by the family adapters; each family adds its own `build`.
///
/// ```rust,ignore
/// let adapter = EvmAdapter::builder()
///     .supported_chains([ChainId::Ethereum, ChainId::Base])
///     .provider(Arc::new(provider))
///     .build()?;
/// ```
pub struct AdapterBuilder<P: ?Sized> {
    supported: Option<Vec<ChainId>>,
    provider: Option<Arc<P>>,
    tracker: TrackerConfig,
}

impl<P: ?Sized> Default for AdapterBuilder<P> {
    fn default() -> Self {
        Self {
            supported: None,
            provider: None,
            tracker: TrackerConfig::default(),
        }
    }
}

impl<P: ?Sized> fmt::Debug for AdapterBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterBuilder")
            .field("supported", &self.supported)
            .field("provider", &self.provider.is_some())
            .field("tracker", &self.tracker)
            .finish()
    }
}

impl<P: ?Sized> AdapterBuilder<P> {
    /// Restrict the networks the adapter serves (default: every network of
    /// the family).
    #[must_use]
    pub fn supported_chains(mut self, chains: impl IntoIterator<Item = ChainId>) -> Self {
        self.supported = Some(chains.into_iter().collect());
        self
    }

    /// Set the native provider. It can also be installed later.
    #[must_use]
    pub fn provider(mut self, provider: Arc<P>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the confirmation tracking parameters.
    #[must_use]
    pub const fn tracker(mut self, config: TrackerConfig) -> Self {
        self.tracker = config;
        self
    }

    pub(crate) fn into_parts(self, family: ChainFamily) -> Result<AdapterParts<P>> {
        let supported = self.supported.unwrap_or_else(|| family.chains().to_vec());
        Ok(AdapterParts {
            core: Arc::new(AdapterCore::new(family, supported)?),
            provider: ProviderSlot::new(family, self.provider),
            tracker: TransactionTracker::new(self.tracker),
        })
    }
}

/// What every family adapter is assembled from.
pub(crate) struct AdapterParts<P: ?Sized> {
    pub(crate) core: Arc<AdapterCore>,
    pub(crate) provider: ProviderSlot<P>,
    pub(crate) tracker: TransactionTracker,
}

impl Drop for AdapterCore {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn evm_core() -> AdapterCore {
        AdapterCore::new(ChainFamily::Evm, vec![ChainId::Ethereum, ChainId::Base]).unwrap()
    }

    #[test]
    fn test_rejects_foreign_or_empty_chains() {
        assert!(AdapterCore::new(ChainFamily::Evm, vec![]).is_err());
        assert!(AdapterCore::new(ChainFamily::Evm, vec![ChainId::Sui]).is_err());
    }

    #[test]
    fn test_target_chain() {
        let core = evm_core();
        assert_eq!(core.target_chain(None).unwrap(), ChainId::Ethereum);
        assert_eq!(core.target_chain(Some(ChainId::Base)).unwrap(), ChainId::Base);
        let err = core.target_chain(Some(ChainId::Polygon)).unwrap_err();
        assert!(err.to_string().contains("polygon"));

        let base_only = AdapterCore::new(ChainFamily::Evm, vec![ChainId::Base]).unwrap();
        assert_eq!(base_only.target_chain(None).unwrap(), ChainId::Base);
    }

    #[test]
    fn test_state_machine() {
        let core = evm_core();
        assert_eq!(core.status(), AdapterStatus::Idle);
        core.begin_connect();
        assert_eq!(core.status(), AdapterStatus::Connecting);
        core.connected("0xabc".into(), ChainId::Base);
        assert_eq!(core.status(), AdapterStatus::Connected);
        assert_eq!(core.address().as_deref(), Some("0xabc"));
        core.disconnected();
        assert_eq!(core.status(), AdapterStatus::Idle);
        assert!(core.address().is_none());
        assert!(core.chain_id().is_none());
    }

    #[test]
    fn test_disconnect_fires_even_when_idle() {
        let core = evm_core();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let _sub = core.on_disconnect(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        core.disconnected();
        core.disconnected();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dispatch_updates_identity() {
        let core = evm_core();
        core.connected("0xabc".into(), ChainId::Ethereum);

        core.dispatch(ProviderEvent::AccountChanged(Some("0xdef".into())));
        assert_eq!(core.address().as_deref(), Some("0xdef"));

        core.dispatch(ProviderEvent::ChainChanged(ChainId::Base));
        assert_eq!(core.chain_id(), Some(ChainId::Base));

        core.dispatch(ProviderEvent::AccountChanged(None));
        assert_eq!(core.status(), AdapterStatus::Idle);
        assert!(core.address().is_none());
    }

    #[tokio::test]
    async fn test_attach_forwards_events() {
        let core = Arc::new(evm_core());
        core.connected("0xabc".into(), ChainId::Ethereum);
        let (tx, rx) = broadcast::channel(8);
        core.attach(Some(rx));

        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = core.on_chain_change(move |chain| {
            let _ = seen_tx.send(chain);
        });

        tx.send(ProviderEvent::ChainChanged(ChainId::Base)).unwrap();
        assert_eq!(seen_rx.recv().await, Some(ChainId::Base));
        assert_eq!(core.chain_id(), Some(ChainId::Base));
    }

    #[test]
    fn test_provider_slot_late_install() {
        let slot: ProviderSlot<u32> = ProviderSlot::new(ChainFamily::Sui, None);
        assert!(!slot.is_installed());
        assert!(matches!(
            slot.get(),
            Err(Error::Connection(ConnectionError::NoProviderFound(ChainFamily::Sui)))
        ));

        slot.install(Arc::new(7));
        assert_eq!(*slot.get().unwrap(), 7);
        slot.install(Arc::new(8));
        assert_eq!(slot.current().as_deref(), Some(&8));
    }

    #[test]
    fn test_builder_defaults_to_family_chains() {
        let parts = AdapterBuilder::<u32>::default()
            .into_parts(ChainFamily::Evm)
            .unwrap();
        assert_eq!(parts.core.supported_chains(), ChainFamily::Evm.chains());
        assert!(!parts.provider.is_installed());

        let err = AdapterBuilder::<u32>::default()
            .supported_chains([ChainId::Solana])
            .into_parts(ChainFamily::Sui)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
