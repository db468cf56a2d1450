//! Family → adapter lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::adapter::ChainAdapter;
use crate::chain::ChainFamily;
use crate::error::{Error, Result};

/// Builder for [`AdapterRegistry`].
#[derive(Debug, Default)]
pub struct AdapterRegistryBuilder {
    adapters: BTreeMap<ChainFamily, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistryBuilder {
    /// Register an adapter under its own family, replacing any previous one.
    #[must_use]
    pub fn register(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        let family = adapter.family();
        if self.adapters.insert(family, adapter).is_some() {
            debug!(%family, "replacing registered adapter");
        }
        self
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> AdapterRegistry {
        AdapterRegistry {
            adapters: self.adapters,
        }
    }
}

/// Immutable map from [`ChainFamily`] to its [`ChainAdapter`] instance.
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<ChainFamily, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> AdapterRegistryBuilder {
        AdapterRegistryBuilder::default()
    }

    /// The adapter serving `family`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedChainFamily`] if none is registered.
    pub fn resolve(&self, family: ChainFamily) -> Result<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(&family)
            .cloned()
            .ok_or(Error::UnsupportedChainFamily(family))
    }

    /// Registered families, in declaration order.
    #[must_use]
    pub fn families(&self) -> Vec<ChainFamily> {
        self.adapters.keys().copied().collect()
    }

    /// Whether `family` has an adapter.
    #[must_use]
    pub fn contains(&self, family: ChainFamily) -> bool {
        self.adapters.contains_key(&family)
    }
}
