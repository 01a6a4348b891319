//! Explicit provider registry

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::{Environ, EnvironProvider, Error, Result};

/// Provider kinds available to this process.
///
/// Built by the entry point from an explicit list of providers; nothing
/// registers itself.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn EnvironProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under `kind`. A kind can only be registered once.
    pub fn register(&mut self, kind: impl Into<String>, provider: Arc<dyn EnvironProvider>) -> Result<()> {
        let kind = kind.into();
        if self.providers.contains_key(&kind) {
            return Err(Error::DuplicateProvider { kind });
        }
        debug!(kind = %kind, "registered environ provider");
        self.providers.insert(kind, provider);
        Ok(())
    }

    /// The provider registered under `kind`
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&Arc<dyn EnvironProvider>> {
        self.providers.get(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Open environment `name` with the provider registered under `kind`
    pub fn open(&self, kind: &str, name: &str, config: serde_json::Value) -> Result<Arc<dyn Environ>> {
        let provider = self.get(kind).ok_or_else(|| Error::UnknownProvider {
            kind: kind.to_string(),
        })?;
        provider.open(name, config)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
