//! Plugin-based provider registry
//!
//! Provider crates register a factory under the identifier records use in
//! their `provider` field; the daemon then builds one provider per record
//! without a hardcoded match over provider names.
//!
//! ## Registration
//!
//! ```rust,ignore
//! // In updater-provider-cloudflare
//! pub fn register(registry: &ProviderRegistry) {
//!     registry.register_provider("cloudflare", Box::new(CloudflareFactory));
//! }
//! ```

use crate::config::RecordConfig;
use crate::error::{Error, Result};
use crate::record::RecordId;
use crate::traits::{DnsProvider, DnsProviderFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Registry of DNS provider factories keyed by provider identifier
///
/// Uses interior mutability with RwLock, allowing concurrent reads and
/// exclusive writes.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Box<dyn DnsProviderFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a DNS provider factory under `name`
    ///
    /// Registering the same name twice replaces the earlier factory.
    pub fn register_provider(&self, name: impl Into<String>, factory: Box<dyn DnsProviderFactory>) {
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        providers.insert(name.into(), factory);
    }

    /// Create the provider for one record
    ///
    /// Fails with [`Error::Config`] if the record's provider identifier is
    /// not registered, or with the factory's error if its settings are invalid.
    pub fn create_provider(&self, config: &RecordConfig) -> Result<Box<dyn DnsProvider>> {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = providers.get(&config.provider).ok_or_else(|| {
            Error::config(format!(
                "Unknown provider '{}' for record {}",
                config.provider,
                config.id()
            ))
        })?;

        factory.create(config)
    }

    /// Create providers for every record, keyed by record identity
    pub fn create_providers(
        &self,
        records: &[RecordConfig],
    ) -> Result<HashMap<RecordId, Arc<dyn DnsProvider>>> {
        records
            .iter()
            .map(|record| {
                let provider: Arc<dyn DnsProvider> = Arc::from(self.create_provider(record)?);
                Ok((record.id(), provider))
            })
            .collect()
    }

    /// List all registered provider identifiers, sorted
    pub fn list_providers(&self) -> Vec<String> {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider identifier is registered
    pub fn has_provider(&self, name: &str) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}
