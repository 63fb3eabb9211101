// # DNS Provider Trait
//
// Defines the "update one record" contract every provider plugin satisfies.
//
// ## Implementations
//
// - Cloudflare: `updater-provider-cloudflare` crate
// - DuckDNS: `updater-provider-duckdns` crate
//
// ## Usage
//
// ```rust,ignore
// use updater_core::{DnsProvider, RecordId};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let provider = /* DnsProvider implementation */;
//
//     provider.update_record(
//         &RecordId::new("example.com", "www"),
//         std::net::IpAddr::from([192, 168, 1, 1]),
//     ).await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::net::IpAddr;

use crate::config::RecordConfig;
use crate::record::RecordId;

/// Result of a DNS update operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateResult {
    /// Record was successfully updated
    Updated {
        /// The IP the provider held before, if it reported one
        previous_ip: Option<IpAddr>,
    },
    /// Record already had the requested IP (no-op)
    Unchanged,
    /// Record was created (didn't exist before)
    Created,
}

impl UpdateResult {
    /// Diagnostic message stored on the resulting event
    pub fn message(&self) -> String {
        match self {
            UpdateResult::Updated {
                previous_ip: Some(previous),
            } => format!("updated from {}", previous),
            UpdateResult::Updated { previous_ip: None } => "updated".to_string(),
            UpdateResult::Unchanged => "already up to date at provider".to_string(),
            UpdateResult::Created => "record created".to_string(),
        }
    }
}

/// Trait for DNS provider implementations
///
/// # Trust Level: Untrusted
///
/// Providers are external integrations with strict limitations.
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS API calls to their own endpoints
/// - ✅ Parse provider-specific responses
/// - ✅ Classify failures through [`crate::Error`] variants
///
/// ## Forbidden Capabilities
/// - ❌ Retry internally (the next cycle is the retry)
/// - ❌ Spawn tasks or threads
/// - ❌ Touch the record store or persistence
/// - ❌ Decide whether an update is needed (owned by the `Runner`)
///
/// A failed call returns an error whose variant tells the runner whether it
/// is transient or permanent (see [`crate::Error::failure_kind`]); both kinds
/// are retried on the next cycle.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Point `record` at `ip`
    ///
    /// Exactly one logical update attempt per invocation, bounded by the
    /// implementation's own client timeout. Must be idempotent: returning
    /// [`UpdateResult::Unchanged`] when the provider already holds `ip`.
    async fn update_record(
        &self,
        record: &RecordId,
        ip: IpAddr,
    ) -> Result<UpdateResult, crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing DNS providers from configuration
pub trait DnsProviderFactory: Send + Sync {
    /// Create a DnsProvider for one record from its opaque settings
    ///
    /// Invalid or missing settings are reported as [`crate::Error::Config`].
    fn create(&self, config: &RecordConfig) -> Result<Box<dyn DnsProvider>, crate::Error>;
}
