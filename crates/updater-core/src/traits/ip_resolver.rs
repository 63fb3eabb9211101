// # IP Resolver Trait
//
// Determines the caller's current public IP address for an address family.
//
// ## Implementations
//
// - HTTP endpoints and OpenDNS self-lookup: `updater-ip` crate

use async_trait::async_trait;
use std::net::IpAddr;

use crate::config::IpVersion;

/// Trait for public IP resolver implementations
///
/// # Trust Level: Semi-Trusted
///
/// ## Allowed Capabilities
/// - ✅ Outbound network calls to the configured lookup endpoints
/// - ✅ Fall back across endpoints in a fixed preference order
///
/// ## Forbidden Capabilities
/// - ❌ Cache results across calls (the runner resolves once per family per cycle)
/// - ❌ Block beyond the per-attempt timeout of each endpoint
/// - ❌ Touch records, providers or persistence
#[async_trait]
pub trait IpResolver: Send + Sync {
    /// Resolve the public IP for `version`
    ///
    /// The returned address belongs to the requested family (any family for
    /// [`IpVersion::Both`]). Fails only when every configured endpoint failed.
    async fn resolve(&self, version: IpVersion) -> Result<IpAddr, crate::Error>;
}
