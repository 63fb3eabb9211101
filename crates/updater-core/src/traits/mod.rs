//! Core traits for the DDNS updater
//!
//! This module defines the seams between the core and its collaborators.
//!
//! - [`IpResolver`]: Determine the current public IP for an address family
//! - [`DnsProvider`]: Apply an IP to one DNS record via a provider API
//! - [`Persistence`]: Load and append record event history
//! - [`Notifier`]: Fire-and-forget notification sink

pub mod dns_provider;
pub mod ip_resolver;
pub mod notifier;
pub mod persistence;

pub use dns_provider::{DnsProvider, DnsProviderFactory, UpdateResult};
pub use ip_resolver::IpResolver;
pub use notifier::{LogNotifier, Notifier, Priority};
pub use persistence::Persistence;
