// # updater-core
//
// Core library for the DDNS updater.
//
// ## Architecture Overview
//
// - **RecordStore**: thread-safe table of managed records and their
//   append-only event history, persisted through a `Persistence` collaborator
// - **Runner**: periodic/forced update cycles with per-record fan-out,
//   coalesced force signals and draining shutdown
// - **IpResolver**: trait for determining the public IP per address family
// - **DnsProvider**: trait for the "update one record" provider contract
// - **ProviderRegistry**: plugin registry mapping provider identifiers to factories
// - **Notifier**: fire-and-forget notification sink
//
// ## Design Principles
//
// 1. **Separation of Concerns**: scheduling and state live here; network
//    lookups and provider APIs live in plugin crates
// 2. **Fault Isolation**: a failing provider or resolver only affects the
//    records that depend on it
// 3. **Plugin-Based**: providers are registered dynamically, no hard-coded if-else
// 4. **Library-First**: the daemon is a thin wiring layer over this crate

pub mod config;
pub mod error;
pub mod persistence;
pub mod record;
pub mod registry;
pub mod runner;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use config::{
    IpLookupConfig, IpMethod, IpVersion, MAX_PERIOD, RecordConfig, RunnerConfig, UpdaterConfig,
};
pub use error::{Error, FailureKind, Result};
pub use persistence::{JsonPersistence, MemoryPersistence};
pub use record::{Event, Record, RecordId, Status};
pub use registry::ProviderRegistry;
pub use runner::{CycleSummary, ForceTrigger, Runner, RunnerEvent, RunnerState};
pub use store::RecordStore;
pub use traits::{DnsProvider, DnsProviderFactory, IpResolver, LogNotifier, Notifier, Priority, UpdateResult};
