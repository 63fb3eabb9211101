// # Persistence Trait
//
// Durable storage of per-record event history.
//
// ## Implementations
//
// - JSON file: [`crate::persistence::JsonPersistence`]
// - In-memory: [`crate::persistence::MemoryPersistence`]

use async_trait::async_trait;

use crate::record::{Event, RecordId};

/// Trait for event history persistence
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage
/// - ✅ Buffer writes, as long as `flush()` persists everything pending
///
/// ## Forbidden Capabilities
/// - ❌ Reorder or rewrite appended events
/// - ❌ Spawn background tasks
///
/// The record store never appends concurrently for the same record, so
/// implementations only need to be safe across different records.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Ordered event history of a record (empty if none was stored)
    async fn load_events(&self, record: &RecordId) -> Result<Vec<Event>, crate::Error>;

    /// Append one event to a record's history
    async fn append_event(&self, record: &RecordId, event: &Event) -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
