// # Memory Persistence
//
// In-memory implementation of Persistence.
//
// Nothing survives a restart: every record starts `Unset` and is updated on
// the first cycle. Used by tests and ephemeral deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::record::{Event, RecordId};
use crate::traits::Persistence;

/// In-memory event history
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    inner: Arc<RwLock<HashMap<RecordId, Vec<Event>>>>,
}

impl MemoryPersistence {
    /// Create an empty memory persistence
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory persistence preloaded with history
    pub fn with_history(history: impl IntoIterator<Item = (RecordId, Vec<Event>)>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(history.into_iter().collect())),
        }
    }

    /// Events stored for a record
    pub async fn events(&self, record: &RecordId) -> Vec<Event> {
        self.inner
            .read()
            .await
            .get(record)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load_events(&self, record: &RecordId) -> Result<Vec<Event>, Error> {
        Ok(self.events(record).await)
    }

    async fn append_event(&self, record: &RecordId, event: &Event) -> Result<(), Error> {
        self.inner
            .write()
            .await
            .entry(record.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}
