//! Record store
//!
//! The single owner of all [`Record`]s. The runner mutates records only
//! through [`RecordStore::apply_result`]; status surfaces read snapshots
//! through [`RecordStore::all`] and [`RecordStore::get`].
//!
//! ## Concurrency
//!
//! - Records live behind one `RwLock`; an event is applied under the write
//!   lock so readers never observe a half-applied event.
//! - Persistence writes are serialized per record by a per-record mutex that
//!   is held from the in-memory apply until the write returns, so events
//!   reach persistence in history order.
//! - Persistence is best-effort: the in-memory state advances even when the
//!   write fails, and the error is returned for logging.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::config::RecordConfig;
use crate::error::{Error, Result};
use crate::record::{Event, Record, RecordId, Status};
use crate::traits::Persistence;

/// Thread-safe in-memory record table backed by a persistence collaborator
pub struct RecordStore {
    /// Records in configuration order
    records: RwLock<Vec<Record>>,
    /// Position of each record in `records`, fixed after construction
    index: HashMap<RecordId, usize>,
    /// Per-record persistence write serialization
    write_locks: HashMap<RecordId, Mutex<()>>,
    persistence: Arc<dyn Persistence>,
}

impl RecordStore {
    /// Build the store from record configurations and persisted history
    ///
    /// Fails on duplicate `(domain, host)` identities and on history that
    /// cannot be loaded; both are startup errors.
    pub async fn load(configs: &[RecordConfig], persistence: Arc<dyn Persistence>) -> Result<Self> {
        let mut records = Vec::with_capacity(configs.len());
        let mut index = HashMap::with_capacity(configs.len());
        let mut write_locks = HashMap::with_capacity(configs.len());

        for config in configs {
            let id = config.id();
            if index.contains_key(&id) {
                return Err(Error::config(format!(
                    "Duplicate record: domain {} host {}",
                    id.domain, id.host
                )));
            }

            let history = persistence.load_events(&id).await?;
            let record = Record::new(config, history);
            tracing::debug!(
                "Loaded record {} ({} events, status {})",
                id,
                record.history.len(),
                record.status
            );

            index.insert(id.clone(), records.len());
            write_locks.insert(id, Mutex::new(()));
            records.push(record);
        }

        Ok(Self {
            records: RwLock::new(records),
            index,
            write_locks,
            persistence,
        })
    }

    /// Snapshot of one record
    pub async fn get(&self, id: &RecordId) -> Option<Record> {
        let position = *self.index.get(id)?;
        self.records.read().await.get(position).cloned()
    }

    /// Snapshots of all records, in configuration order
    pub async fn all(&self) -> Vec<Record> {
        self.records.read().await.clone()
    }

    /// Number of managed records
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Identities of all managed records, unordered
    pub fn ids(&self) -> impl Iterator<Item = &RecordId> {
        self.index.keys()
    }

    /// Whether the store manages no records
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Mark a record as having an update in flight
    ///
    /// This is a transient marker, not a history event; it is replaced by
    /// the status of the event passed to [`Self::apply_result`], or undone
    /// by [`Self::cancel_update`].
    pub async fn begin_update(&self, id: &RecordId) -> Result<()> {
        let position = self.position(id)?;
        let mut records = self.records.write().await;
        records[position].status = Status::Updating;
        Ok(())
    }

    /// Undo [`Self::begin_update`] when no event will be applied
    pub async fn cancel_update(&self, id: &RecordId) -> Result<()> {
        let position = self.position(id)?;
        let mut records = self.records.write().await;
        let record = &mut records[position];
        if record.status == Status::Updating {
            record.status = record
                .last_event()
                .map(|event| event.status)
                .unwrap_or(Status::Unset);
        }
        Ok(())
    }

    /// Append `event` to a record and update its state, then persist it
    ///
    /// The in-memory update is applied atomically before persistence is
    /// attempted and is kept if the persistence write fails; that failure is
    /// returned so the caller can log it.
    pub async fn apply_result(&self, id: &RecordId, event: Event) -> Result<()> {
        let position = self.position(id)?;
        let write_lock = self
            .write_locks
            .get(id)
            .ok_or_else(|| Error::not_found(format!("No record {}", id)))?;
        let _serialized = write_lock.lock().await;

        let applied = {
            let mut records = self.records.write().await;
            records[position].apply(event).clone()
        };

        self.persistence
            .append_event(id, &applied)
            .await
            .map_err(|e| Error::persistence(format!("Failed to persist event for {}: {}", id, e)))
    }

    /// Persist anything the persistence layer still holds in memory
    pub async fn flush(&self) -> Result<()> {
        self.persistence.flush().await
    }

    fn position(&self, id: &RecordId) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| Error::not_found(format!("No record {}", id)))
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("records", &self.index.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use async_trait::async_trait;
    use std::net::IpAddr;

    struct BrokenPersistence;

    #[async_trait]
    impl Persistence for BrokenPersistence {
        async fn load_events(&self, _record: &RecordId) -> Result<Vec<Event>> {
            Ok(Vec::new())
        }

        async fn append_event(&self, _record: &RecordId, _event: &Event) -> Result<()> {
            Err(Error::persistence("disk full"))
        }

        async fn flush(&self) -> Result<()> {
            Err(Error::persistence("disk full"))
        }
    }

    fn configs() -> Vec<RecordConfig> {
        vec![
            RecordConfig::new("example.com", "www", "cloudflare"),
            RecordConfig::new("example.com", "@", "cloudflare"),
            RecordConfig::new("example.org", "home", "duckdns"),
        ]
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn all_preserves_configuration_order() {
        let store = RecordStore::load(&configs(), Arc::new(MemoryPersistence::new()))
            .await
            .unwrap();

        let ids: Vec<String> = store.all().await.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["www.example.com", "example.com", "home.example.org"]);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_identity_rejected() {
        let mut configs = configs();
        configs.push(RecordConfig::new("example.com", "www", "duckdns"));

        let err = RecordStore::load(&configs, Arc::new(MemoryPersistence::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn load_replays_persisted_history() {
        let id = RecordId::new("example.com", "www");
        let persistence = MemoryPersistence::with_history([(
            id.clone(),
            vec![Event::up_to_date(ip("1.2.3.4"), "created")],
        )]);

        let store = RecordStore::load(&configs(), Arc::new(persistence)).await.unwrap();
        let record = store.get(&id).await.unwrap();

        assert_eq!(record.status, Status::UpToDate);
        assert_eq!(record.current_ip, Some(ip("1.2.3.4")));
    }

    #[tokio::test]
    async fn apply_result_updates_state_and_persists() {
        let persistence = MemoryPersistence::new();
        let store = RecordStore::load(&configs(), Arc::new(persistence.clone()))
            .await
            .unwrap();
        let id = RecordId::new("example.org", "home");

        store.begin_update(&id).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().status, Status::Updating);

        store
            .apply_result(&id, Event::up_to_date(ip("5.6.7.8"), "updated"))
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, Status::UpToDate);
        assert_eq!(record.current_ip, Some(ip("5.6.7.8")));
        assert_eq!(record.history.len(), 1);
        assert_eq!(persistence.events(&id).await, record.history);
    }

    #[tokio::test]
    async fn persistence_failure_still_applies_in_memory() {
        let store = RecordStore::load(&configs(), Arc::new(BrokenPersistence))
            .await
            .unwrap();
        let id = RecordId::new("example.com", "@");

        let result = store
            .apply_result(&id, Event::up_to_date(ip("1.2.3.4"), "updated"))
            .await;

        assert!(matches!(result, Err(Error::Persistence(_))));
        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, Status::UpToDate);
        assert_eq!(record.current_ip, Some(ip("1.2.3.4")));
    }

    #[tokio::test]
    async fn cancel_update_restores_last_status() {
        let store = RecordStore::load(&configs(), Arc::new(MemoryPersistence::new()))
            .await
            .unwrap();
        let id = RecordId::new("example.com", "www");

        store.begin_update(&id).await.unwrap();
        store.cancel_update(&id).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().status, Status::Unset);

        store.apply_result(&id, Event::failed("boom")).await.unwrap();
        store.begin_update(&id).await.unwrap();
        store.cancel_update(&id).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().status, Status::Fail);
    }

    #[tokio::test]
    async fn unknown_record_is_not_found() {
        let store = RecordStore::load(&configs(), Arc::new(MemoryPersistence::new()))
            .await
            .unwrap();
        let id = RecordId::new("nope.example", "@");

        assert!(store.get(&id).await.is_none());
        assert!(matches!(
            store.apply_result(&id, Event::failed("x")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_applies_on_different_records() {
        let store = Arc::new(
            RecordStore::load(&configs(), Arc::new(MemoryPersistence::new()))
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for config in configs() {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..20u8 {
                    store
                        .apply_result(&config.id(), Event::up_to_date(IpAddr::from([10, 0, 0, i]), "ok"))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for record in store.all().await {
            assert_eq!(record.history.len(), 20);
            assert_eq!(record.current_ip, Some(IpAddr::from([10, 0, 0, 19])));
            assert!(record.history.windows(2).all(|w| w[0].time < w[1].time));
        }
    }
}
