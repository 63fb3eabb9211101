// # JSON Persistence
//
// File-based implementation of Persistence with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: every append rewrites the document through a temp file
//   and a rename
// - Backup: the previous document is kept as `<file>.backup`
// - Recovery: a corrupted main file falls back to the backup; if the backup
//   is missing or corrupted too, loading fails
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "records": [
//     {
//       "domain": "example.com",
//       "host": "@",
//       "events": [
//         { "time": "2025-01-09T12:00:00Z", "ip": "1.2.3.4", "status": "up_to_date", "message": "updated" }
//       ]
//     }
//   ]
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::Error;
use crate::record::{Event, RecordId};
use crate::traits::Persistence;

/// Updates file format version
const UPDATES_FILE_VERSION: &str = "1.0";

/// JSON file persistence with crash recovery
///
/// The whole document is held in memory; every append is written through
/// immediately. A failed write leaves the document dirty and the next
/// append or [`Persistence::flush`] retries it.
///
/// # Example
///
/// ```rust,no_run
/// use updater_core::persistence::JsonPersistence;
/// use updater_core::traits::Persistence;
/// use updater_core::record::{Event, RecordId};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let persistence = JsonPersistence::open("/var/lib/ddns-updater/updates.json").await?;
///     let id = RecordId::new("example.com", "@");
///
///     persistence.append_event(&id, &Event::up_to_date("1.2.3.4".parse()?, "updated")).await?;
///     let history = persistence.load_events(&id).await?;
///     assert_eq!(history.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct JsonPersistence {
    path: PathBuf,
    state: Mutex<JsonState>,
}

#[derive(Debug)]
struct JsonState {
    records: Vec<StoredRecord>,
    dirty: bool,
}

/// Serializable updates file format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UpdatesFile {
    version: String,
    records: Vec<StoredRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    domain: String,
    host: String,
    #[serde(default)]
    events: Vec<Event>,
}

impl StoredRecord {
    fn is(&self, record: &RecordId) -> bool {
        self.domain == record.domain && self.host == record.host
    }
}

/// Why a file could not be loaded
enum LoadFailure {
    /// Unreadable (permissions, I/O)
    Io(Error),
    /// Readable but not a valid updates document
    Corrupt(Error),
}

impl JsonPersistence {
    /// Open or create the updates file at `path`
    ///
    /// Parent directories are created as needed. A missing file means empty
    /// history.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create data directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let records = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Mutex::new(JsonState {
                records,
                dirty: false,
            }),
        })
    }

    /// Path of the updates file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_with_recovery(path: &Path) -> Result<Vec<StoredRecord>, Error> {
        match Self::load_file(path).await {
            Ok(records) => {
                tracing::debug!("Loaded history for {} records", records.len());
                Ok(records)
            }
            Err(LoadFailure::Io(e)) => Err(e),
            Err(LoadFailure::Corrupt(e)) => {
                tracing::warn!(
                    "Updates file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    return Err(Error::persistence(format!(
                        "{} is corrupted and no backup exists",
                        path.display()
                    )));
                }

                match Self::load_file(&backup_path).await {
                    Ok(records) => {
                        tracing::info!("Recovered history from backup: {} records", records.len());
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore updates file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(records)
                    }
                    Err(LoadFailure::Io(backup_err) | LoadFailure::Corrupt(backup_err)) => {
                        Err(Error::persistence(format!(
                            "{} is corrupted and its backup is unusable: {}",
                            path.display(),
                            backup_err
                        )))
                    }
                }
            }
        }
    }

    async fn load_file(path: &Path) -> Result<Vec<StoredRecord>, LoadFailure> {
        if !path.exists() {
            tracing::debug!("Updates file does not exist: {}", path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadFailure::Io(Error::persistence(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        })?;

        let file: UpdatesFile = serde_json::from_str(&content).map_err(|e| {
            LoadFailure::Corrupt(Error::persistence(format!(
                "Failed to parse {}: {}",
                path.display(),
                e
            )))
        })?;

        if file.version != UPDATES_FILE_VERSION {
            tracing::warn!(
                "Updates file version mismatch: expected {}, got {}. Attempting to load anyway.",
                UPDATES_FILE_VERSION,
                file.version
            );
        }

        Ok(file.records)
    }

    /// Write the document atomically; the caller holds the state lock
    async fn write_file(&self, state: &mut JsonState) -> Result<(), Error> {
        let file = UpdatesFile {
            version: UPDATES_FILE_VERSION.to_string(),
            records: state.records.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let temp_path = Self::temp_path(&self.path);
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.sync_all().await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists()
            && let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await
        {
            tracing::warn!("Failed to create backup: {}", e);
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        state.dirty = false;
        tracing::trace!("Updates written to {}", self.path.display());
        Ok(())
    }

    fn temp_path(path: &Path) -> PathBuf {
        with_suffix(path, ".tmp")
    }

    fn backup_path(path: &Path) -> PathBuf {
        with_suffix(path, ".backup")
    }
}

/// `updates.json` + `.backup` -> `updates.json.backup`
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[async_trait]
impl Persistence for JsonPersistence {
    async fn load_events(&self, record: &RecordId) -> Result<Vec<Event>, Error> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .find(|stored| stored.is(record))
            .map(|stored| stored.events.clone())
            .unwrap_or_default())
    }

    async fn append_event(&self, record: &RecordId, event: &Event) -> Result<(), Error> {
        let mut state = self.state.lock().await;

        match state.records.iter_mut().find(|stored| stored.is(record)) {
            Some(stored) => stored.events.push(event.clone()),
            None => state.records.push(StoredRecord {
                domain: record.domain.clone(),
                host: record.host.clone(),
                events: vec![event.clone()],
            }),
        }
        state.dirty = true;

        self.write_file(&mut state).await
    }

    async fn flush(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if state.dirty {
            self.write_file(&mut state).await
        } else {
            Ok(())
        }
    }
}
