use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::state_sqlite::SqliteStateStore;

const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("data directory is unavailable")]
    MissingDataDir,
}

/// What the last successful sync recorded for a document name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub remote_id: String,
    pub fingerprint: String,
    pub last_synced_at: i64,
}

/// Key-value cache of [`SyncRecord`]s keyed by document name.
///
/// Writes may be buffered until `flush`. Callers must treat a missing entry
/// as "unknown", never as "unchanged".
#[allow(async_fn_in_trait)]
pub trait StateStore {
    async fn get(&self, name: &str) -> Result<Option<SyncRecord>, StateError>;
    async fn put(&mut self, name: &str, record: SyncRecord) -> Result<(), StateError>;
    async fn remove(&mut self, name: &str) -> Result<(), StateError>;
    async fn flush(&mut self) -> Result<(), StateError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    documents: BTreeMap<String, SyncRecord>,
}

/// State kept in one JSON file. `flush` writes a temp file next to the
/// target and renames it over.
#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
    records: BTreeMap<String, SyncRecord>,
    dirty: bool,
}

impl JsonStateStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<StateFile>(&bytes) {
                Ok(file) => file.documents,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "state file unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), entries = records.len(), "state loaded");
        Ok(Self {
            path,
            records,
            dirty: false,
        })
    }
}

impl StateStore for JsonStateStore {
    async fn get(&self, name: &str) -> Result<Option<SyncRecord>, StateError> {
        Ok(self.records.get(name).cloned())
    }

    async fn put(&mut self, name: &str, record: SyncRecord) -> Result<(), StateError> {
        if self.records.get(name) != Some(&record) {
            self.records.insert(name.to_string(), record);
            self.dirty = true;
        }
        Ok(())
    }

    async fn remove(&mut self, name: &str) -> Result<(), StateError> {
        if self.records.remove(name).is_some() {
            self.dirty = true;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), StateError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = StateFile {
            version: STATE_FORMAT_VERSION,
            documents: self.records.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        self.dirty = false;
        debug!(path = %self.path.display(), entries = self.records.len(), "state flushed");
        Ok(())
    }
}

/// Non-persistent store, for dry runs and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    records: BTreeMap<String, SyncRecord>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &BTreeMap<String, SyncRecord> {
        &self.records
    }
}

impl StateStore for MemoryStateStore {
    async fn get(&self, name: &str) -> Result<Option<SyncRecord>, StateError> {
        Ok(self.records.get(name).cloned())
    }

    async fn put(&mut self, name: &str, record: SyncRecord) -> Result<(), StateError> {
        self.records.insert(name.to_string(), record);
        Ok(())
    }

    async fn remove(&mut self, name: &str) -> Result<(), StateError> {
        self.records.remove(name);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), StateError> {
        Ok(())
    }
}

/// Backend chosen at runtime from configuration.
pub enum AnyStateStore {
    Json(JsonStateStore),
    Sqlite(SqliteStateStore),
}

impl StateStore for AnyStateStore {
    async fn get(&self, name: &str) -> Result<Option<SyncRecord>, StateError> {
        match self {
            AnyStateStore::Json(store) => store.get(name).await,
            AnyStateStore::Sqlite(store) => store.get(name).await,
        }
    }

    async fn put(&mut self, name: &str, record: SyncRecord) -> Result<(), StateError> {
        match self {
            AnyStateStore::Json(store) => store.put(name, record).await,
            AnyStateStore::Sqlite(store) => store.put(name, record).await,
        }
    }

    async fn remove(&mut self, name: &str) -> Result<(), StateError> {
        match self {
            AnyStateStore::Json(store) => store.remove(name).await,
            AnyStateStore::Sqlite(store) => store.remove(name).await,
        }
    }

    async fn flush(&mut self) -> Result<(), StateError> {
        match self {
            AnyStateStore::Json(store) => store.flush().await,
            AnyStateStore::Sqlite(store) => store.flush().await,
        }
    }
}

pub fn default_state_dir() -> Result<PathBuf, StateError> {
    let base = dirs::data_dir().ok_or(StateError::MissingDataDir)?;
    Ok(base.join("kbsync"))
}
