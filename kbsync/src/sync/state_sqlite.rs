use std::path::Path;

use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};

use super::state::{StateError, StateStore, SyncRecord};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// State in an embedded SQLite database. Writes go straight to the
/// database, so `flush` has nothing to do.
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(path: &Path) -> Result<Self, StateError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StateError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }
}

impl StateStore for SqliteStateStore {
    async fn get(&self, name: &str) -> Result<Option<SyncRecord>, StateError> {
        let row = sqlx::query(
            "SELECT remote_id, fingerprint, last_synced_at FROM sync_state WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(SyncRecord {
            remote_id: row.try_get("remote_id")?,
            fingerprint: row.try_get("fingerprint")?,
            last_synced_at: row.try_get("last_synced_at")?,
        }))
    }

    async fn put(&mut self, name: &str, record: SyncRecord) -> Result<(), StateError> {
        sqlx::query(
            "INSERT INTO sync_state (name, remote_id, fingerprint, last_synced_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(name) DO UPDATE SET \
                 remote_id = excluded.remote_id, \
                 fingerprint = excluded.fingerprint, \
                 last_synced_at = excluded.last_synced_at",
        )
        .bind(name)
        .bind(&record.remote_id)
        .bind(&record.fingerprint)
        .bind(record.last_synced_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&mut self, name: &str) -> Result<(), StateError> {
        sqlx::query("DELETE FROM sync_state WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), StateError> {
        Ok(())
    }
}
