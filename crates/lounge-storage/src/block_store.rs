//! Block store adapter
//!
//! A container holds one record store, the record store holds one blob
//! under one fixed key. The on-disk implementation uses a SQLite file as
//! the container, a table as the record store and `PRAGMA user_version` as
//! the container version. Each call opens a fresh connection; nothing is
//! pooled.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::StorageError;
use crate::Result;

/// Durable storage for the serialized database.
///
/// `put` and `clear` resolve only after their transaction committed.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Open the container, creating the record store on first use.
    async fn open(&self) -> Result<()>;

    /// Read the stored blob. `Ok(None)` when nothing was ever written.
    async fn get(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored blob inside one transaction.
    async fn put(&self, blob: Vec<u8>) -> Result<()>;

    /// Delete the stored blob. Best effort: failures are logged and
    /// reported as `false`.
    async fn clear(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct BlockStoreConfig {
    /// Path of the container file
    pub container_path: PathBuf,
    /// Container version; a container stamped with a newer one is refused
    pub container_version: u32,
    /// Record store (table) name
    pub store_name: String,
    /// Key the blob is stored under
    pub blob_key: String,
}

impl BlockStoreConfig {
    pub fn new(container_path: impl Into<PathBuf>) -> Self {
        Self {
            container_path: container_path.into(),
            container_version: 1,
            store_name: "sqliteDB".to_string(),
            blob_key: "database".to_string(),
        }
    }
}

pub struct SqliteBlockStore {
    config: Arc<BlockStoreConfig>,
}

impl SqliteBlockStore {
    pub fn new(config: BlockStoreConfig) -> Result<Self> {
        if !is_identifier(&config.store_name) {
            return Err(StorageError::StoreUnavailable(format!(
                "invalid record store name: {:?}",
                config.store_name
            )));
        }
        if config.container_version == 0 {
            return Err(StorageError::StoreUnavailable(
                "container version must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &BlockStoreConfig {
        &self.config
    }
}

#[async_trait]
impl BlockStore for SqliteBlockStore {
    async fn open(&self) -> Result<()> {
        let config = Arc::clone(&self.config);
        run_blocking(move || connect(&config).map(|_| ())).await?;

        tracing::debug!(
            container = %self.config.container_path.display(),
            store = %self.config.store_name,
            "Opened block store"
        );

        Ok(())
    }

    async fn get(&self) -> Result<Option<Vec<u8>>> {
        let config = Arc::clone(&self.config);
        let blob = run_blocking(move || {
            let conn = connect(&config)?;
            let sql = format!(
                "SELECT value FROM \"{}\" WHERE key = ?1",
                config.store_name
            );
            conn.query_row(&sql, [&config.blob_key], |row| row.get::<_, Vec<u8>>(0))
                .optional()
                .map_err(|e| StorageError::StoreUnavailable(e.to_string()))
        })
        .await?;

        match &blob {
            Some(bytes) => tracing::info!(bytes = bytes.len(), "Loaded persisted database"),
            None => tracing::info!("No persisted database found"),
        }

        Ok(blob)
    }

    async fn put(&self, blob: Vec<u8>) -> Result<()> {
        if blob.is_empty() {
            return Err(StorageError::PersistFailure(
                "refusing to persist an empty snapshot".to_string(),
            ));
        }

        let size = blob.len();
        let config = Arc::clone(&self.config);
        run_blocking(move || {
            let failure = |e: rusqlite::Error| StorageError::PersistFailure(e.to_string());

            let mut conn = connect(&config)?;
            let tx = conn.transaction().map_err(failure)?;
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO \"{}\" (key, value) VALUES (?1, ?2)",
                    config.store_name
                ),
                rusqlite::params![config.blob_key, blob],
            )
            .map_err(failure)?;
            // The commit is the durability signal, not the statement.
            tx.commit().map_err(failure)
        })
        .await?;

        tracing::debug!(bytes = size, "Committed database snapshot");

        Ok(())
    }

    async fn clear(&self) -> bool {
        let config = Arc::clone(&self.config);
        let result = run_blocking(move || {
            let mut conn = connect(&config)?;
            let tx = conn.transaction()?;
            tx.execute(
                &format!("DELETE FROM \"{}\" WHERE key = ?1", config.store_name),
                [&config.blob_key],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await;

        match result {
            Ok(()) => {
                tracing::info!("Cleared persisted database");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to clear persisted database");
                false
            }
        }
    }
}

/// Open the container and bring its record store up to the configured
/// version.
fn connect(config: &BlockStoreConfig) -> Result<Connection> {
    let unavailable = |e: rusqlite::Error| StorageError::StoreUnavailable(e.to_string());

    if let Some(parent) = config.container_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::StoreUnavailable(e.to_string()))?;
        }
    }

    let mut conn = Connection::open(&config.container_path).map_err(unavailable)?;

    let current: u32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(unavailable)?;

    if current > config.container_version {
        return Err(StorageError::StoreUnavailable(format!(
            "container version {} is newer than supported version {}",
            current, config.container_version
        )));
    }

    if current < config.container_version {
        let tx = conn.transaction().map_err(unavailable)?;
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            )",
            config.store_name
        ))
        .map_err(unavailable)?;
        tx.pragma_update(None, "user_version", config.container_version)
            .map_err(unavailable)?;
        tx.commit().map_err(unavailable)?;

        tracing::info!(
            store = %config.store_name,
            from_version = current,
            to_version = config.container_version,
            "Upgraded block store container"
        );
    }

    Ok(conn)
}

async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::StoreUnavailable(format!("storage task failed: {}", e)))?
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
