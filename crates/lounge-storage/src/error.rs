//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// The block store could not be opened or read.
    #[error("Block store unavailable: {0}")]
    StoreUnavailable(String),

    /// A snapshot write did not commit. Nothing may be assumed persisted.
    #[error("Failed to persist database: {0}")]
    PersistFailure(String),

    /// The persisted blob could not be restored or failed the integrity probe.
    #[error("Corrupted database: {0}")]
    CorruptedDatabase(String),

    #[error("Database not initialized")]
    NotInitialized,

    #[error("Engine runtime unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Schema initialization failed: {0}")]
    Schema(String),

    #[error("Persist queue closed")]
    QueueClosed,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
