//! In-memory SQLite engine: snapshot export and restore

use rusqlite::serialize::OwnedData;
use rusqlite::{ffi, Connection, DatabaseName};
use std::ptr::NonNull;

use crate::error::StorageError;
use crate::Result;

/// Oldest library release where serialize/deserialize are always compiled in.
const MIN_VERSION_NUMBER: i32 = 3_036_000;

/// The loaded engine library. Loaded once per context and cached.
#[derive(Debug, Clone, Copy)]
pub struct EngineRuntime {
    version: &'static str,
}

impl EngineRuntime {
    pub fn load() -> Result<Self> {
        if rusqlite::version_number() < MIN_VERSION_NUMBER {
            return Err(StorageError::EngineUnavailable(format!(
                "SQLite {} does not support database serialization",
                rusqlite::version()
            )));
        }

        Ok(Self {
            version: rusqlite::version(),
        })
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    /// A fresh, empty in-memory database.
    pub fn open_empty(&self) -> Result<Connection> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    /// Rebuild an in-memory database from a persisted blob and probe it.
    ///
    /// Every failure on this path is reported as `CorruptedDatabase`.
    pub fn restore(&self, blob: &[u8], verify_integrity: bool) -> Result<Connection> {
        let corrupted = |e: rusqlite::Error| StorageError::CorruptedDatabase(e.to_string());

        let mut conn = Connection::open_in_memory()?;
        conn.deserialize(DatabaseName::Main, owned_copy(blob)?, false)
            .map_err(corrupted)?;

        probe(&conn, verify_integrity)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(corrupted)?;

        Ok(conn)
    }
}

/// Serialize the whole main database.
pub fn export(conn: &Connection) -> Result<Vec<u8>> {
    let data = conn.serialize(DatabaseName::Main)?;
    Ok(data.to_vec())
}

/// Cheap read-only query that fails on anything that is not a database.
/// `full` adds `PRAGMA quick_check`.
fn probe(conn: &Connection, full: bool) -> Result<()> {
    let corrupted = |e: rusqlite::Error| StorageError::CorruptedDatabase(e.to_string());

    let tables: i64 = conn
        .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0))
        .map_err(corrupted)?;

    if full {
        let verdict: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(corrupted)?;
        if verdict != "ok" {
            return Err(StorageError::CorruptedDatabase(verdict));
        }
    }

    tracing::debug!(tables, "Database integrity verified");
    Ok(())
}

/// Copy `blob` into memory owned by SQLite, as `deserialize` requires.
fn owned_copy(blob: &[u8]) -> Result<OwnedData> {
    if blob.is_empty() {
        return Err(StorageError::CorruptedDatabase(
            "persisted blob is empty".to_string(),
        ));
    }

    // SAFETY: sqlite3_malloc64 returns null or a writable block of at least
    // `blob.len()` bytes.
    let raw = unsafe { ffi::sqlite3_malloc64(blob.len() as _) }.cast::<u8>();
    let ptr = NonNull::new(raw).ok_or_else(|| {
        StorageError::EngineUnavailable("out of memory restoring database".to_string())
    })?;

    // SAFETY: `ptr` is a fresh sqlite3 allocation of `blob.len()` bytes that
    // does not overlap `blob`; ownership passes to the returned value.
    unsafe {
        std::ptr::copy_nonoverlapping(blob.as_ptr(), ptr.as_ptr(), blob.len());
        Ok(OwnedData::from_raw_nonnull(ptr, blob.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_restore() {
        let runtime = EngineRuntime::load().unwrap();
        let conn = runtime.open_empty().unwrap();
        conn.execute_batch(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL);
             INSERT INTO notes (body) VALUES ('first'), ('second');",
        )
        .unwrap();

        let blob = export(&conn).unwrap();
        let restored = runtime.restore(&blob, true).unwrap();

        let count: i64 = restored
            .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        // The restored database stays writable.
        restored
            .execute("INSERT INTO notes (body) VALUES ('third')", [])
            .unwrap();
    }

    #[test]
    fn test_garbage_is_corrupted() {
        let runtime = EngineRuntime::load().unwrap();
        let err = runtime.restore(&[0xAB; 1024], false).unwrap_err();
        assert!(matches!(err, StorageError::CorruptedDatabase(_)));
    }

    #[test]
    fn test_empty_blob_is_corrupted() {
        let runtime = EngineRuntime::load().unwrap();
        let err = runtime.restore(&[], false).unwrap_err();
        assert!(matches!(err, StorageError::CorruptedDatabase(_)));
    }
}
