//! Process-local block store for tests and embedding

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::block_store::BlockStore;
use crate::error::StorageError;
use crate::Result;

/// Keeps the blob in memory. Sharing one instance between two contexts
/// simulates a restart against the same storage.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blob: Mutex<Option<Vec<u8>>>,
    fail_open: AtomicBool,
    fail_writes: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: Vec<u8>) -> Self {
        let store = Self::default();
        *store.blob.lock() = Some(blob);
        store
    }

    /// Make every operation behave as if the storage subsystem refused access.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Abort every write transaction (`put` and `clear`).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of committed `put` calls.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.blob.lock().clone()
    }

    fn check_open(&self) -> Result<()> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(StorageError::StoreUnavailable(
                "storage access denied".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn open(&self) -> Result<()> {
        self.check_open()
    }

    async fn get(&self) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.blob.lock().clone())
    }

    async fn put(&self, blob: Vec<u8>) -> Result<()> {
        self.check_open()?;
        if blob.is_empty() {
            return Err(StorageError::PersistFailure(
                "refusing to persist an empty snapshot".to_string(),
            ));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::PersistFailure(
                "transaction aborted".to_string(),
            ));
        }

        *self.blob.lock() = Some(blob);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> bool {
        if self.check_open().is_err() || self.fail_writes.load(Ordering::SeqCst) {
            tracing::warn!("Failed to clear persisted database");
            return false;
        }
        self.blob.lock().take();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_write_keeps_previous_blob() {
        let store = MemoryBlockStore::with_blob(vec![1]);
        store.set_fail_writes(true);

        assert!(store.put(vec![2]).await.is_err());
        assert!(!store.clear().await);
        assert_eq!(store.get().await.unwrap(), Some(vec![1]));
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_open() {
        let store = MemoryBlockStore::new();
        store.set_fail_open(true);

        assert!(matches!(
            store.get().await,
            Err(StorageError::StoreUnavailable(_))
        ));
    }
}
