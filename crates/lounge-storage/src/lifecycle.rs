//! Database lifecycle
//!
//! ```text
//! Uninitialized
//!   ↓ runtime loaded, or cached runtime reused
//! Loaded
//!   ↓ blob restored, or schema created and persisted
//! Ready
//!
//! any bootstrap failure → Failed
//! clear_database        → Uninitialized
//! ```

use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::block_store::BlockStore;
use crate::engine::{self, EngineRuntime};
use crate::error::StorageError;
use crate::persist::{self, PersistQueue};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Nothing loaded
    Uninitialized,
    /// Engine runtime loaded, no handle yet
    Loaded,
    /// Runtime and handle both live
    Ready,
    /// Last bootstrap attempt failed
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Loaded => "loaded",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(u64);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleOrigin {
    /// Deserialized from the block store
    Restored,
    /// Built from the schema script on an empty store
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleInfo {
    pub id: HandleId,
    pub origin: HandleOrigin,
}

/// Creates the fixed schema on a fresh database. Must be idempotent.
pub trait SchemaInitializer: Send + Sync {
    fn initialize(&self, conn: &Connection) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextOptions {
    /// Run `PRAGMA quick_check` on restore in addition to the cheap probe
    pub verify_integrity: bool,
}

struct LiveHandle {
    info: HandleInfo,
    conn: Connection,
    /// Last snapshot the block store acknowledged
    committed: Vec<u8>,
}

/// Sole owner of the live in-memory database.
///
/// Reads and writes run synchronously under the handle lock; the lock is
/// never held across an `.await`. Mutations run one at a time, enqueue
/// their snapshot before releasing the lock and return only after it
/// committed. A mutation whose snapshot fails to commit is undone in memory.
pub struct DatabaseContext {
    store: Arc<dyn BlockStore>,
    schema: Arc<dyn SchemaInitializer>,
    options: ContextOptions,
    runtime: RwLock<Option<EngineRuntime>>,
    handle: Mutex<Option<LiveHandle>>,
    state: RwLock<LifecycleState>,
    queue: Mutex<Option<PersistQueue>>,
    /// Serializes bootstrap and clear so two handles can never race in
    bootstrap_gate: tokio::sync::Mutex<()>,
    /// Held by a mutation until its snapshot is acknowledged
    write_gate: tokio::sync::Mutex<()>,
    next_handle_id: AtomicU64,
}

impl DatabaseContext {
    pub fn new(store: Arc<dyn BlockStore>, schema: Arc<dyn SchemaInitializer>) -> Self {
        Self::with_options(store, schema, ContextOptions::default())
    }

    pub fn with_options(
        store: Arc<dyn BlockStore>,
        schema: Arc<dyn SchemaInitializer>,
        options: ContextOptions,
    ) -> Self {
        Self {
            store,
            schema,
            options,
            runtime: RwLock::new(None),
            handle: Mutex::new(None),
            state: RwLock::new(LifecycleState::Uninitialized),
            queue: Mutex::new(None),
            bootstrap_gate: tokio::sync::Mutex::new(()),
            write_gate: tokio::sync::Mutex::new(()),
            next_handle_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// True only when both the engine runtime and a handle are live.
    pub fn is_initialized(&self) -> bool {
        self.runtime.read().is_some() && self.handle.lock().is_some()
    }

    pub fn handle_info(&self) -> Option<HandleInfo> {
        self.handle.lock().as_ref().map(|h| h.info)
    }

    pub fn runtime(&self) -> Option<EngineRuntime> {
        *self.runtime.read()
    }

    /// Load the existing database or create a new one.
    ///
    /// Idempotent: once a handle is live it is returned unchanged.
    pub async fn setup_database(&self) -> Result<HandleInfo> {
        let _gate = self.bootstrap_gate.lock().await;

        let runtime = match self.ensure_runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                *self.state.write() = LifecycleState::Failed;
                return Err(e);
            }
        };

        if let Some(info) = self.handle_info() {
            tracing::debug!(handle_id = %info.id, "Database already set up");
            return Ok(info);
        }
        *self.state.write() = LifecycleState::Loaded;

        match self.bootstrap(runtime).await {
            Ok(info) => {
                *self.state.write() = LifecycleState::Ready;
                tracing::info!(
                    handle_id = %info.id,
                    origin = ?info.origin,
                    sqlite_version = runtime.version(),
                    "Database ready"
                );
                Ok(info)
            }
            Err(e) => {
                *self.state.write() = LifecycleState::Failed;
                tracing::error!(error = %e, "Database setup failed");
                Err(e)
            }
        }
    }

    fn ensure_runtime(&self) -> Result<EngineRuntime> {
        if let Some(runtime) = *self.runtime.read() {
            return Ok(runtime);
        }

        let runtime = EngineRuntime::load()?;
        *self.runtime.write() = Some(runtime);
        *self.state.write() = LifecycleState::Loaded;

        tracing::info!(sqlite_version = runtime.version(), "Loaded engine runtime");

        Ok(runtime)
    }

    async fn bootstrap(&self, runtime: EngineRuntime) -> Result<HandleInfo> {
        self.store.open().await?;

        let (conn, origin, committed) = match self.store.get().await? {
            Some(blob) => {
                let conn = runtime.restore(&blob, self.options.verify_integrity)?;
                (conn, HandleOrigin::Restored, blob)
            }
            None => {
                tracing::info!("Creating new database");
                let conn = runtime.open_empty()?;
                self.schema.initialize(&conn)?;

                // On-disk state must match memory before the handle is usable.
                let blob = engine::export(&conn)?;
                let ack = self.queue().put(blob.clone())?;
                persist::committed(ack).await?;

                (conn, HandleOrigin::Created, blob)
            }
        };

        let info = HandleInfo {
            id: HandleId(self.next_handle_id.fetch_add(1, Ordering::SeqCst)),
            origin,
        };
        *self.handle.lock() = Some(LiveHandle {
            info,
            conn,
            committed,
        });

        Ok(info)
    }

    /// Run a read-only closure against the live handle.
    pub fn with_handle<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Connection) -> std::result::Result<T, E>,
        E: From<StorageError>,
    {
        let guard = self.handle.lock();
        let handle = guard.as_ref().ok_or(StorageError::NotInitialized)?;
        f(&handle.conn)
    }

    /// Run a mutating closure in one engine transaction and persist the
    /// resulting state before returning.
    ///
    /// Nothing is persisted when the closure fails; its statements are
    /// rolled back. When the snapshot fails to commit the live database is
    /// restored to the last acknowledged snapshot, so memory never holds a
    /// change the store does not.
    pub async fn mutate<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Connection) -> std::result::Result<T, E>,
        E: From<StorageError>,
    {
        let _writer = self.write_gate.lock().await;

        let (value, ack, handle_id, blob) = {
            let guard = self.handle.lock();
            let handle = guard.as_ref().ok_or(StorageError::NotInitialized)?;

            let tx = handle
                .conn
                .unchecked_transaction()
                .map_err(StorageError::from)?;
            let value = f(&tx)?;
            tx.commit().map_err(StorageError::from)?;

            let blob = engine::export(&handle.conn)?;
            let ack = self.queue().put(blob.clone())?;
            (value, ack, handle.info.id, blob)
        };

        match persist::committed(ack).await {
            Ok(()) => {
                if let Some(handle) = self.handle.lock().as_mut() {
                    if handle.info.id == handle_id {
                        handle.committed = blob;
                    }
                }
                Ok(value)
            }
            Err(e) => {
                self.roll_back(handle_id);
                Err(e.into())
            }
        }
    }

    /// Replace the live database with the last acknowledged snapshot. If even
    /// that cannot be restored the handle is dropped and setup must run again.
    fn roll_back(&self, handle_id: HandleId) {
        let runtime = *self.runtime.read();
        let mut guard = self.handle.lock();
        let Some(handle) = guard.as_mut().filter(|h| h.info.id == handle_id) else {
            return;
        };

        let restored = runtime
            .ok_or(StorageError::NotInitialized)
            .and_then(|runtime| runtime.restore(&handle.committed, false));

        match restored {
            Ok(conn) => {
                handle.conn = conn;
                tracing::warn!(handle_id = %handle_id, "Rolled back unpersisted mutation");
            }
            Err(e) => {
                tracing::error!(
                    handle_id = %handle_id,
                    error = %e,
                    "Failed to roll back unpersisted mutation, releasing handle"
                );
                *guard = None;
                *self.state.write() = LifecycleState::Failed;
            }
        }
    }

    /// Serialized snapshot of the current state. No persistence side effect.
    pub fn export_database(&self) -> Result<Vec<u8>> {
        self.with_handle(engine::export)
    }

    /// Drop the live handle and delete the persisted blob.
    ///
    /// The handle is released before the delete is queued: later mutations
    /// fail with `NotInitialized`, and every write already queued is ordered
    /// ahead of the delete. Returns the store's best-effort result.
    pub async fn clear_database(&self) -> bool {
        let _gate = self.bootstrap_gate.lock().await;

        let request = {
            let mut guard = self.handle.lock();
            if let Some(handle) = guard.take() {
                tracing::info!(handle_id = %handle.info.id, "Released database handle");
            }
            *self.state.write() = LifecycleState::Uninitialized;
            self.queue().clear()
        };

        match request {
            Ok(ack) => ack.await.unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to queue clear request");
                false
            }
        }
    }

    /// The writer task is started on first use, inside the caller's runtime.
    fn queue(&self) -> PersistQueue {
        self.queue
            .lock()
            .get_or_insert_with(|| PersistQueue::spawn(Arc::clone(&self.store)))
            .clone()
    }
}
