//! Lounge Storage Layer
//!
//! The live database is an in-memory SQLite connection. Every committed
//! mutation is exported as a full snapshot and written to a transactional
//! block store, so a restart restores exactly the last acknowledged state.
//!
//! - [`BlockStore`]: one opaque blob under one fixed key
//! - [`DatabaseContext`]: owns the single live handle and its lifecycle
//! - persist queue: serializes snapshot writes in FIFO order

mod block_store;
mod engine;
mod error;
mod lifecycle;
mod memory;
mod persist;

pub use block_store::{BlockStore, BlockStoreConfig, SqliteBlockStore};
pub use engine::EngineRuntime;
pub use error::StorageError;
pub use lifecycle::{
    ContextOptions, DatabaseContext, HandleId, HandleInfo, HandleOrigin, LifecycleState,
    SchemaInitializer,
};
pub use memory::MemoryBlockStore;

pub type Result<T> = std::result::Result<T, StorageError>;
