//! Lounge Core
//!
//! Public surface of the durable account database: configuration,
//! logging setup and the [`Lounge`] facade that owns the database context.

mod config;
mod error;
mod lounge;

pub use config::Config;
pub use error::CoreError;
pub use lounge::Lounge;

pub use lounge_accounts::{
    AccountError, AccountRepository, Clock, ManualClock, PasswordPolicy, PublicUser, SystemClock,
    UserRow,
};
pub use lounge_storage::{
    BlockStore, DatabaseContext, HandleId, HandleInfo, HandleOrigin, LifecycleState,
    MemoryBlockStore, SqliteBlockStore, StorageError,
};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
