//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] lounge_storage::StorageError),

    #[error("Account error: {0}")]
    Account(#[from] lounge_accounts::AccountError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// True when the call was made without a live database handle.
    pub fn is_not_initialized(&self) -> bool {
        matches!(
            self,
            CoreError::Storage(lounge_storage::StorageError::NotInitialized)
                | CoreError::Account(lounge_accounts::AccountError::NotInitialized)
        )
    }
}
