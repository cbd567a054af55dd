//! Account error types

use lounge_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Email already exists: {0}")]
    DuplicateEmail(String),

    #[error("Email not found: {0}")]
    EmailNotFound(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid or expired reset token")]
    InvalidOrExpiredToken,

    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Database not initialized")]
    NotInitialized,

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<StorageError> for AccountError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotInitialized => AccountError::NotInitialized,
            other => AccountError::Storage(other),
        }
    }
}
