//! Lounge Accounts
//!
//! Registration, login, administrative user management and the
//! reset-token workflow. Every mutation is persisted through the
//! storage layer before the call returns.
//!
//! Passwords are stored as salted Argon2id hashes, never in plaintext.

mod clock;
mod error;
mod password;
mod repository;
mod schema;
mod user;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::AccountError;
pub use password::PasswordPolicy;
pub use repository::AccountRepository;
pub use schema::{AccountSchema, SeedAccount, USERS_DDL};
pub use user::{PublicUser, UserRow, ROLE_ADMIN, ROLE_USER};

pub type Result<T> = std::result::Result<T, AccountError>;
