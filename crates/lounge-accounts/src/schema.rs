//! Account schema
//!
//! Run once on a fresh database: the `users` table plus a guarded seed of
//! one administrative account.

use chrono::Utc;
use lounge_storage::{SchemaInitializer, StorageError};
use rusqlite::Connection;

use crate::clock::format_timestamp;
use crate::password::PasswordPolicy;
use crate::user::ROLE_ADMIN;

pub const USERS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL, -- Argon2id PHC string
    phone TEXT,
    role TEXT NOT NULL DEFAULT 'user',
    reset_token TEXT,
    reset_token_expires TEXT, -- RFC3339, millisecond precision
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_name ON users(name);
CREATE INDEX IF NOT EXISTS idx_users_reset_token ON users(reset_token);
"#;

/// The administrative account seeded into a fresh database.
#[derive(Debug, Clone)]
pub struct SeedAccount {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl Default for SeedAccount {
    fn default() -> Self {
        Self {
            name: "Admin User".to_string(),
            email: "admin@beautylounge.com".to_string(),
            password: "admin123".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccountSchema {
    seed: SeedAccount,
    passwords: PasswordPolicy,
}

impl AccountSchema {
    pub fn new(seed: SeedAccount, passwords: PasswordPolicy) -> Self {
        Self { seed, passwords }
    }
}

impl SchemaInitializer for AccountSchema {
    fn initialize(&self, conn: &Connection) -> lounge_storage::Result<()> {
        conn.execute_batch(USERS_DDL)?;

        let seeded: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
            [&self.seed.email],
            |row| row.get(0),
        )?;
        if seeded {
            return Ok(());
        }

        let password_hash = self
            .passwords
            .hash(&self.seed.password)
            .map_err(|e| StorageError::Schema(e.to_string()))?;

        conn.execute(
            "INSERT OR IGNORE INTO users (name, email, password, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                self.seed.name,
                self.seed.email,
                password_hash,
                ROLE_ADMIN,
                format_timestamp(Utc::now()),
            ],
        )?;

        tracing::info!(email = %self.seed.email, "Seeded administrative account");

        Ok(())
    }
}
