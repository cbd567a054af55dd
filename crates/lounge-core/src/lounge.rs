//! Main account database container
//!
//! Owns the database context and routes every public operation through it.

use std::sync::Arc;

use lounge_accounts::{
    AccountRepository, AccountSchema, Clock, PasswordPolicy, PublicUser, SystemClock, UserRow,
};
use lounge_storage::{
    BlockStore, ContextOptions, DatabaseContext, HandleInfo, LifecycleState, SqliteBlockStore,
};

use crate::config::Config;
use crate::Result;

/// Lounge instance
///
/// Built once at startup and shared by reference. Nothing here is a global:
/// two instances over two stores are fully independent.
pub struct Lounge {
    /// Configuration
    config: Config,
    /// Database context
    db: Arc<DatabaseContext>,
    /// Account operations
    accounts: AccountRepository,
}

impl Lounge {
    /// Create an instance backed by the SQLite container named in `config`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let store = SqliteBlockStore::new(config.block_store())?;
        Self::with_store(config, Arc::new(store))
    }

    /// Create an instance over any block store.
    pub fn with_store(config: Config, store: Arc<dyn BlockStore>) -> Result<Self> {
        Self::with_components(
            config,
            store,
            PasswordPolicy::default(),
            Arc::new(SystemClock),
        )
    }

    pub fn with_components(
        config: Config,
        store: Arc<dyn BlockStore>,
        passwords: PasswordPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let schema = AccountSchema::new(config.seed_account(), passwords.clone());
        let db = Arc::new(DatabaseContext::with_options(
            store,
            Arc::new(schema),
            ContextOptions {
                verify_integrity: config.verify_integrity,
            },
        ));

        let accounts = AccountRepository::new(db.clone())
            .with_password_policy(passwords)
            .with_clock(clock)
            .with_reset_token_ttl(config.reset_token_ttl());

        Ok(Self {
            config,
            db,
            accounts,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ==================== Lifecycle ====================

    /// Load the persisted database or create and seed a new one.
    pub async fn setup_database(&self) -> Result<HandleInfo> {
        let info = self.db.setup_database().await?;
        tracing::info!(handle_id = %info.id, "Lounge database ready");
        Ok(info)
    }

    pub fn is_initialized(&self) -> bool {
        self.db.is_initialized()
    }

    pub fn state(&self) -> LifecycleState {
        self.db.state()
    }

    /// Serialized image of the live database.
    pub fn export_database(&self) -> Result<Vec<u8>> {
        Ok(self.db.export_database()?)
    }

    /// Drop the live handle and the persisted snapshot. Never fails; the
    /// result reports whether the store confirmed the removal.
    pub async fn clear_database(&self) -> bool {
        self.db.clear_database().await
    }

    // ==================== Accounts ====================

    pub async fn register_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        phone: Option<&str>,
    ) -> Result<PublicUser> {
        Ok(self
            .accounts
            .register_user(name, email, password, phone)
            .await?)
    }

    pub fn login_user(&self, email: &str, password: &str) -> Result<PublicUser> {
        Ok(self.accounts.login_user(email, password)?)
    }

    pub async fn generate_reset_token(&self, email: &str) -> Result<String> {
        Ok(self.accounts.generate_reset_token(email).await?)
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        Ok(self.accounts.reset_password(token, new_password).await?)
    }

    // ==================== Administration ====================

    pub async fn add_user(&self, name: &str, email: &str, role: &str) -> Result<PublicUser> {
        Ok(self.accounts.add_user(name, email, role).await?)
    }

    pub async fn delete_user(&self, id: i64) -> Result<()> {
        Ok(self.accounts.delete_user(id).await?)
    }

    pub fn get_all_users(&self) -> Result<Vec<UserRow>> {
        Ok(self.accounts.get_all_users()?)
    }
}
