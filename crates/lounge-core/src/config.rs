//! Lounge configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use lounge_accounts::SeedAccount;
use lounge_storage::BlockStoreConfig;

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the block store container
    pub container_path: PathBuf,
    /// Container version stamped on first open
    pub container_version: u32,
    /// Record store holding the database snapshot
    pub store_name: String,
    /// Key of the snapshot inside the record store
    pub blob_key: String,
    /// Lifetime of a password reset token
    pub reset_token_ttl_secs: u64,
    /// Run a full integrity check when restoring a snapshot
    pub verify_integrity: bool,
    /// Administrative account seeded into a fresh database
    pub admin_name: String,
    pub admin_email: String,
    pub admin_password: String,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        let seed = SeedAccount::default();

        Self {
            container_path: data_dir.join("BeautyZoneDB.sqlite"),
            container_version: 1,
            store_name: "sqliteDB".to_string(),
            blob_key: "database".to_string(),
            reset_token_ttl_secs: 3600,
            verify_integrity: false,
            admin_name: seed.name,
            admin_email: seed.email,
            admin_password: seed.password,
        }
    }

    pub fn data_dir() -> PathBuf {
        platform_data_dir()
            .map(|d| d.join("Lounge"))
            .unwrap_or_else(|| PathBuf::from(".lounge"))
    }

    /// Parse a configuration handed over by an embedding host. Missing
    /// fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.container_version == 0 {
            return Err(CoreError::Config(
                "container_version must be at least 1".to_string(),
            ));
        }
        if self.store_name.trim().is_empty() || self.blob_key.is_empty() {
            return Err(CoreError::Config(
                "store_name and blob_key must not be empty".to_string(),
            ));
        }
        if self.reset_token_ttl_secs == 0 {
            return Err(CoreError::Config(
                "reset_token_ttl_secs must be positive".to_string(),
            ));
        }
        if !self.admin_email.contains('@') {
            return Err(CoreError::Config(format!(
                "admin_email is not an email address: {}",
                self.admin_email
            )));
        }
        Ok(())
    }

    pub fn block_store(&self) -> BlockStoreConfig {
        BlockStoreConfig {
            container_path: self.container_path.clone(),
            container_version: self.container_version,
            store_name: self.store_name.clone(),
            blob_key: self.blob_key.clone(),
        }
    }

    pub fn seed_account(&self) -> SeedAccount {
        SeedAccount {
            name: self.admin_name.clone(),
            email: self.admin_email.clone(),
            password: self.admin_password.clone(),
        }
    }

    pub fn reset_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reset_token_ttl_secs.min(i64::MAX as u64) as i64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

/// Base directory for per-user application data on this platform.
fn platform_data_dir() -> Option<PathBuf> {
    let env_dir = |key: &str| std::env::var_os(key).map(PathBuf::from);

    if cfg!(target_os = "windows") {
        env_dir("LOCALAPPDATA")
    } else if cfg!(target_os = "macos") {
        env_dir("HOME").map(|home| home.join("Library").join("Application Support"))
    } else {
        env_dir("XDG_DATA_HOME")
            .or_else(|| env_dir("HOME").map(|home| home.join(".local").join("share")))
    }
}
