//! Password hashing and secret generation

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::{Arc, OnceLock};

use crate::error::AccountError;
use crate::Result;

/// Bytes of entropy in a reset token and in an unusable password.
const SECRET_BYTES: usize = 32;

/// Argon2id hashing with a per-password random salt.
#[derive(Clone)]
pub struct PasswordPolicy {
    argon2: Argon2<'static>,
    /// Hash checked when there is no stored hash, built on first use
    decoy: Arc<OnceLock<String>>,
}

impl PasswordPolicy {
    pub fn new(params: Params) -> Self {
        Self::with_argon2(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    fn with_argon2(argon2: Argon2<'static>) -> Self {
        Self {
            argon2,
            decoy: Arc::new(OnceLock::new()),
        }
    }

    /// Minimum-cost parameters. Hashes stay valid Argon2id PHC strings but
    /// are cheap to compute; meant for tests.
    pub fn low_cost() -> Self {
        let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, 1, None)
            .unwrap_or_default();
        Self::new(params)
    }

    /// Hash a password into a PHC string.
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AccountError::PasswordHash(e.to_string()))?
            .to_string();

        Ok(hash)
    }

    /// Verify a password against a stored PHC string. A malformed stored
    /// hash never verifies.
    pub fn verify(&self, password: &str, password_hash: &str) -> bool {
        let parsed = match PasswordHash::new(password_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash is malformed");
                return false;
            }
        };

        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// Spend the same work as `verify` when there is no account to check
    /// against, so an unknown email costs as much as a wrong password.
    /// Always `false`.
    pub fn verify_absent(&self, password: &str) -> bool {
        let decoy = self
            .decoy
            .get_or_init(|| self.unusable().unwrap_or_default());
        if !decoy.is_empty() {
            self.verify(password, decoy);
        }
        false
    }

    /// Hash of a random secret nobody knows. Accounts holding it can only
    /// sign in after a password reset.
    pub fn unusable(&self) -> Result<String> {
        self.hash(&generate_secret())
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::with_argon2(Argon2::default())
    }
}

impl std::fmt::Debug for PasswordPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordPolicy").finish_non_exhaustive()
    }
}

/// 32 bytes from the OS CSPRNG, hex encoded.
pub(crate) fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
