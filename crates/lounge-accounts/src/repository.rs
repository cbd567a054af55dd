//! Account repository
//!
//! Check-then-write pairs run inside one `mutate` closure, so no other
//! operation can interleave between the check and the write.

use chrono::Duration;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use std::sync::Arc;

use lounge_storage::DatabaseContext;

use crate::clock::{format_timestamp, parse_timestamp, Clock, SystemClock};
use crate::error::AccountError;
use crate::password::{generate_secret, PasswordPolicy};
use crate::user::{PublicUser, UserRow, ROLE_USER};
use crate::Result;

pub struct AccountRepository {
    db: Arc<DatabaseContext>,
    passwords: PasswordPolicy,
    clock: Arc<dyn Clock>,
    reset_token_ttl: Duration,
}

impl AccountRepository {
    pub fn new(db: Arc<DatabaseContext>) -> Self {
        Self {
            db,
            passwords: PasswordPolicy::default(),
            clock: Arc::new(SystemClock),
            reset_token_ttl: Duration::hours(1),
        }
    }

    pub fn with_password_policy(mut self, passwords: PasswordPolicy) -> Self {
        self.passwords = passwords;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reset_token_ttl(mut self, ttl: Duration) -> Self {
        self.reset_token_ttl = ttl;
        self
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.db.is_initialized() {
            return Err(AccountError::NotInitialized);
        }
        Ok(())
    }

    /// Register a self-service account with role `user`.
    pub async fn register_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        phone: Option<&str>,
    ) -> Result<PublicUser> {
        self.ensure_initialized()?;

        let password_hash = self.passwords.hash(password)?;
        let created_at = format_timestamp(self.clock.now());

        let user = self
            .db
            .mutate(|conn| {
                ensure_email_free(conn, email)?;

                conn.execute(
                    "INSERT INTO users (name, email, password, phone, role, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![name, email, password_hash, phone, ROLE_USER, created_at],
                )
                .map_err(|e| map_unique_violation(e, email))?;

                Ok::<_, AccountError>(PublicUser {
                    id: conn.last_insert_rowid(),
                    name: name.to_string(),
                    email: email.to_string(),
                    phone: phone.map(str::to_string),
                    role: ROLE_USER.to_string(),
                })
            })
            .await?;

        tracing::info!(user_id = user.id, "Registered user");

        Ok(user)
    }

    /// Check credentials. Unknown email and wrong password fail the same way.
    pub fn login_user(&self, email: &str, password: &str) -> Result<PublicUser> {
        self.ensure_initialized()?;

        let found = self.db.with_handle(|conn| {
            conn.query_row(
                "SELECT id, name, email, phone, role, password FROM users WHERE email = ?1",
                [email],
                |row| {
                    let user = PublicUser {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        phone: row.get(3)?,
                        role: row.get(4)?,
                    };
                    let password_hash: String = row.get(5)?;
                    Ok((user, password_hash))
                },
            )
            .optional()
            .map_err(AccountError::from)
        })?;

        let Some((user, password_hash)) = found else {
            self.passwords.verify_absent(password);
            return Err(AccountError::InvalidCredentials);
        };
        if !self.passwords.verify(password, &password_hash) {
            tracing::debug!(user_id = user.id, "Rejected login");
            return Err(AccountError::InvalidCredentials);
        }

        tracing::info!(user_id = user.id, "User logged in");

        Ok(user)
    }

    /// Issue a reset token valid for the configured TTL. Delivering it is
    /// the caller's job.
    pub async fn generate_reset_token(&self, email: &str) -> Result<String> {
        self.ensure_initialized()?;

        let token = generate_secret();
        let expires = format_timestamp(self.clock.now() + self.reset_token_ttl);

        self.db
            .mutate(|conn| {
                let updated = conn.execute(
                    "UPDATE users SET reset_token = ?1, reset_token_expires = ?2 WHERE email = ?3",
                    rusqlite::params![token, expires, email],
                )?;
                if updated == 0 {
                    return Err(AccountError::EmailNotFound(email.to_string()));
                }
                Ok(())
            })
            .await?;

        tracing::info!(expires = %expires, "Issued password reset token");

        Ok(token)
    }

    /// Redeem a reset token. The new password is set and the token cleared
    /// in a single statement.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        self.ensure_initialized()?;

        if token.is_empty() {
            return Err(AccountError::InvalidOrExpiredToken);
        }

        let password_hash = self.passwords.hash(new_password)?;
        let now = format_timestamp(self.clock.now());

        let user_id = self
            .db
            .mutate(|conn| {
                let id: i64 = conn
                    .query_row(
                        "SELECT id FROM users
                         WHERE reset_token = ?1 AND reset_token_expires > ?2",
                        rusqlite::params![token, now],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or(AccountError::InvalidOrExpiredToken)?;

                conn.execute(
                    "UPDATE users
                     SET password = ?1, reset_token = NULL, reset_token_expires = NULL
                     WHERE id = ?2",
                    rusqlite::params![password_hash, id],
                )?;
                Ok::<_, AccountError>(id)
            })
            .await?;

        tracing::info!(user_id, "Password reset");

        Ok(())
    }

    /// Administrative insert. The account starts with an unusable password
    /// and signs in after a reset.
    pub async fn add_user(&self, name: &str, email: &str, role: &str) -> Result<PublicUser> {
        self.ensure_initialized()?;

        let password_hash = self.passwords.unusable()?;
        let created_at = format_timestamp(self.clock.now());

        let user = self
            .db
            .mutate(|conn| {
                ensure_email_free(conn, email)?;

                conn.execute(
                    "INSERT INTO users (name, email, password, role, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![name, email, password_hash, role, created_at],
                )
                .map_err(|e| map_unique_violation(e, email))?;

                Ok::<_, AccountError>(PublicUser {
                    id: conn.last_insert_rowid(),
                    name: name.to_string(),
                    email: email.to_string(),
                    phone: None,
                    role: role.to_string(),
                })
            })
            .await?;

        tracing::info!(user_id = user.id, role = %user.role, "Added user");

        Ok(user)
    }

    pub async fn delete_user(&self, id: i64) -> Result<()> {
        self.ensure_initialized()?;

        self.db
            .mutate(|conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                    [id],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Err(AccountError::UserNotFound(id));
                }

                conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
                Ok(())
            })
            .await?;

        tracing::info!(user_id = id, "Deleted user");

        Ok(())
    }

    /// All users ordered by name.
    pub fn get_all_users(&self) -> Result<Vec<UserRow>> {
        self.ensure_initialized()?;

        self.db.with_handle(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, email, phone, role, created_at, reset_token IS NOT NULL
                 FROM users ORDER BY name, id",
            )?;

            let rows = stmt
                .query_map([], |row| {
                    let created_str: String = row.get(5)?;
                    let created_at = parse_timestamp(&created_str).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            5,
                            rusqlite::types::Type::Text,
                            format!("invalid timestamp: {}", created_str).into(),
                        )
                    })?;

                    Ok(UserRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        phone: row.get(3)?,
                        role: row.get(4)?,
                        created_at,
                        has_pending_reset: row.get(6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(rows)
        })
    }
}

fn ensure_email_free(conn: &Connection, email: &str) -> Result<()> {
    let taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
        [email],
        |row| row.get(0),
    )?;
    if taken {
        return Err(AccountError::DuplicateEmail(email.to_string()));
    }
    Ok(())
}

/// The schema's UNIQUE constraint backs up the pre-check.
fn map_unique_violation(err: rusqlite::Error, email: &str) -> AccountError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => AccountError::DuplicateEmail(email.to_string()),
        _ => AccountError::Sqlite(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::schema::{AccountSchema, SeedAccount};
    use chrono::{TimeZone, Utc};
    use lounge_storage::MemoryBlockStore;

    struct Fixture {
        store: Arc<MemoryBlockStore>,
        clock: Arc<ManualClock>,
        repo: AccountRepository,
    }

    fn repository(store: &Arc<MemoryBlockStore>, clock: &Arc<ManualClock>) -> AccountRepository {
        let schema = AccountSchema::new(SeedAccount::default(), PasswordPolicy::low_cost());
        let db = Arc::new(DatabaseContext::new(store.clone(), Arc::new(schema)));
        AccountRepository::new(db)
            .with_password_policy(PasswordPolicy::low_cost())
            .with_clock(clock.clone())
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryBlockStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ));
        let repo = repository(&store, &clock);
        repo.db.setup_database().await.unwrap();
        Fixture { store, clock, repo }
    }

    fn count_email(repo: &AccountRepository, email: &str) -> usize {
        repo.get_all_users()
            .unwrap()
            .iter()
            .filter(|u| u.email == email)
            .count()
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let f = fixture().await;

        let registered = f
            .repo
            .register_user("A", "a@x.com", "pw", Some("555"))
            .await
            .unwrap();
        assert_eq!(registered.role, "user");
        assert_eq!(registered.phone.as_deref(), Some("555"));

        let logged_in = f.repo.login_user("a@x.com", "pw").unwrap();
        assert_eq!(logged_in.id, registered.id);
        assert_eq!(logged_in.name, "A");
        assert_eq!(logged_in.email, "a@x.com");
        assert_eq!(logged_in.role, "user");
    }

    #[tokio::test]
    async fn test_duplicate_email() {
        let f = fixture().await;
        f.repo.register_user("A", "a@x.com", "pw", None).await.unwrap();
        let commits = f.store.commit_count();

        let err = f
            .repo
            .register_user("B", "a@x.com", "other", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::DuplicateEmail(_)));
        assert_eq!(count_email(&f.repo, "a@x.com"), 1);
        assert_eq!(f.store.commit_count(), commits);

        let err = f.repo.add_user("C", "a@x.com", "user").await.unwrap_err();
        assert!(matches!(err, AccountError::DuplicateEmail(_)));
    }

    #[tokio::test]
    async fn test_invalid_credentials() {
        let f = fixture().await;
        f.repo.register_user("A", "a@x.com", "pw", None).await.unwrap();

        assert!(matches!(
            f.repo.login_user("a@x.com", "wrong"),
            Err(AccountError::InvalidCredentials)
        ));
        assert!(matches!(
            f.repo.login_user("nobody@x.com", "pw"),
            Err(AccountError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_seeded_admin_can_log_in() {
        let f = fixture().await;
        let admin = f.repo.login_user("admin@beautylounge.com", "admin123").unwrap();
        assert_eq!(admin.role, "admin");
    }

    #[tokio::test]
    async fn test_reset_flow() {
        let f = fixture().await;
        f.repo.register_user("A", "a@x.com", "pw", None).await.unwrap();

        let token = f.repo.generate_reset_token("a@x.com").await.unwrap();
        assert!(f.repo.get_all_users().unwrap().iter().any(|u| u.has_pending_reset));

        f.repo.reset_password(&token, "new").await.unwrap();

        assert!(matches!(
            f.repo.login_user("a@x.com", "pw"),
            Err(AccountError::InvalidCredentials)
        ));
        f.repo.login_user("a@x.com", "new").unwrap();

        // Single use.
        assert!(matches!(
            f.repo.reset_password(&token, "again").await,
            Err(AccountError::InvalidOrExpiredToken)
        ));
        assert!(!f.repo.get_all_users().unwrap().iter().any(|u| u.has_pending_reset));
    }

    #[tokio::test]
    async fn test_token_accepted_before_expiry() {
        let f = fixture().await;
        f.repo.register_user("A", "a@x.com", "pw", None).await.unwrap();

        let token = f.repo.generate_reset_token("a@x.com").await.unwrap();
        f.clock.advance(Duration::minutes(59));

        f.repo.reset_password(&token, "new").await.unwrap();
    }

    #[tokio::test]
    async fn test_token_rejected_after_expiry() {
        let f = fixture().await;
        f.repo.register_user("A", "a@x.com", "pw", None).await.unwrap();

        let token = f.repo.generate_reset_token("a@x.com").await.unwrap();
        f.clock.advance(Duration::minutes(61));

        assert!(matches!(
            f.repo.reset_password(&token, "new").await,
            Err(AccountError::InvalidOrExpiredToken)
        ));
        f.repo.login_user("a@x.com", "pw").unwrap();
    }

    #[tokio::test]
    async fn test_reset_token_unknown_email() {
        let f = fixture().await;
        assert!(matches!(
            f.repo.generate_reset_token("nobody@x.com").await,
            Err(AccountError::EmailNotFound(_))
        ));
        assert!(matches!(
            f.repo.reset_password("", "new").await,
            Err(AccountError::InvalidOrExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_add_and_delete_user() {
        let f = fixture().await;

        let staff = f.repo.add_user("Stylist", "s@x.com", "staff").await.unwrap();
        assert_eq!(staff.role, "staff");
        // No known password until a reset.
        assert!(f.repo.login_user("s@x.com", "").is_err());

        f.repo.delete_user(staff.id).await.unwrap();
        assert_eq!(count_email(&f.repo, "s@x.com"), 0);
    }

    #[tokio::test]
    async fn test_delete_missing_user() {
        let f = fixture().await;
        let before = f.repo.get_all_users().unwrap().len();

        assert!(matches!(
            f.repo.delete_user(9_999).await,
            Err(AccountError::UserNotFound(9_999))
        ));
        assert_eq!(f.repo.get_all_users().unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_users_ordered_by_name() {
        let f = fixture().await;
        f.repo.register_user("Zoe", "z@x.com", "pw", None).await.unwrap();
        f.repo.register_user("Bea", "b@x.com", "pw", None).await.unwrap();

        let names: Vec<_> = f
            .repo
            .get_all_users()
            .unwrap()
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, vec!["Admin User", "Bea", "Zoe"]);
    }

    #[tokio::test]
    async fn test_public_shapes_carry_no_secrets() {
        let f = fixture().await;
        let user = f
            .repo
            .register_user("A", "a@x.com", "hunter2", None)
            .await
            .unwrap();
        f.repo.generate_reset_token("a@x.com").await.unwrap();

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("hunter2"));

        let rows = serde_json::to_string(&f.repo.get_all_users().unwrap()).unwrap();
        assert!(!rows.contains("password"));
        assert!(!rows.contains("reset_token"));
        assert!(!rows.contains("$argon2"));
    }

    #[tokio::test]
    async fn test_mutations_survive_restart() {
        let f = fixture().await;
        f.repo.register_user("A", "a@x.com", "pw", None).await.unwrap();
        let token = f.repo.generate_reset_token("a@x.com").await.unwrap();
        let staff = f.repo.add_user("Stylist", "s@x.com", "staff").await.unwrap();
        let temp = f.repo.add_user("Temp", "t@x.com", "user").await.unwrap();
        f.repo.delete_user(temp.id).await.unwrap();

        let restarted = repository(&f.store, &f.clock);
        restarted.db.setup_database().await.unwrap();

        let users = restarted.get_all_users().unwrap();
        assert!(users.iter().any(|u| u.id == staff.id && u.role == "staff"));
        assert!(!users.iter().any(|u| u.email == "t@x.com"));
        assert!(users.iter().any(|u| u.email == "a@x.com" && u.has_pending_reset));

        restarted.reset_password(&token, "new").await.unwrap();

        let again = repository(&f.store, &f.clock);
        again.db.setup_database().await.unwrap();

        again.login_user("a@x.com", "new").unwrap();
        assert!(matches!(
            again.login_user("a@x.com", "pw"),
            Err(AccountError::InvalidCredentials)
        ));
        assert!(!again
            .get_all_users()
            .unwrap()
            .iter()
            .any(|u| u.has_pending_reset));
        assert!(matches!(
            again.reset_password(&token, "other").await,
            Err(AccountError::InvalidOrExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_no_account() {
        let f = fixture().await;

        f.store.set_fail_writes(true);
        let err = f
            .repo
            .register_user("A", "a@x.com", "pw", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccountError::Storage(lounge_storage::StorageError::PersistFailure(_))
        ));
        assert!(matches!(
            f.repo.login_user("a@x.com", "pw"),
            Err(AccountError::InvalidCredentials)
        ));
        assert_eq!(count_email(&f.repo, "a@x.com"), 0);

        // The retry is not reported as a duplicate.
        f.store.set_fail_writes(false);
        f.repo.register_user("A", "a@x.com", "pw", None).await.unwrap();
        f.repo.login_user("a@x.com", "pw").unwrap();
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let store = Arc::new(MemoryBlockStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let repo = repository(&store, &clock);

        assert!(matches!(
            repo.register_user("A", "a@x.com", "pw", None).await,
            Err(AccountError::NotInitialized)
        ));
        assert!(matches!(
            repo.login_user("a@x.com", "pw"),
            Err(AccountError::NotInitialized)
        ));
        assert!(matches!(
            repo.get_all_users(),
            Err(AccountError::NotInitialized)
        ));
        assert_eq!(store.commit_count(), 0);
    }
}
