//! Users and API keys.
//!
//! Passwords are bcrypt-hashed. API key secrets (`mk_` + 32 alphanumerics)
//! are shown once at creation; only their SHA-256 digest and a short
//! display prefix are stored.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{ApiKey, IssuedApiKey, User};

const KEY_PREFIX: &str = "mk_";
const KEY_RANDOM_LEN: usize = 32;
const DISPLAY_PREFIX_LEN: usize = 8;

#[derive(Clone)]
pub struct Accounts {
    pool: SqlitePool,
    bcrypt_cost: u32,
}

impl Accounts {
    pub fn new(pool: SqlitePool, bcrypt_cost: u32) -> Self {
        Self { pool, bcrypt_cost }
    }

    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<User> {
        validate_username(username)?;
        if password.chars().count() < 8 {
            return Err(Error::Validation(
                "password must be at least 8 characters".to_string(),
            ));
        }
        let email = email.map(str::trim).filter(|e| !e.is_empty());
        if let Some(e) = email {
            if !e.contains('@') {
                return Err(Error::Validation("invalid email address".to_string()));
            }
        }

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        if existing > 0 {
            return Err(Error::Conflict(format!("username '{}' is taken", username)));
        }

        let password_hash = hash_password(password.to_string(), self.bcrypt_cost).await?;
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(email)
        .bind(&password_hash)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            // A concurrent registration won between the check and the insert.
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(format!("username '{}' is taken", username))
            }
            other => other.into(),
        })?;

        tracing::info!(username, "user registered");
        Ok(User {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            email: email.map(str::to_string),
            created_at: now,
        })
    }

    /// Check a username/password pair.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(invalid_credentials());
        };
        let hash: String = row.get("password_hash");
        if !verify_password(password.to_string(), hash).await? {
            return Err(invalid_credentials());
        }

        Ok(User {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            created_at: row.get("created_at"),
        })
    }

    pub async fn get_user(&self, user_id: i64) -> Result<User> {
        let row = sqlx::query("SELECT id, username, email, created_at FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {} not found", user_id)))?;
        Ok(User {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            created_at: row.get("created_at"),
        })
    }

    /// Issue a new key. The secret in the result is not recoverable later.
    pub async fn create_api_key(&self, user_id: i64, label: Option<&str>) -> Result<IssuedApiKey> {
        let secret = generate_secret();
        let key_prefix: String = secret.chars().take(DISPLAY_PREFIX_LEN).collect();
        let label = label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(default_key_label);
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "INSERT INTO api_keys (user_id, key_hash, key_prefix, name, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(hash_secret(&secret))
        .bind(&key_prefix)
        .bind(&label)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::info!(user_id, key_prefix = %key_prefix, "API key created");
        Ok(IssuedApiKey {
            key: ApiKey {
                id: result.last_insert_rowid(),
                owner_user_id: user_id,
                key_prefix,
                label,
                created_at: now,
                last_used_at: None,
            },
            secret,
        })
    }

    pub async fn list_api_keys(&self, user_id: i64) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query(
            "SELECT id, user_id, key_prefix, name, created_at, last_used_at FROM api_keys WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ApiKey {
                id: row.get("id"),
                owner_user_id: row.get("user_id"),
                key_prefix: row.get("key_prefix"),
                label: row.get("name"),
                created_at: row.get("created_at"),
                last_used_at: row.get("last_used_at"),
            })
            .collect())
    }

    /// Hard-delete a key. Keys owned by someone else look like missing ones.
    pub async fn revoke_api_key(&self, user_id: i64, key_id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ? AND user_id = ?")
            .bind(key_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("API key {} not found", key_id)));
        }
        tracing::info!(user_id, key_id, "API key revoked");
        Ok(())
    }

    /// Resolve a presented secret to its owner and stamp `last_used_at`.
    pub async fn validate_api_key(&self, secret: &str) -> Result<i64> {
        if !secret.starts_with(KEY_PREFIX) {
            return Err(Error::Auth("invalid API key".to_string()));
        }
        let now = chrono::Utc::now().timestamp();
        let user_id: Option<i64> = sqlx::query_scalar(
            "UPDATE api_keys SET last_used_at = ? WHERE key_hash = ? RETURNING user_id",
        )
        .bind(now)
        .bind(hash_secret(secret))
        .fetch_optional(&self.pool)
        .await?;
        user_id.ok_or_else(|| Error::Auth("invalid API key".to_string()))
    }
}

fn invalid_credentials() -> Error {
    Error::Auth("invalid username or password".to_string())
}

fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !(3..=64).contains(&len) {
        return Err(Error::Validation(
            "username must be 3-64 characters".to_string(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(Error::Validation(
            "username may only contain letters, digits, '_', '.', and '-'".to_string(),
        ));
    }
    Ok(())
}

fn generate_secret() -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", KEY_PREFIX, random)
}

fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

fn default_key_label() -> String {
    format!("API Key {}", chrono::Local::now().format("%Y-%m-%d %H:%M"))
}

async fn hash_password(password: String, cost: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| Error::Internal(e.into()))?
        .map_err(|e| Error::Internal(e.into()))
}

async fn verify_password(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| Error::Internal(e.into()))?
        .map_err(|e| Error::Internal(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::apply_schema;
    use tempfile::TempDir;

    async fn accounts() -> (TempDir, Accounts) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("a.sqlite")).await.unwrap();
        apply_schema(&pool).await.unwrap();
        (tmp, Accounts::new(pool, 4))
    }

    #[tokio::test]
    async fn concurrent_registration_yields_one_conflict() {
        let (_tmp, accounts) = accounts().await;
        let (a, b) = tokio::join!(
            accounts.create_user("racer", "password123", None),
            accounts.create_user("racer", "password123", None),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::Conflict(_)))));
    }

    #[tokio::test]
    async fn register_and_login() {
        let (_tmp, accounts) = accounts().await;
        let user = accounts
            .create_user("alice", "correct horse", Some("alice@example.com"))
            .await
            .unwrap();
        let logged_in = accounts.authenticate("alice", "correct horse").await.unwrap();
        assert_eq!(user.id, logged_in.id);
        assert_eq!(logged_in.email.as_deref(), Some("alice@example.com"));

        let err = accounts.authenticate("alice", "wrong password").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        let err = accounts.authenticate("nobody", "whatever1").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn duplicate_and_invalid_users_rejected() {
        let (_tmp, accounts) = accounts().await;
        accounts.create_user("bob", "password123", None).await.unwrap();
        assert!(matches!(
            accounts.create_user("bob", "password123", None).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            accounts.create_user("x", "password123", None).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            accounts.create_user("carol", "short", None).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn api_key_lifecycle() {
        let (_tmp, accounts) = accounts().await;
        let owner = accounts.create_user("owner", "password123", None).await.unwrap();
        let other = accounts.create_user("other", "password123", None).await.unwrap();

        let issued = accounts.create_api_key(owner.id, None).await.unwrap();
        assert!(issued.secret.starts_with("mk_"));
        assert_eq!(issued.secret.len(), 3 + 32);
        assert!(issued.key.label.starts_with("API Key "));
        assert_eq!(issued.key.key_prefix, &issued.secret[..8]);

        assert_eq!(accounts.validate_api_key(&issued.secret).await.unwrap(), owner.id);
        let listed = accounts.list_api_keys(owner.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].last_used_at.is_some());

        // Only the owner can revoke.
        assert!(matches!(
            accounts.revoke_api_key(other.id, issued.key.id).await,
            Err(Error::NotFound(_))
        ));
        accounts.revoke_api_key(owner.id, issued.key.id).await.unwrap();
        assert!(matches!(
            accounts.validate_api_key(&issued.secret).await,
            Err(Error::Auth(_))
        ));
    }

    #[tokio::test]
    async fn unknown_key_rejected() {
        let (_tmp, accounts) = accounts().await;
        assert!(matches!(
            accounts.validate_api_key("mk_doesnotexist").await,
            Err(Error::Auth(_))
        ));
        assert!(matches!(
            accounts.validate_api_key("garbage").await,
            Err(Error::Auth(_))
        ));
    }
}
