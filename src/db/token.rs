//! Refresh token storage for session tracking and revocation.
//!
//! Only refresh tokens are stored in the database for revocation support.
//! Access tokens are stateless and short-lived (5 minutes).

use sqlx::sqlite::SqlitePool;

use crate::time::unix_now;

/// An active refresh token record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshToken {
    pub id: i64,
    pub jti: String,
    pub user_id: i64,
    pub last_ip: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Store for managing active refresh tokens.
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new refresh token record.
    pub async fn create(
        &self,
        jti: &str,
        user_id: i64,
        ip: Option<&str>,
        issued_at: i64,
        expires_at: i64,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO refresh_tokens (jti, user_id, last_ip, issued_at, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(jti)
        .bind(user_id)
        .bind(ip)
        .bind(issued_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get an active token by its JWT ID.
    pub async fn get_by_jti(&self, jti: &str) -> Result<Option<RefreshToken>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, jti, user_id, last_ip, issued_at, expires_at FROM refresh_tokens WHERE jti = ?",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await
    }

    /// Update the last IP address for a token.
    pub async fn update_ip(&self, jti: &str, ip: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE refresh_tokens SET last_ip = ? WHERE jti = ?")
            .bind(ip)
            .bind(jti)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a token by its JWT ID (revoke).
    pub async fn delete_by_jti(&self, jti: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE jti = ?")
            .bind(jti)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete all expired tokens.
    pub async fn delete_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < ?")
            .bind(unix_now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// List all unexpired refresh tokens for a user, newest first.
    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<RefreshToken>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, jti, user_id, last_ip, issued_at, expires_at FROM refresh_tokens
             WHERE user_id = ? AND expires_at >= ? ORDER BY issued_at DESC, id DESC",
        )
        .bind(user_id)
        .bind(unix_now())
        .fetch_all(&self.pool)
        .await
    }

    /// Delete all tokens for a user (sign out everywhere).
    pub async fn delete_all_by_user(&self, user_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
