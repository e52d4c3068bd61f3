//! One-time code storage and per-identity throttle state.
//!
//! `otp_codes` stands in for a fast key-value store: one row per identity key
//! with an absolute expiry. Consumption is a single `DELETE ... RETURNING`, so
//! two concurrent verifications of the same code cannot both succeed.

use sqlx::sqlite::SqlitePool;

use crate::otp::CooldownState;

#[derive(Clone)]
pub struct OtpStore {
    pool: SqlitePool,
}

impl OtpStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a code for `identity_key`, replacing any live one.
    pub async fn put(
        &self,
        identity_key: &str,
        code: &str,
        ttl_secs: i64,
        now: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO otp_codes (identity_key, code, expires_at) VALUES (?, ?, ?)",
        )
        .bind(identity_key)
        .bind(code)
        .bind(now + ttl_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get the live code for `identity_key`, if any.
    pub async fn get(&self, identity_key: &str, now: i64) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT code FROM otp_codes WHERE identity_key = ? AND expires_at > ?")
                .bind(identity_key)
                .bind(now)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0))
    }

    /// Delete the code for `identity_key` only if it is live and equals `code`.
    /// Returns true if a code was consumed. A mismatch leaves the row in place.
    pub async fn take_if_matches(
        &self,
        identity_key: &str,
        code: &str,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "DELETE FROM otp_codes WHERE identity_key = ? AND code = ? AND expires_at > ?
             RETURNING identity_key",
        )
        .bind(identity_key)
        .bind(code)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Remove codes past their expiry.
    pub async fn cleanup_expired(&self, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM otp_codes WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    session_attempts: i64,
    daily_attempts: i64,
    day: String,
    cooldown_started_at: i64,
    cooldown_secs: i64,
}

/// Persistence for [`CooldownState`], keyed like the codes themselves.
#[derive(Clone)]
pub struct OtpAttemptStore {
    pool: SqlitePool,
}

impl OtpAttemptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stored throttle state for `identity_key`, if any.
    pub async fn find(&self, identity_key: &str) -> Result<Option<CooldownState>, sqlx::Error> {
        let row: Option<AttemptRow> = sqlx::query_as(
            "SELECT session_attempts, daily_attempts, day, cooldown_started_at, cooldown_secs
             FROM otp_attempts WHERE identity_key = ?",
        )
        .bind(identity_key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let day = row
            .day
            .parse()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(Some(CooldownState {
            session_attempts: row.session_attempts.max(0) as u32,
            daily_attempts: row.daily_attempts.max(0) as u32,
            day,
            cooldown_started_at: row.cooldown_started_at,
            cooldown_secs: row.cooldown_secs.max(0) as u64,
        }))
    }

    /// Load the throttle state for `identity_key`. Unknown keys start fresh.
    pub async fn load(&self, identity_key: &str, now: i64) -> Result<CooldownState, sqlx::Error> {
        Ok(self
            .find(identity_key)
            .await?
            .unwrap_or_else(|| CooldownState::new(now)))
    }

    /// Write `next` only if the stored state still equals `current`, where
    /// `None` means no row yet. Returns false if another writer changed the
    /// row in between; nothing is written then.
    pub async fn compare_and_swap(
        &self,
        identity_key: &str,
        current: Option<&CooldownState>,
        next: &CooldownState,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = match current {
            None => {
                sqlx::query(
                    "INSERT INTO otp_attempts
                     (identity_key, session_attempts, daily_attempts, day, cooldown_started_at, cooldown_secs, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(identity_key) DO NOTHING",
                )
                .bind(identity_key)
                .bind(next.session_attempts as i64)
                .bind(next.daily_attempts as i64)
                .bind(next.day.to_string())
                .bind(next.cooldown_started_at)
                .bind(next.cooldown_secs as i64)
                .bind(now)
                .execute(&self.pool)
                .await?
            }
            Some(current) => {
                sqlx::query(
                    "UPDATE otp_attempts
                     SET session_attempts = ?, daily_attempts = ?, day = ?,
                         cooldown_started_at = ?, cooldown_secs = ?, updated_at = ?
                     WHERE identity_key = ?
                       AND session_attempts = ? AND daily_attempts = ? AND day = ?
                       AND cooldown_started_at = ? AND cooldown_secs = ?",
                )
                .bind(next.session_attempts as i64)
                .bind(next.daily_attempts as i64)
                .bind(next.day.to_string())
                .bind(next.cooldown_started_at)
                .bind(next.cooldown_secs as i64)
                .bind(now)
                .bind(identity_key)
                .bind(current.session_attempts as i64)
                .bind(current.daily_attempts as i64)
                .bind(current.day.to_string())
                .bind(current.cooldown_started_at)
                .bind(current.cooldown_secs as i64)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    /// End the backoff session for `identity_key`. The daily count is kept.
    pub async fn reset_session(&self, identity_key: &str, now: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE otp_attempts
             SET session_attempts = 0, cooldown_started_at = 0, cooldown_secs = 0, updated_at = ?
             WHERE identity_key = ?",
        )
        .bind(now)
        .bind(identity_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop throttle rows untouched for longer than `max_age_secs`.
    pub async fn cleanup_stale(&self, now: i64, max_age_secs: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM otp_attempts WHERE updated_at < ?")
            .bind(now - max_age_secs)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
