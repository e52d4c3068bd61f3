//! Scheduled cleanup tasks for expired data.

use crate::db::Database;
use crate::time::unix_now;
use std::time::Duration;
use tracing::{error, info};

/// Throttle rows untouched this long can no longer affect a cooldown or a
/// daily quota.
const STALE_ATTEMPT_AGE_SECS: i64 = 2 * 24 * 60 * 60;

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once.
pub async fn run_cleanup(db: &Database) {
    let now = unix_now();

    // Clean up expired refresh tokens
    match db.tokens().delete_expired().await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired tokens", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up expired tokens: {}", e),
    }

    match db.otps().cleanup_expired(now).await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired one-time codes", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up one-time codes: {}", e),
    }

    match db
        .otp_attempts()
        .cleanup_stale(now, STALE_ATTEMPT_AGE_SECS)
        .await
    {
        Ok(count) if count > 0 => info!("Cleaned up {} stale code throttles", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up code throttles: {}", e),
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(db: Database) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&db).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserRole;
    use crate::otp::CooldownState;

    #[tokio::test]
    async fn test_run_cleanup_removes_expired_rows() {
        let db = Database::open(":memory:").await.unwrap();
        let now = unix_now();

        let user_id = db
            .users()
            .create("uuid-1", "a@example.com", UserRole::User, None, true)
            .await
            .unwrap();
        db.tokens()
            .create("expired", user_id, None, now - 100, now - 10)
            .await
            .unwrap();
        db.tokens()
            .create("live", user_id, None, now, now + 1000)
            .await
            .unwrap();

        db.otps().put("license:OLD", "111111", 600, now - 700).await.unwrap();
        db.otps().put("license:NEW", "222222", 600, now).await.unwrap();

        let old_state = CooldownState::new(now - STALE_ATTEMPT_AGE_SECS - 10);
        db.otp_attempts()
            .compare_and_swap(
                "license:OLD",
                None,
                &old_state,
                now - STALE_ATTEMPT_AGE_SECS - 10,
            )
            .await
            .unwrap();

        run_cleanup(&db).await;

        assert!(db.tokens().get_by_jti("expired").await.unwrap().is_none());
        assert!(db.tokens().get_by_jti("live").await.unwrap().is_some());
        assert!(db.otps().get("license:OLD", now - 700).await.unwrap().is_none());
        assert_eq!(
            db.otps().get("license:NEW", now).await.unwrap().as_deref(),
            Some("222222")
        );
    }
}
