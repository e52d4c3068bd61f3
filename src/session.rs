//! Session role and tier resolution.
//!
//! Role and effective tier are looked up again whenever a session is created
//! or its access token is renewed, so a license that lapses or a role change
//! takes effect within one access-token lifetime. A lookup failure never ends
//! the session: the previous token's values are reused instead.

use serde::Serialize;

use crate::db::{Database, Tier, User, UserRole};
use crate::jwt::RefreshClaims;
use crate::time::unix_now;

/// Everything a session token says about its user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub user_uuid: String,
    pub email: String,
    pub role: UserRole,
    pub tier: Tier,
    pub email_verified: bool,
}

impl SessionSnapshot {
    /// The values a refresh token was issued with.
    ///
    /// These are frozen at sign-in: refreshing mints access tokens only, so
    /// during a storage outage a session falls back to its sign-in role and
    /// tier, not to whatever the last access token carried.
    pub fn from_refresh_claims(claims: &RefreshClaims) -> Self {
        Self {
            user_uuid: claims.sub.clone(),
            email: claims.email.clone(),
            role: claims.role,
            tier: claims.tier,
            email_verified: claims.email_verified,
        }
    }
}

/// Effective tier of a user's newest license, or free if they have none.
pub async fn effective_tier(db: &Database, user_id: i64, now: i64) -> Result<Tier, sqlx::Error> {
    Ok(db
        .licenses()
        .latest_for_user(user_id)
        .await?
        .map(|license| license.effective_tier(now))
        .unwrap_or(Tier::Free))
}

/// Snapshot for a user row already in hand. If the license lookup fails the
/// tier falls back to `fallback_tier`, or free.
pub async fn resolve_for_user(
    db: &Database,
    user: &User,
    fallback_tier: Option<Tier>,
    now: i64,
) -> SessionSnapshot {
    let tier = match effective_tier(db, user.id, now).await {
        Ok(tier) => tier,
        Err(e) => {
            tracing::warn!(user = %user.uuid, error = %e, "Tier lookup failed, keeping previous tier");
            fallback_tier.unwrap_or(Tier::Free)
        }
    };

    SessionSnapshot {
        user_uuid: user.uuid.clone(),
        email: user.email.clone(),
        role: user.role,
        tier,
        email_verified: user.email_verified,
    }
}

/// Re-derive a session from the database.
///
/// Returns `None` only when the user no longer exists. A storage failure
/// yields `previous` unchanged.
pub async fn resolve(db: &Database, previous: &SessionSnapshot) -> Option<SessionSnapshot> {
    resolve_at(db, previous, unix_now()).await
}

pub async fn resolve_at(
    db: &Database,
    previous: &SessionSnapshot,
    now: i64,
) -> Option<SessionSnapshot> {
    match db.users().get_by_uuid(&previous.user_uuid).await {
        Ok(Some(user)) => Some(resolve_for_user(db, &user, Some(previous.tier), now).await),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(
                user = %previous.user_uuid,
                error = %e,
                "Session lookup failed, keeping previous role and tier"
            );
            Some(previous.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{LicenseStatus, LicenseUpsert, PlanType};

    const NOW: i64 = 1_705_321_845;

    async fn seed_user(db: &Database, role: UserRole) -> User {
        let id = db
            .users()
            .create("uuid-1", "a@example.com", role, None, true)
            .await
            .unwrap();
        db.users().get_by_id(id).await.unwrap().unwrap()
    }

    async fn seed_license(db: &Database, user_id: i64, tier: Tier, expires_at: Option<i64>) {
        db.licenses()
            .upsert_by_key(&LicenseUpsert {
                user_id,
                license_key: "KEY",
                status: LicenseStatus::Active,
                tier,
                plan_type: PlanType::Subscribe,
                activated_at: NOW,
                expires_at,
                now: NOW,
            })
            .await
            .unwrap();
    }

    fn previous(role: UserRole, tier: Tier) -> SessionSnapshot {
        SessionSnapshot {
            user_uuid: "uuid-1".into(),
            email: "a@example.com".into(),
            role,
            tier,
            email_verified: true,
        }
    }

    #[tokio::test]
    async fn test_no_license_is_free() {
        let db = Database::open(":memory:").await.unwrap();
        let user = seed_user(&db, UserRole::User).await;

        let snapshot = resolve_for_user(&db, &user, Some(Tier::Pro), NOW).await;
        assert_eq!(snapshot.tier, Tier::Free);
    }

    #[tokio::test]
    async fn test_tier_collapses_after_expiry() {
        let db = Database::open(":memory:").await.unwrap();
        let user = seed_user(&db, UserRole::User).await;
        seed_license(&db, user.id, Tier::Pro, Some(NOW + 100)).await;

        let before = resolve_at(&db, &previous(UserRole::User, Tier::Free), NOW).await;
        assert_eq!(before.unwrap().tier, Tier::Pro);

        let after = resolve_at(&db, &previous(UserRole::User, Tier::Pro), NOW + 101).await;
        assert_eq!(after.unwrap().tier, Tier::Free);
    }

    #[tokio::test]
    async fn test_role_change_is_picked_up() {
        let db = Database::open(":memory:").await.unwrap();
        let user = seed_user(&db, UserRole::User).await;
        db.users().set_role(user.id, UserRole::Admin).await.unwrap();

        let snapshot = resolve_at(&db, &previous(UserRole::User, Tier::Free), NOW)
            .await
            .unwrap();
        assert_eq!(snapshot.role, UserRole::Admin);
    }

    #[tokio::test]
    async fn test_deleted_user_ends_session() {
        let db = Database::open(":memory:").await.unwrap();
        assert!(
            resolve_at(&db, &previous(UserRole::User, Tier::Pro), NOW)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_previous_values() {
        let db = Database::open(":memory:").await.unwrap();
        seed_user(&db, UserRole::Admin).await;
        db.close().await;

        let prev = previous(UserRole::Admin, Tier::ProPlus);
        let snapshot = resolve_at(&db, &prev, NOW).await;
        assert_eq!(snapshot, Some(prev));
    }

    #[tokio::test]
    async fn test_tier_fallback_when_license_lookup_fails() {
        let db = Database::open(":memory:").await.unwrap();
        let user = seed_user(&db, UserRole::User).await;
        db.close().await;

        let snapshot = resolve_for_user(&db, &user, Some(Tier::Pro), NOW).await;
        assert_eq!(snapshot.tier, Tier::Pro);

        let snapshot = resolve_for_user(&db, &user, None, NOW).await;
        assert_eq!(snapshot.tier, Tier::Free);
    }
}
