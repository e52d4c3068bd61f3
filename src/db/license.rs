//! License rows and their transaction log.
//!
//! A license key appears at most once. Re-activating a key updates the row in
//! place, including its owner. Rows are never deleted; the newest row for a
//! user is the one that counts.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

/// Access tier, ordered from least to most access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Pro,
    ProPlus,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::ProPlus => "pro_plus",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Tier::Free),
            "pro" => Some(Tier::Pro),
            "pro_plus" => Some(Tier::ProPlus),
            _ => None,
        }
    }

    /// Pro and Pro Plus unlock the dashboard.
    pub fn is_paid(&self) -> bool {
        *self >= Tier::Pro
    }

    /// Whether a holder of this tier may use content published at `required`.
    pub fn grants(&self, required: Tier) -> bool {
        *self >= required
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Active,
    Inactive,
    Expired,
    Disabled,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Active => "active",
            LicenseStatus::Inactive => "inactive",
            LicenseStatus::Expired => "expired",
            LicenseStatus::Disabled => "disabled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "active" => LicenseStatus::Active,
            "expired" => LicenseStatus::Expired,
            "disabled" => LicenseStatus::Disabled,
            _ => LicenseStatus::Inactive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Subscribe,
    OneTime,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Subscribe => "subscribe",
            PlanType::OneTime => "one_time",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "one_time" => PlanType::OneTime,
            _ => PlanType::Subscribe,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct License {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub user_id: i64,
    pub license_key: String,
    pub status: LicenseStatus,
    pub tier: Tier,
    pub plan_type: PlanType,
    pub activated_at: Option<i64>,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl License {
    /// The tier this license grants at `now`. Anything but a live, active
    /// license collapses to free.
    pub fn effective_tier(&self, now: i64) -> Tier {
        let live = match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        };
        if self.status == LicenseStatus::Active && live {
            self.tier
        } else {
            Tier::Free
        }
    }
}

#[derive(sqlx::FromRow)]
struct LicenseRow {
    id: i64,
    user_id: i64,
    license_key: String,
    status: String,
    tier: String,
    plan_type: String,
    activated_at: Option<i64>,
    expires_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl From<LicenseRow> for License {
    fn from(row: LicenseRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            license_key: row.license_key,
            status: LicenseStatus::from_str(&row.status),
            tier: Tier::from_str(&row.tier).unwrap_or(Tier::Free),
            plan_type: PlanType::from_str(&row.plan_type),
            activated_at: row.activated_at,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Fields written on activation.
#[derive(Debug, Clone)]
pub struct LicenseUpsert<'a> {
    pub user_id: i64,
    pub license_key: &'a str,
    pub status: LicenseStatus,
    pub tier: Tier,
    pub plan_type: PlanType,
    pub activated_at: i64,
    pub expires_at: Option<i64>,
    pub now: i64,
}

const LICENSE_COLUMNS: &str = "id, user_id, license_key, status, tier, plan_type, activated_at, expires_at, created_at, updated_at";

#[derive(Clone)]
pub struct LicenseStore {
    pool: SqlitePool,
}

impl LicenseStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the license, or update the existing row for the same key.
    /// Returns the row id.
    pub async fn upsert_by_key(&self, license: &LicenseUpsert<'_>) -> Result<i64, sqlx::Error> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO licenses
             (user_id, license_key, status, tier, plan_type, activated_at, expires_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(license_key) DO UPDATE SET
                user_id = excluded.user_id,
                status = excluded.status,
                tier = excluded.tier,
                plan_type = excluded.plan_type,
                activated_at = excluded.activated_at,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
             RETURNING id",
        )
        .bind(license.user_id)
        .bind(license.license_key)
        .bind(license.status.as_str())
        .bind(license.tier.as_str())
        .bind(license.plan_type.as_str())
        .bind(license.activated_at)
        .bind(license.expires_at)
        .bind(license.now)
        .bind(license.now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// The authoritative license for a user: newest by creation time.
    pub async fn latest_for_user(&self, user_id: i64) -> Result<Option<License>, sqlx::Error> {
        let row: Option<LicenseRow> = sqlx::query_as(&format!(
            "SELECT {LICENSE_COLUMNS} FROM licenses WHERE user_id = ?
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(License::from))
    }

    pub async fn get_by_key(&self, license_key: &str) -> Result<Option<License>, sqlx::Error> {
        let row: Option<LicenseRow> = sqlx::query_as(&format!(
            "SELECT {LICENSE_COLUMNS} FROM licenses WHERE license_key = ?"
        ))
        .bind(license_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(License::from))
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<License>, sqlx::Error> {
        let rows: Vec<LicenseRow> = sqlx::query_as(&format!(
            "SELECT {LICENSE_COLUMNS} FROM licenses WHERE user_id = ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(License::from).collect())
    }

    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM licenses")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// A row for the license transaction log. Amount is in cents.
#[derive(Debug, Clone)]
pub struct NewTransaction<'a> {
    pub user_id: i64,
    pub license_id: i64,
    pub transaction_type: &'a str,
    pub status: &'a str,
    pub amount: i64,
    pub metadata: serde_json::Value,
}

#[derive(Clone)]
pub struct TransactionStore {
    pool: SqlitePool,
}

impl TransactionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, tx: &NewTransaction<'_>) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO license_transactions
             (user_id, license_id, transaction_type, status, amount, metadata)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(tx.user_id)
        .bind(tx.license_id)
        .bind(tx.transaction_type)
        .bind(tx.status)
        .bind(tx.amount)
        .bind(tx.metadata.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Amounts logged for a license, oldest first.
    pub async fn amounts_for_license(&self, license_id: i64) -> Result<Vec<i64>, sqlx::Error> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT amount FROM license_transactions WHERE license_id = ? ORDER BY id",
        )
        .bind(license_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, UserRole};

    const NOW: i64 = 1_705_321_845;

    fn license(status: LicenseStatus, tier: Tier, expires_at: Option<i64>) -> License {
        License {
            id: 1,
            user_id: 1,
            license_key: "KEY".into(),
            status,
            tier,
            plan_type: PlanType::Subscribe,
            activated_at: Some(NOW),
            expires_at,
            created_at: NOW,
            updated_at: NOW,
        }
    }

    fn upsert(user_id: i64, key: &str, tier: Tier, now: i64) -> LicenseUpsert<'_> {
        LicenseUpsert {
            user_id,
            license_key: key,
            status: LicenseStatus::Active,
            tier,
            plan_type: PlanType::Subscribe,
            activated_at: now,
            expires_at: None,
            now,
        }
    }

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Free < Tier::Pro);
        assert!(Tier::Pro < Tier::ProPlus);
        assert!(Tier::ProPlus.grants(Tier::Pro));
        assert!(!Tier::Free.grants(Tier::Pro));
        assert!(Tier::Pro.is_paid());
        assert!(!Tier::Free.is_paid());
        assert_eq!(Tier::from_str("pro_plus"), Some(Tier::ProPlus));
        assert_eq!(Tier::from_str("gold"), None);
    }

    #[test]
    fn test_effective_tier_collapses() {
        let live = license(LicenseStatus::Active, Tier::Pro, Some(NOW + 10));
        assert_eq!(live.effective_tier(NOW), Tier::Pro);

        let lifetime = license(LicenseStatus::Active, Tier::ProPlus, None);
        assert_eq!(lifetime.effective_tier(NOW), Tier::ProPlus);

        let expired = license(LicenseStatus::Active, Tier::Pro, Some(NOW - 1));
        assert_eq!(expired.effective_tier(NOW), Tier::Free);

        let at_boundary = license(LicenseStatus::Active, Tier::Pro, Some(NOW));
        assert_eq!(at_boundary.effective_tier(NOW), Tier::Free);

        let disabled = license(LicenseStatus::Disabled, Tier::ProPlus, None);
        assert_eq!(disabled.effective_tier(NOW), Tier::Free);
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place_and_transfers() {
        let db = Database::open(":memory:").await.unwrap();
        let a = db
            .users()
            .create("uuid-a", "a@example.com", UserRole::User, None, true)
            .await
            .unwrap();
        let b = db
            .users()
            .create("uuid-b", "b@example.com", UserRole::User, None, true)
            .await
            .unwrap();

        let first = db
            .licenses()
            .upsert_by_key(&upsert(a, "KEY", Tier::Pro, NOW))
            .await
            .unwrap();
        let second = db
            .licenses()
            .upsert_by_key(&upsert(b, "KEY", Tier::ProPlus, NOW + 60))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(db.licenses().count().await.unwrap(), 1);

        let row = db.licenses().get_by_key("KEY").await.unwrap().unwrap();
        assert_eq!(row.user_id, b);
        assert_eq!(row.tier, Tier::ProPlus);
        assert_eq!(row.created_at, NOW);
        assert_eq!(row.updated_at, NOW + 60);

        assert!(db.licenses().latest_for_user(a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_for_user_orders_by_creation() {
        let db = Database::open(":memory:").await.unwrap();
        let user = db
            .users()
            .create("uuid-a", "a@example.com", UserRole::User, None, true)
            .await
            .unwrap();

        db.licenses()
            .upsert_by_key(&upsert(user, "NEW", Tier::Pro, NOW + 100))
            .await
            .unwrap();
        db.licenses()
            .upsert_by_key(&upsert(user, "OLD", Tier::ProPlus, NOW))
            .await
            .unwrap();

        let latest = db.licenses().latest_for_user(user).await.unwrap().unwrap();
        assert_eq!(latest.license_key, "NEW");
        assert_eq!(db.licenses().list_for_user(user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transaction_insert() {
        let db = Database::open(":memory:").await.unwrap();
        let user = db
            .users()
            .create("uuid-a", "a@example.com", UserRole::User, None, true)
            .await
            .unwrap();
        let license_id = db
            .licenses()
            .upsert_by_key(&upsert(user, "KEY", Tier::Pro, NOW))
            .await
            .unwrap();

        db.transactions()
            .insert(&NewTransaction {
                user_id: user,
                license_id,
                transaction_type: "activation",
                status: "completed",
                amount: 4900,
                metadata: serde_json::json!({ "order_id": 7 }),
            })
            .await
            .unwrap();

        assert_eq!(
            db.transactions()
                .amounts_for_license(license_id)
                .await
                .unwrap(),
            vec![4900]
        );
    }
}
