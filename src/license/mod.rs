//! License activation gateway.
//!
//! Activation always calls the vendor first and writes nothing unless the
//! vendor confirms. The license row is then upserted on its key, so activating
//! the same key twice, or from another account, updates one row in place.
//! Finally a transaction row is logged with the order total, or a static
//! price when the order lookup fails.

pub mod vendor;

use serde::Serialize;
use std::sync::Arc;

use crate::db::{
    Database, LicenseStatus, LicenseUpsert, NewTransaction, PlanType, Tier, User,
};
use crate::time::unix_now;

pub use vendor::{
    ActivateResponse, HttpLicenseVendor, LicenseVendor, ValidateResponse, VendorError,
    VendorLicenseKey, VendorMeta,
};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Vendor(#[from] VendorError),
    /// The vendor answered but refused the key.
    #[error("License rejected: {0}")]
    Rejected(String),
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Tier named by a vendor variant, e.g. "Pro Plus (Yearly)".
pub fn tier_from_variant(variant_name: Option<&str>) -> Tier {
    let Some(name) = variant_name else {
        return Tier::Free;
    };
    let name = name.to_lowercase();
    if name.contains("pro plus") || name.contains("pro_plus") || name.contains("pro+") {
        Tier::ProPlus
    } else if name.contains("pro") {
        Tier::Pro
    } else {
        Tier::Free
    }
}

/// Lifetime variants and keys without an expiry are one-time purchases.
pub fn plan_from_variant(variant_name: Option<&str>, expires_at: Option<i64>) -> PlanType {
    let lifetime = variant_name
        .map(|name| {
            let name = name.to_lowercase();
            name.contains("lifetime") || name.contains("one-time") || name.contains("one time")
        })
        .unwrap_or(false);

    if lifetime || expires_at.is_none() {
        PlanType::OneTime
    } else {
        PlanType::Subscribe
    }
}

/// Price in cents used when the vendor order total is unavailable.
pub fn fallback_price(tier: Tier, plan: PlanType) -> i64 {
    match (tier, plan) {
        (Tier::Free, _) => 0,
        (Tier::Pro, PlanType::Subscribe) => 4_900,
        (Tier::Pro, PlanType::OneTime) => 14_900,
        (Tier::ProPlus, PlanType::Subscribe) => 9_900,
        (Tier::ProPlus, PlanType::OneTime) => 29_900,
    }
}

fn parse_vendor_time(value: Option<&str>) -> Option<i64> {
    let value = value?;
    match chrono::DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Some(dt.timestamp()),
        Err(e) => {
            tracing::warn!(value = %value, error = %e, "Unparseable vendor timestamp");
            None
        }
    }
}

fn parse_vendor_status(status: &str) -> LicenseStatus {
    LicenseStatus::from_str(&status.to_lowercase())
}

/// What a vendor says about a key before any account is involved.
#[derive(Debug, Clone)]
pub struct ValidatedLicense {
    pub customer_email: String,
    pub status: LicenseStatus,
    pub tier: Tier,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivatedLicense {
    #[serde(skip)]
    pub license_id: i64,
    pub license_key: String,
    pub status: LicenseStatus,
    pub tier: Tier,
    pub plan_type: PlanType,
    pub expires_at: Option<i64>,
    /// Amount logged for this activation, in cents.
    pub amount: i64,
}

/// A key the vendor has just activated, not yet stored.
#[derive(Debug, Clone)]
pub struct VendorActivation {
    pub status: LicenseStatus,
    pub tier: Tier,
    pub plan_type: PlanType,
    pub expires_at: Option<i64>,
    instance_id: Option<String>,
    meta: VendorMeta,
}

#[derive(Clone)]
pub struct LicenseGateway {
    db: Database,
    vendor: Arc<dyn LicenseVendor>,
}

impl LicenseGateway {
    pub fn new(db: Database, vendor: Arc<dyn LicenseVendor>) -> Self {
        Self { db, vendor }
    }

    pub fn instance_name(user_uuid: &str) -> String {
        format!("assetgate-user-{}", user_uuid)
    }

    /// Ask the vendor whether a key is valid and who bought it.
    pub async fn validate(&self, license_key: &str) -> Result<ValidatedLicense, GatewayError> {
        let response = self.vendor.validate(license_key).await?;
        if !response.valid {
            return Err(GatewayError::Rejected(
                response
                    .error
                    .unwrap_or_else(|| "License key is not valid".to_string()),
            ));
        }

        let meta = response.meta.unwrap_or_default();
        let customer_email = meta
            .customer_email
            .filter(|e| !e.trim().is_empty())
            .ok_or(VendorError::Incomplete("customer email"))?;
        let key = response
            .license_key
            .ok_or(VendorError::Incomplete("license key"))?;

        Ok(ValidatedLicense {
            customer_email,
            status: parse_vendor_status(&key.status),
            tier: tier_from_variant(meta.variant_name.as_deref()),
            expires_at: parse_vendor_time(key.expires_at.as_deref()),
        })
    }

    /// Activate a key for an existing account: vendor first, then storage.
    pub async fn activate_at(
        &self,
        license_key: &str,
        user: &User,
        now: i64,
    ) -> Result<ActivatedLicense, GatewayError> {
        let activation = self.request_activation(license_key, &user.uuid).await?;
        self.record_at(license_key, user, activation, now).await
    }

    /// The vendor half of an activation, for an account that may not exist
    /// yet. Nothing is written locally.
    pub async fn request_activation(
        &self,
        license_key: &str,
        user_uuid: &str,
    ) -> Result<VendorActivation, GatewayError> {
        let instance_name = Self::instance_name(user_uuid);
        let response = self.vendor.activate(license_key, &instance_name).await?;

        if !response.activated {
            tracing::info!(user = %user_uuid, error = ?response.error, "Vendor refused activation");
            return Err(GatewayError::Rejected(
                response
                    .error
                    .unwrap_or_else(|| "License could not be activated".to_string()),
            ));
        }

        let meta = response.meta.unwrap_or_default();
        let key = response
            .license_key
            .ok_or(VendorError::Incomplete("license key"))?;

        let expires_at = parse_vendor_time(key.expires_at.as_deref());
        Ok(VendorActivation {
            status: parse_vendor_status(&key.status),
            tier: tier_from_variant(meta.variant_name.as_deref()),
            plan_type: plan_from_variant(meta.variant_name.as_deref(), expires_at),
            expires_at,
            instance_id: response.instance.map(|i| i.id),
            meta,
        })
    }

    pub async fn record(
        &self,
        license_key: &str,
        user: &User,
        activation: VendorActivation,
    ) -> Result<ActivatedLicense, GatewayError> {
        self.record_at(license_key, user, activation, unix_now()).await
    }

    /// The local half: store the license for `user` and log the transaction.
    pub async fn record_at(
        &self,
        license_key: &str,
        user: &User,
        activation: VendorActivation,
        now: i64,
    ) -> Result<ActivatedLicense, GatewayError> {
        let VendorActivation {
            status,
            tier,
            plan_type,
            expires_at,
            instance_id,
            meta,
        } = activation;

        let license_id = self
            .db
            .licenses()
            .upsert_by_key(&LicenseUpsert {
                user_id: user.id,
                license_key,
                status,
                tier,
                plan_type,
                activated_at: now,
                expires_at,
                now,
            })
            .await?;

        let (amount, amount_source) = match meta.order_id {
            Some(order_id) => match self.vendor.order_total(order_id).await {
                Ok(total) => (total, "order"),
                Err(e) => {
                    tracing::warn!(order_id, error = %e, "Order lookup failed, using price table");
                    (fallback_price(tier, plan_type), "price_table")
                }
            },
            None => (fallback_price(tier, plan_type), "price_table"),
        };

        let metadata = serde_json::json!({
            "order_id": meta.order_id,
            "product_name": meta.product_name,
            "variant_name": meta.variant_name,
            "instance_id": instance_id,
            "amount_source": amount_source,
        });

        // The license row stands even if the log write fails.
        if let Err(e) = self
            .db
            .transactions()
            .insert(&NewTransaction {
                user_id: user.id,
                license_id,
                transaction_type: "activation",
                status: "completed",
                amount,
                metadata,
            })
            .await
        {
            tracing::error!(license_id, error = %e, "Failed to log license transaction");
        }

        tracing::info!(
            user = %user.uuid,
            license_id,
            tier = tier.as_str(),
            plan = plan_type.as_str(),
            "License activated"
        );

        Ok(ActivatedLicense {
            license_id,
            license_key: license_key.to_string(),
            status,
            tier,
            plan_type,
            expires_at,
            amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserRole;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const NOW: i64 = 1_705_321_845;

    #[derive(Default)]
    struct ScriptedVendor {
        variant: Option<String>,
        expires_at: Option<String>,
        refuse: bool,
        unavailable: bool,
        order_total: Option<i64>,
        activations: Mutex<Vec<String>>,
    }

    fn meta(variant: Option<&str>) -> VendorMeta {
        VendorMeta {
            order_id: Some(42),
            product_name: Some("Assets".into()),
            variant_name: variant.map(str::to_string),
            customer_name: None,
            customer_email: Some("buyer@example.com".into()),
        }
    }

    #[async_trait]
    impl LicenseVendor for ScriptedVendor {
        async fn validate(&self, _license_key: &str) -> Result<ValidateResponse, VendorError> {
            Ok(ValidateResponse {
                valid: !self.refuse,
                error: self.refuse.then(|| "license_key not found.".to_string()),
                license_key: Some(VendorLicenseKey {
                    status: "inactive".into(),
                    key: None,
                    expires_at: self.expires_at.clone(),
                }),
                meta: Some(meta(self.variant.as_deref())),
            })
        }

        async fn activate(
            &self,
            _license_key: &str,
            instance_name: &str,
        ) -> Result<ActivateResponse, VendorError> {
            if self.unavailable {
                return Err(VendorError::Status {
                    status: 503,
                    body: "down".into(),
                });
            }
            self.activations
                .lock()
                .unwrap()
                .push(instance_name.to_string());
            Ok(ActivateResponse {
                activated: !self.refuse,
                error: self.refuse.then(|| "activation limit reached".to_string()),
                license_key: Some(VendorLicenseKey {
                    status: "active".into(),
                    key: None,
                    expires_at: self.expires_at.clone(),
                }),
                instance: Some(vendor::VendorInstance {
                    id: "instance-1".into(),
                    name: instance_name.into(),
                }),
                meta: Some(meta(self.variant.as_deref())),
            })
        }

        async fn order_total(&self, _order_id: i64) -> Result<i64, VendorError> {
            self.order_total.ok_or(VendorError::MissingApiKey)
        }
    }

    async fn user(db: &Database, uuid: &str, email: &str) -> User {
        let id = db
            .users()
            .create(uuid, email, UserRole::User, None, true)
            .await
            .unwrap();
        db.users().get_by_id(id).await.unwrap().unwrap()
    }

    #[test]
    fn test_tier_from_variant() {
        assert_eq!(tier_from_variant(Some("Pro Plus (Yearly)")), Tier::ProPlus);
        assert_eq!(tier_from_variant(Some("PRO+ lifetime")), Tier::ProPlus);
        assert_eq!(tier_from_variant(Some("Pro Monthly")), Tier::Pro);
        assert_eq!(tier_from_variant(Some("Starter")), Tier::Free);
        assert_eq!(tier_from_variant(None), Tier::Free);
    }

    #[test]
    fn test_plan_and_price() {
        assert_eq!(plan_from_variant(Some("Pro Lifetime"), Some(NOW)), PlanType::OneTime);
        assert_eq!(plan_from_variant(Some("Pro Monthly"), None), PlanType::OneTime);
        assert_eq!(plan_from_variant(Some("Pro Monthly"), Some(NOW)), PlanType::Subscribe);
        assert_eq!(fallback_price(Tier::Pro, PlanType::Subscribe), 4_900);
        assert_eq!(fallback_price(Tier::ProPlus, PlanType::OneTime), 29_900);
        assert_eq!(fallback_price(Tier::Free, PlanType::OneTime), 0);
    }

    #[tokio::test]
    async fn test_activation_is_idempotent_and_transfers() {
        let db = Database::open(":memory:").await.unwrap();
        let vendor = Arc::new(ScriptedVendor {
            variant: Some("Pro Monthly".into()),
            expires_at: Some("2030-01-01T00:00:00Z".into()),
            order_total: Some(4_500),
            ..ScriptedVendor::default()
        });
        let gateway = LicenseGateway::new(db.clone(), vendor.clone());
        let a = user(&db, "uuid-a", "a@example.com").await;
        let b = user(&db, "uuid-b", "b@example.com").await;

        let first = gateway.activate_at("KEY", &a, NOW).await.unwrap();
        let second = gateway.activate_at("KEY", &b, NOW + 10).await.unwrap();

        assert_eq!(first.license_id, second.license_id);
        assert_eq!(second.tier, Tier::Pro);
        assert_eq!(second.plan_type, PlanType::Subscribe);
        assert_eq!(second.amount, 4_500);
        assert_eq!(db.licenses().count().await.unwrap(), 1);

        let row = db.licenses().get_by_key("KEY").await.unwrap().unwrap();
        assert_eq!(row.user_id, b.id);
        assert_eq!(row.expires_at, Some(1_893_456_000));

        assert_eq!(
            *vendor.activations.lock().unwrap(),
            vec!["assetgate-user-uuid-a", "assetgate-user-uuid-b"]
        );
    }

    #[tokio::test]
    async fn test_price_fallback_when_order_lookup_fails() {
        let db = Database::open(":memory:").await.unwrap();
        let gateway = LicenseGateway::new(
            db.clone(),
            Arc::new(ScriptedVendor {
                variant: Some("Pro Plus Lifetime".into()),
                ..ScriptedVendor::default()
            }),
        );
        let a = user(&db, "uuid-a", "a@example.com").await;

        let activated = gateway.activate_at("KEY", &a, NOW).await.unwrap();
        assert_eq!(activated.tier, Tier::ProPlus);
        assert_eq!(activated.plan_type, PlanType::OneTime);
        assert_eq!(activated.amount, 29_900);
        assert_eq!(
            db.transactions()
                .amounts_for_license(activated.license_id)
                .await
                .unwrap(),
            vec![29_900]
        );
    }

    #[tokio::test]
    async fn test_activation_before_account_exists() {
        let db = Database::open(":memory:").await.unwrap();
        let vendor = Arc::new(ScriptedVendor {
            variant: Some("Pro Lifetime".into()),
            order_total: Some(14_900),
            ..ScriptedVendor::default()
        });
        let gateway = LicenseGateway::new(db.clone(), vendor.clone());

        let activation = gateway.request_activation("KEY", "uuid-new").await.unwrap();
        assert_eq!(activation.tier, Tier::Pro);
        assert_eq!(db.licenses().count().await.unwrap(), 0);
        assert!(db.users().list().await.unwrap().is_empty());

        let owner = user(&db, "uuid-new", "new@example.com").await;
        let activated = gateway.record_at("KEY", &owner, activation, NOW).await.unwrap();
        assert_eq!(activated.amount, 14_900);
        assert_eq!(
            db.licenses().get_by_key("KEY").await.unwrap().unwrap().user_id,
            owner.id
        );
        assert_eq!(
            *vendor.activations.lock().unwrap(),
            vec!["assetgate-user-uuid-new"]
        );
    }

    #[tokio::test]
    async fn test_vendor_failure_writes_nothing() {
        let db = Database::open(":memory:").await.unwrap();
        let a = user(&db, "uuid-a", "a@example.com").await;

        let down = LicenseGateway::new(
            db.clone(),
            Arc::new(ScriptedVendor {
                unavailable: true,
                ..ScriptedVendor::default()
            }),
        );
        assert!(matches!(
            down.activate_at("KEY", &a, NOW).await,
            Err(GatewayError::Vendor(_))
        ));

        let refusing = LicenseGateway::new(
            db.clone(),
            Arc::new(ScriptedVendor {
                refuse: true,
                ..ScriptedVendor::default()
            }),
        );
        assert!(matches!(
            refusing.activate_at("KEY", &a, NOW).await,
            Err(GatewayError::Rejected(_))
        ));

        assert_eq!(db.licenses().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_validate_returns_customer_email() {
        let db = Database::open(":memory:").await.unwrap();
        let gateway = LicenseGateway::new(
            db,
            Arc::new(ScriptedVendor {
                variant: Some("Pro".into()),
                ..ScriptedVendor::default()
            }),
        );

        let validated = gateway.validate("KEY").await.unwrap();
        assert_eq!(validated.customer_email, "buyer@example.com");
        assert_eq!(validated.tier, Tier::Pro);
        assert_eq!(validated.status, LicenseStatus::Inactive);
    }
}
