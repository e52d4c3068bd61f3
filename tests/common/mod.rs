#![allow(dead_code)]

use assetgate::{
    ServerConfig,
    cli::{ClientIpHeader, IpExtractor},
    create_app,
    db::{Database, LicenseStatus, LicenseUpsert, PlanType, Tier, User, UserRole},
    jwt::JwtConfig,
    license::{
        ActivateResponse, LicenseVendor, ValidateResponse, VendorError, VendorLicenseKey,
        VendorMeta,
    },
    mail::{Email, MailError, Mailer},
    otp::CooldownPolicy,
    password::hash_password,
    rate_limit::RateLimitConfig,
    session::SessionSnapshot,
    signature::SignatureCodec,
    time::unix_now,
};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use url::Url;

pub const JWT_SECRET: &[u8] = b"test-jwt-secret-that-is-long-enough!";
pub const SIGNATURE_SECRET: &[u8] = b"test-signature-secret-long-enough!!";
pub const CLIENT_IP: &str = "203.0.113.7";
pub const BUYER_EMAIL: &str = "buyer@example.com";

/// Mailer that keeps every email it is handed.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Email> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// The code between the first `<strong>` tags of an email.
pub fn code_from(email: &Email) -> String {
    let start = email.html.find("<strong>").unwrap() + "<strong>".len();
    let end = email.html[start..].find("</strong>").unwrap() + start;
    email.html[start..end].to_string()
}

/// The decoded `signature` parameter of the link in an email.
pub fn signature_from(email: &Email) -> String {
    let start = email.html.find("href=\"").unwrap() + "href=\"".len();
    let end = email.html[start..].find('"').unwrap() + start;
    let link = Url::parse(&email.html[start..end]).unwrap();
    link.query_pairs()
        .find(|(k, _)| k == "signature")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

/// Vendor double that answers from a fixed script.
pub struct FakeVendor {
    pub variant: Option<String>,
    pub customer_email: String,
    pub refuse: bool,
    /// Validate the key but refuse to activate it.
    pub refuse_activation: bool,
    pub unavailable: bool,
    pub activations: Mutex<Vec<String>>,
}

impl Default for FakeVendor {
    fn default() -> Self {
        Self {
            variant: Some("Pro (Lifetime)".into()),
            customer_email: BUYER_EMAIL.into(),
            refuse: false,
            refuse_activation: false,
            unavailable: false,
            activations: Mutex::new(Vec::new()),
        }
    }
}

impl FakeVendor {
    fn meta(&self) -> VendorMeta {
        VendorMeta {
            order_id: Some(1001),
            product_name: Some("Asset Library".into()),
            variant_name: self.variant.clone(),
            customer_name: None,
            customer_email: Some(self.customer_email.clone()),
        }
    }

    fn key(status: &str) -> Option<VendorLicenseKey> {
        Some(VendorLicenseKey {
            status: status.into(),
            key: None,
            expires_at: None,
        })
    }

    pub fn activation_count(&self) -> usize {
        self.activations.lock().unwrap().len()
    }
}

#[async_trait]
impl LicenseVendor for FakeVendor {
    async fn validate(&self, _license_key: &str) -> Result<ValidateResponse, VendorError> {
        if self.unavailable {
            return Err(VendorError::Status {
                status: 503,
                body: "maintenance".into(),
            });
        }
        Ok(ValidateResponse {
            valid: !self.refuse,
            error: self.refuse.then(|| "license_key not found.".to_string()),
            license_key: Self::key("inactive"),
            meta: Some(self.meta()),
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
                body: "maintenance".into(),
            });
        }
        self.activations
            .lock()
            .unwrap()
            .push(instance_name.to_string());
        let refused = self.refuse || self.refuse_activation;
        Ok(ActivateResponse {
            activated: !refused,
            error: refused.then(|| "activation limit reached".to_string()),
            license_key: Self::key("active"),
            instance: None,
            meta: Some(self.meta()),
        })
    }

    async fn order_total(&self, _order_id: i64) -> Result<i64, VendorError> {
        Ok(14_900)
    }
}

/// Server configuration used by every test app.
pub fn test_config(
    db: Database,
    vendor: Arc<FakeVendor>,
    mailer: Arc<RecordingMailer>,
    rate_limits: RateLimitConfig,
) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: JWT_SECRET.to_vec(),
        signature_secret: SIGNATURE_SECRET.to_vec(),
        public_url: Url::parse("http://localhost:7390").expect("Invalid URL"),
        secure_cookies: false,
        ip_extractor: Some(IpExtractor::from(ClientIpHeader::XForwardFor)),
        vendor,
        mailer,
        mail_from: "Assetgate <noreply@localhost>".into(),
        rate_limits,
        cooldown: CooldownPolicy::default(),
    }
}

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub jwt: JwtConfig,
    pub codec: SignatureCodec,
    pub mailer: Arc<RecordingMailer>,
    pub vendor: Arc<FakeVendor>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_vendor(FakeVendor::default()).await
    }

    pub async fn with_vendor(vendor: FakeVendor) -> Self {
        Self::build(vendor, RateLimitConfig::permissive()).await
    }

    pub async fn with_rate_limits(rate_limits: RateLimitConfig) -> Self {
        Self::build(FakeVendor::default(), rate_limits).await
    }

    async fn build(vendor: FakeVendor, rate_limits: RateLimitConfig) -> Self {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let mailer = Arc::new(RecordingMailer::default());
        let vendor = Arc::new(vendor);
        let config = test_config(db.clone(), vendor.clone(), mailer.clone(), rate_limits);
        Self {
            app: create_app(&config),
            db,
            jwt: JwtConfig::new(JWT_SECRET),
            codec: SignatureCodec::new(SIGNATURE_SECRET),
            mailer,
            vendor,
        }
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        self.send("GET", uri, cookie, None).await
    }

    pub async fn post(
        &self,
        uri: &str,
        cookie: Option<&str>,
        body: serde_json::Value,
    ) -> Response<Body> {
        self.send("POST", uri, cookie, Some(body)).await
    }

    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        cookie: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", CLIENT_IP);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Access and refresh cookies for a user, with the refresh token recorded.
    pub async fn sign_in_as(&self, user: &User, tier: Tier) -> String {
        let snapshot = SessionSnapshot {
            user_uuid: user.uuid.clone(),
            email: user.email.clone(),
            role: user.role,
            tier,
            email_verified: user.email_verified,
        };
        let access = self.jwt.generate_access_token(&snapshot).unwrap();
        let refresh = self.jwt.generate_refresh_token(&snapshot).unwrap();
        self.db
            .tokens()
            .create(
                &refresh.jti,
                user.id,
                Some(CLIENT_IP),
                refresh.issued_at as i64,
                refresh.expires_at as i64,
            )
            .await
            .unwrap();
        format!(
            "access_token={}; refresh_token={}",
            access.token, refresh.token
        )
    }

    /// Only a refresh cookie, so the first request has to mint an access token.
    pub async fn refresh_cookie_for(&self, user: &User, tier: Tier) -> String {
        let cookies = self.sign_in_as(user, tier).await;
        cookies
            .split("; ")
            .find(|c| c.starts_with("refresh_token="))
            .unwrap()
            .to_string()
    }
}

pub async fn create_user(
    db: &Database,
    email: &str,
    role: UserRole,
    password: Option<&str>,
) -> User {
    let hash = password.map(|p| hash_password(p).unwrap());
    let uuid = uuid::Uuid::new_v4().to_string();
    let id = db
        .users()
        .create(&uuid, email, role, hash.as_deref(), true)
        .await
        .unwrap();
    db.users().get_by_id(id).await.unwrap().unwrap()
}

/// Give a user an active lifetime license of `tier`.
pub async fn grant_license(db: &Database, user: &User, key: &str, tier: Tier) {
    let now = unix_now();
    db.licenses()
        .upsert_by_key(&LicenseUpsert {
            user_id: user.id,
            license_key: key,
            status: LicenseStatus::Active,
            tier,
            plan_type: PlanType::OneTime,
            activated_at: now,
            expires_at: None,
            now,
        })
        .await
        .unwrap();
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub fn location(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// The `name=value` pairs of every non-empty Set-Cookie, joined for a Cookie header.
pub fn cookie_header(response: &Response<Body>) -> String {
    set_cookies(response)
        .iter()
        .filter_map(|c| c.split(';').next())
        .filter(|pair| !pair.ends_with('='))
        .collect::<Vec<_>>()
        .join("; ")
}
