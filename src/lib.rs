pub mod api;
pub mod auth;
pub mod catalog;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod license;
pub mod mail;
pub mod otp;
pub mod pages;
pub mod password;
pub mod policy;
pub mod rate_limit;
pub mod server_config;
pub mod session;
pub mod signature;
pub mod time;

use api::{ApiServices, create_api_router};
use auth::add_access_token_cookie;
use axum::{Router, middleware};
use db::Database;
use jwt::JwtConfig;
use license::{LicenseGateway, LicenseVendor};
use mail::{Mailer, Outbox};
use otp::{CooldownPolicy, OtpIssuer};
use policy::PolicyState;
use rate_limit::RateLimitConfig;
use signature::SignatureCodec;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use url::Url;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing session tokens
    pub jwt_secret: Vec<u8>,
    /// Secret for signed flow links and license verification tokens
    pub signature_secret: Vec<u8>,
    /// Public origin used to build links in emails
    pub public_url: Url,
    /// Whether to set Secure flag on cookies (should be true in production with HTTPS)
    pub secure_cookies: bool,
    /// IP extraction strategy (requires running behind a proxy)
    pub ip_extractor: Option<cli::IpExtractor>,
    /// License vendor client
    pub vendor: Arc<dyn LicenseVendor>,
    /// Outgoing email transport
    pub mailer: Arc<dyn Mailer>,
    pub mail_from: String,
    pub rate_limits: RateLimitConfig,
    pub cooldown: CooldownPolicy,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    server_config::init(config.secure_cookies, config.ip_extractor.clone());

    let jwt = Arc::new(JwtConfig::new(&config.jwt_secret));
    let codec = Arc::new(SignatureCodec::new(&config.signature_secret));

    let outbox = Outbox::new(
        config.mailer.clone(),
        config.mail_from.clone(),
        config.public_url.clone(),
    );

    let services = ApiServices {
        db: config.db.clone(),
        jwt: jwt.clone(),
        codec: codec.clone(),
        otp: OtpIssuer::new(config.db.clone(), codec.clone(), config.cooldown),
        gateway: LicenseGateway::new(config.db.clone(), config.vendor.clone()),
        outbox,
    };

    let api_router = create_api_router(services, config.rate_limits.clone());

    let pages = pages::router(PolicyState {
        db: config.db.clone(),
        jwt,
        codec,
    });

    // Refreshed access tokens are minted deep inside extractors; this layer
    // must wrap everything so the cookie reaches the response.
    Router::new()
        .nest("/api", api_router)
        .merge(pages)
        .layer(middleware::from_fn(add_access_token_cookie))
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database) {
    cleanup::run_cleanup(db).await;
    cleanup::spawn_cleanup_scheduler(db.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}
