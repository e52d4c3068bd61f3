mod admin;
mod auth;
mod catalog;
mod config;
mod error;
mod invites;
mod license;
mod password;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::license::LicenseGateway;
use crate::mail::Outbox;
use crate::otp::OtpIssuer;
use crate::rate_limit::RateLimitConfig;
use crate::signature::SignatureCodec;

/// Shared services the API handlers are built from.
pub struct ApiServices {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub codec: Arc<SignatureCodec>,
    pub otp: OtpIssuer,
    pub gateway: LicenseGateway,
    pub outbox: Outbox,
}

/// Create the API router.
pub fn create_api_router(services: ApiServices, limits: RateLimitConfig) -> Router {
    let ApiServices {
        db,
        jwt,
        codec,
        otp,
        gateway,
        outbox,
    } = services;

    let auth_state = auth::AuthApiState {
        db: db.clone(),
        jwt: jwt.clone(),
    };

    let license_state = license::LicenseState {
        db: db.clone(),
        jwt: jwt.clone(),
        otp,
        gateway,
        outbox: outbox.clone(),
    };

    let password_state = password::PasswordState {
        db: db.clone(),
        codec: codec.clone(),
        outbox: outbox.clone(),
    };

    let invites_state = invites::InvitesState {
        db: db.clone(),
        jwt: jwt.clone(),
        codec: codec.clone(),
    };

    let catalog_state = catalog::CatalogState {
        db: db.clone(),
        jwt: jwt.clone(),
    };

    let admin_state = admin::AdminState {
        db: db.clone(),
        jwt: jwt.clone(),
        codec,
        outbox,
    };

    let config_state = config::ConfigState { jwt, db };

    Router::new()
        .nest("/auth", auth::router(auth_state, limits.sign_in))
        .nest(
            "/license",
            license::router(license_state, limits.otp_send, limits.otp_verify),
        )
        .nest(
            "/password",
            password::router(password_state, limits.password_forgot),
        )
        .nest("/invites", invites::router(invites_state))
        .nest("/catalog", catalog::router(catalog_state))
        .nest("/admin", admin::router(admin_state))
        .nest("/config", config::router(config_state))
}
