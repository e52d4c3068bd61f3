//! Public configuration endpoint.

use axum::{Json, Router, routing::get};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::OptionalAuth;
use crate::db::{Database, Tier, UserRole};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;

/// Version embedded at compile time from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct ConfigState {
    pub jwt: Arc<JwtConfig>,
    pub db: Database,
}

impl_has_auth_backend!(ConfigState);

#[derive(Serialize)]
struct ConfigResponse {
    authenticated: bool,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<UserRole>,
    /// Viewer tier used for catalog locking, `free` when signed out.
    tier: Tier,
}

pub fn router(state: ConfigState) -> Router {
    Router::new().route("/", get(get_config)).with_state(state)
}

async fn get_config(OptionalAuth(user): OptionalAuth) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        authenticated: user.is_some(),
        version: VERSION,
        role: user.as_ref().map(|u| u.role()),
        tier: user.as_ref().map(|u| u.tier()).unwrap_or(Tier::Free),
    })
}
