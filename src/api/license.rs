//! License sign-in and activation endpoints.
//!
//! - POST `/start` - Validate a license key and email a one-time code
//! - POST `/resend` - Send a new code for a previous verification token
//! - POST `/verify` - Check the code, activate the license and sign in
//! - GET `/` - Licenses of the current user

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::{SessionResponse, start_session};
use super::error::{ApiError, ResultExt};
use crate::auth::{Auth, ClientIp};
use crate::db::{Database, License, Tier};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::license::{ActivatedLicense, LicenseGateway};
use crate::mail::Outbox;
use crate::otp::{IssuedOtp, OtpIssuer};
use crate::rate_limit::{IpLimiter, rate_limit};
use crate::session::effective_tier;
use crate::signature::SignedPayload;
use crate::time::unix_now;

#[derive(Clone)]
pub struct LicenseState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub otp: OtpIssuer,
    pub gateway: LicenseGateway,
    pub outbox: Outbox,
}

impl_has_auth_backend!(LicenseState);

pub fn router(
    state: LicenseState,
    send_limiter: Arc<IpLimiter>,
    verify_limiter: Arc<IpLimiter>,
) -> Router {
    let send = Router::new()
        .route("/start", post(start))
        .route("/resend", post(resend))
        .layer(middleware::from_fn_with_state(send_limiter, rate_limit));

    let verify = Router::new()
        .route("/verify", post(verify))
        .layer(middleware::from_fn_with_state(verify_limiter, rate_limit));

    Router::new()
        .route("/", get(list_licenses))
        .merge(send)
        .merge(verify)
        .with_state(state)
}

/// Hide most of an address: `alice@example.com` becomes `a***@example.com`.
fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}

#[derive(Serialize)]
struct CodeSentResponse {
    success: bool,
    /// Token to present with the code.
    signature: String,
    /// Where the code went, masked.
    email: String,
    /// Seconds before another code can be requested.
    cooldown_secs: u64,
}

impl From<IssuedOtp> for CodeSentResponse {
    fn from(issued: IssuedOtp) -> Self {
        Self {
            success: true,
            signature: issued.signature,
            email: mask_email(&issued.email),
            cooldown_secs: issued.cooldown_secs,
        }
    }
}

#[derive(Deserialize)]
struct StartRequest {
    license_key: String,
}

/// Validate the key with the vendor, then send a code to the purchase email.
async fn start(
    State(state): State<LicenseState>,
    Json(body): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let license_key = body.license_key.trim();
    if license_key.is_empty() {
        return Err(ApiError::bad_request("License key is required"));
    }

    let validated = state.gateway.validate(license_key).await?;
    let issued = state
        .otp
        .issue(&validated.customer_email, license_key)
        .await?;

    state
        .outbox
        .send_license_code(&issued.email, &issued.code, &issued.signature)
        .await;

    Ok((StatusCode::OK, Json(CodeSentResponse::from(issued))))
}

#[derive(Deserialize)]
struct ResendRequest {
    signature: String,
}

async fn resend(
    State(state): State<LicenseState>,
    Json(body): Json<ResendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let issued = state.otp.resend(&body.signature).await?;

    state
        .outbox
        .send_license_code(&issued.email, &issued.code, &issued.signature)
        .await;

    Ok((StatusCode::OK, Json(CodeSentResponse::from(issued))))
}

#[derive(Deserialize)]
struct VerifyRequest {
    signature: String,
    code: String,
}

#[derive(Serialize)]
struct VerifyResponse {
    #[serde(flatten)]
    session: SessionResponse,
    license: ActivatedLicense,
}

/// Consume the code, activate the license with the vendor, then store it and
/// sign the owner in.
async fn verify(
    State(state): State<LicenseState>,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<VerifyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = state.otp.verify(&body.signature, &body.code).await?;
    let SignedPayload::LicenseVerify {
        email, license_key, ..
    } = payload
    else {
        return Err(ApiError::bad_request("Invalid or expired link"));
    };

    // The vendor goes first so a refused key leaves no account behind
    let existing = state
        .db
        .users()
        .get_by_email(&email)
        .await
        .db_err("Failed to look up user")?;
    let user_uuid = existing
        .map(|user| user.uuid)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let activation = state
        .gateway
        .request_activation(&license_key, &user_uuid)
        .await?;

    let user = state
        .db
        .users()
        .find_or_create_verified(&email, &user_uuid)
        .await
        .db_err("Failed to find or create user")?;
    let license = state.gateway.record(&license_key, &user, activation).await?;

    // Activation changed the tier, so the session is resolved afterwards
    let (snapshot, cookies) =
        start_session(&state.db, &state.jwt, &user, client_ip.as_deref()).await?;

    Ok((
        StatusCode::OK,
        cookies,
        Json(VerifyResponse {
            session: SessionResponse {
                success: true,
                user: snapshot,
            },
            license,
        }),
    ))
}

#[derive(Serialize)]
struct LicensesResponse {
    tier: Tier,
    licenses: Vec<License>,
}

async fn list_licenses(
    State(state): State<LicenseState>,
    auth: Auth,
) -> Result<impl IntoResponse, ApiError> {
    let user = auth
        .user()
        .load_user(&state.db)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;

    let tier = effective_tier(&state.db, user.id, unix_now())
        .await
        .db_err("Failed to resolve tier")?;
    let licenses = state
        .db
        .licenses()
        .list_for_user(user.id)
        .await
        .db_err("Failed to list licenses")?;

    Ok(Json(LicensesResponse { tier, licenses }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("alice@example.com"), "a***@example.com");
        assert_eq!(mask_email("broken"), "***");
    }
}
