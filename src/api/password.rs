//! Password reset endpoints.
//!
//! - POST `/forgot` - Email a reset link (same answer whether or not the account exists)
//! - POST `/reset` - Set a new password with a reset link's signature

use axum::{
    Json, Router, extract::State, http::StatusCode, middleware, response::IntoResponse,
    routing::post,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use super::error::{ApiError, ResultExt, validate_email};
use crate::db::Database;
use crate::mail::Outbox;
use crate::password::hash_password;
use crate::rate_limit::{IpLimiter, rate_limit};
use crate::signature::{
    RESET_PASSWORD_TTL_SECS, SignatureCodec, SignatureKind, SignatureRejection, SignedPayload,
};

#[derive(Clone)]
pub struct PasswordState {
    pub db: Database,
    pub codec: Arc<SignatureCodec>,
    pub outbox: Outbox,
}

pub fn router(state: PasswordState, forgot_limiter: Arc<IpLimiter>) -> Router {
    Router::new()
        .route(
            "/forgot",
            post(forgot).layer(middleware::from_fn_with_state(forgot_limiter, rate_limit)),
        )
        .route("/reset", post(reset))
        .with_state(state)
}

#[derive(Deserialize)]
struct ForgotRequest {
    email: String,
}

async fn forgot(
    State(state): State<PasswordState>,
    Json(body): Json<ForgotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = validate_email(&body.email)?;

    let user = state
        .db
        .users()
        .get_by_email(&email)
        .await
        .db_err("Failed to look up user")?;

    if let Some(user) = user {
        let signature = state
            .codec
            .issue(
                &SignedPayload::ResetPassword {
                    email: user.email.clone(),
                },
                RESET_PASSWORD_TTL_SECS,
            )
            .map_err(|e| {
                error!("Failed to sign reset link: {}", e);
                ApiError::internal("Failed to create reset link")
            })?;
        state.outbox.send_reset_link(&user.email, &signature).await;
        info!(user = %user.uuid, "Password reset requested");
    }

    Ok((StatusCode::OK, Json(serde_json::json!({ "success": true }))))
}

#[derive(Deserialize)]
struct ResetRequest {
    signature: String,
    password: String,
}

/// Set a new password and end every existing session for the account.
async fn reset(
    State(state): State<PasswordState>,
    Json(body): Json<ResetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = match state
        .codec
        .verify_kind(&body.signature, SignatureKind::ResetPassword)
    {
        Ok(payload) => payload,
        Err(SignatureRejection::Expired(_)) => {
            return Err(ApiError::gone(
                "This link has expired. Please request a new one.",
            ));
        }
        Err(SignatureRejection::Invalid) => {
            return Err(ApiError::bad_request("Invalid or expired link"));
        }
    };

    let user = state
        .db
        .users()
        .get_by_email(payload.email())
        .await
        .db_err("Failed to look up user")?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired link"))?;

    let hash = hash_password(&body.password)?;

    state
        .db
        .users()
        .set_password_hash(user.id, &hash)
        .await
        .db_err("Failed to set password")?;
    state
        .db
        .users()
        .mark_email_verified(user.id)
        .await
        .db_err("Failed to verify email")?;
    let revoked = state
        .db
        .tokens()
        .delete_all_by_user(user.id)
        .await
        .db_err("Failed to revoke sessions")?;

    info!(user = %user.uuid, revoked, "Password reset");

    Ok((StatusCode::OK, Json(serde_json::json!({ "success": true }))))
}
