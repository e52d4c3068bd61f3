//! Invite acceptance.
//!
//! - POST `/accept` - Create the invited account with a password and sign in

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::auth::{SessionResponse, start_session};
use super::error::{ApiError, ResultExt};
use crate::auth::ClientIp;
use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::password::hash_password;
use crate::signature::{SignatureCodec, SignatureKind, SignatureRejection, SignedPayload};

#[derive(Clone)]
pub struct InvitesState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub codec: Arc<SignatureCodec>,
}

pub fn router(state: InvitesState) -> Router {
    Router::new()
        .route("/accept", post(accept))
        .with_state(state)
}

#[derive(Deserialize)]
struct AcceptRequest {
    signature: String,
    password: String,
}

async fn accept(
    State(state): State<InvitesState>,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<AcceptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = match state
        .codec
        .verify_kind(&body.signature, SignatureKind::Invite)
    {
        Ok(payload) => payload,
        Err(SignatureRejection::Expired(_)) => {
            return Err(ApiError::gone(
                "This invite has expired. Please ask for a new one.",
            ));
        }
        Err(SignatureRejection::Invalid) => {
            return Err(ApiError::bad_request("Invalid or expired link"));
        }
    };
    let SignedPayload::Invite { email, role } = payload else {
        return Err(ApiError::bad_request("Invalid or expired link"));
    };

    let existing = state
        .db
        .users()
        .get_by_email(&email)
        .await
        .db_err("Failed to look up user")?;
    if existing.is_some() {
        return Err(ApiError::conflict("This email is already registered"));
    }

    let hash = hash_password(&body.password)?;

    let uuid = uuid::Uuid::new_v4().to_string();
    let id = state
        .db
        .users()
        .create(&uuid, &email, role, Some(&hash), true)
        .await
        .db_err("Failed to create user")?;
    let user = state
        .db
        .users()
        .get_by_id(id)
        .await
        .db_err("Failed to load user")?
        .ok_or_else(|| ApiError::internal("Failed to load user"))?;

    info!(user = %user.uuid, role = role.as_str(), "Invite accepted");

    let (snapshot, cookies) =
        start_session(&state.db, &state.jwt, &user, client_ip.as_deref()).await?;

    Ok((
        StatusCode::OK,
        cookies,
        Json(SessionResponse {
            success: true,
            user: snapshot,
        }),
    ))
}
