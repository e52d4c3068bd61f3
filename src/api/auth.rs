//! Session API endpoints.
//!
//! - POST `/sign-in` - Password sign-in
//! - GET `/session` - Current session, if any
//! - POST `/refresh` - Exchange refresh token for new access token
//! - POST `/logout` - Revoke refresh token and clear cookies
//! - GET `/sessions` - List active sessions for current user
//! - DELETE `/sessions/{jti}` - Revoke a session (own session or staff)

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, StatusCode, header::SET_COOKIE},
    middleware,
    response::{AppendHeaders, IntoResponse},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::error::{ApiError, ResultExt, validate_uuid};
use crate::auth::{
    ACCESS_COOKIE_NAME, Auth, ClientIp, OptionalAuth, REFRESH_COOKIE_NAME, clear_cookie,
    get_cookie, session_cookie,
};
use crate::db::{Database, User};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::password::verify_password;
use crate::rate_limit::{IpLimiter, rate_limit};
use crate::session::{self, SessionSnapshot};
use crate::time::{format_timestamp, unix_now};

#[derive(Clone)]
pub struct AuthApiState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
}

impl_has_auth_backend!(AuthApiState);

pub fn router(state: AuthApiState, sign_in_limiter: Arc<IpLimiter>) -> Router {
    Router::new()
        .route(
            "/sign-in",
            post(sign_in).layer(middleware::from_fn_with_state(sign_in_limiter, rate_limit)),
        )
        .route("/session", get(current_session))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{jti}", delete(revoke_session))
        .with_state(state)
}

pub(super) type SessionCookies = AppendHeaders<[(HeaderName, String); 2]>;

/// Start a session for `user`: resolve role and tier, mint both tokens and
/// record the refresh token.
pub(super) async fn start_session(
    db: &Database,
    jwt: &JwtConfig,
    user: &User,
    client_ip: Option<&str>,
) -> Result<(SessionSnapshot, SessionCookies), ApiError> {
    let snapshot = session::resolve_for_user(db, user, None, unix_now()).await;

    let access = jwt.generate_access_token(&snapshot).map_err(|e| {
        error!("Failed to generate access token: {}", e);
        ApiError::internal("Failed to generate token")
    })?;
    let refresh = jwt.generate_refresh_token(&snapshot).map_err(|e| {
        error!("Failed to generate refresh token: {}", e);
        ApiError::internal("Failed to generate token")
    })?;

    db.tokens()
        .create(
            &refresh.jti,
            user.id,
            client_ip,
            refresh.issued_at as i64,
            refresh.expires_at as i64,
        )
        .await
        .db_err("Failed to store refresh token")?;

    info!(user = %snapshot.user_uuid, role = snapshot.role.as_str(), tier = snapshot.tier.as_str(), "Session started");

    let cookies = AppendHeaders([
        (
            SET_COOKIE,
            session_cookie(ACCESS_COOKIE_NAME, &access.token, access.duration),
        ),
        (
            SET_COOKIE,
            session_cookie(REFRESH_COOKIE_NAME, &refresh.token, refresh.duration),
        ),
    ]);

    Ok((snapshot, cookies))
}

#[derive(Deserialize)]
struct SignInRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
pub(super) struct SessionResponse {
    pub success: bool,
    pub user: SessionSnapshot,
}

/// Password sign-in for accounts that have set a password.
async fn sign_in(
    State(state): State<AuthApiState>,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<SignInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    const INVALID: &str = "Invalid email or password";

    let user = state
        .db
        .users()
        .get_by_email(body.email.trim())
        .await
        .db_err("Failed to look up user")?
        .ok_or_else(|| ApiError::unauthorized(INVALID))?;

    let Some(hash) = user.password_hash.as_deref() else {
        return Err(ApiError::unauthorized(INVALID));
    };

    let matches = verify_password(&body.password, hash).map_err(|e| {
        error!("Failed to verify password: {}", e);
        ApiError::internal("Failed to verify password")
    })?;
    if !matches {
        info!(user = %user.uuid, "Password sign-in failed");
        return Err(ApiError::unauthorized(INVALID));
    }

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

#[derive(Serialize)]
struct CurrentSessionResponse {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<SessionSnapshot>,
}

async fn current_session(OptionalAuth(user): OptionalAuth) -> Json<CurrentSessionResponse> {
    let user = user.map(|u| SessionSnapshot {
        user_uuid: u.claims.sub,
        email: u.claims.email,
        role: u.claims.role,
        tier: u.claims.tier,
        email_verified: u.claims.email_verified,
    });
    Json(CurrentSessionResponse {
        authenticated: user.is_some(),
        user,
    })
}

/// Refresh the access token using a valid refresh token.
/// Role and tier are re-derived. A storage failure keeps the values the
/// refresh token carries; only a revoked token is refused.
async fn refresh(
    State(state): State<AuthApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let refresh_token = get_cookie(&headers, REFRESH_COOKIE_NAME)
        .ok_or_else(|| ApiError::unauthorized("No refresh token"))?;

    let claims = state
        .jwt
        .validate_refresh_token(refresh_token)
        .map_err(|_| ApiError::unauthorized("Invalid or expired refresh token"))?;

    match state.db.tokens().get_by_jti(&claims.jti).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(ApiError::unauthorized("Refresh token has been revoked")),
        Err(e) => warn!(user = %claims.sub, error = %e, "Refresh token lookup failed, keeping session"),
    }

    let previous = SessionSnapshot::from_refresh_claims(&claims);
    let snapshot = session::resolve(&state.db, &previous)
        .await
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;

    let access = state.jwt.generate_access_token(&snapshot).map_err(|e| {
        error!("Failed to generate access token: {}", e);
        ApiError::internal("Failed to generate token")
    })?;

    Ok((
        StatusCode::OK,
        [(
            SET_COOKIE,
            session_cookie(ACCESS_COOKIE_NAME, &access.token, access.duration),
        )],
        Json(SessionResponse {
            success: true,
            user: snapshot,
        }),
    ))
}

/// Logout - revoke refresh token and clear both cookies.
async fn logout(State(state): State<AuthApiState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(refresh_token) = get_cookie(&headers, REFRESH_COOKIE_NAME) {
        if let Ok(claims) = state.jwt.validate_refresh_token(refresh_token) {
            if let Err(e) = state.db.tokens().delete_by_jti(&claims.jti).await {
                error!("Failed to revoke refresh token: {}", e);
            }
        }
    }

    (
        StatusCode::OK,
        AppendHeaders([
            (SET_COOKIE, clear_cookie(ACCESS_COOKIE_NAME)),
            (SET_COOKIE, clear_cookie(REFRESH_COOKIE_NAME)),
        ]),
        Json(serde_json::json!({ "success": true })),
    )
}

#[derive(Serialize)]
struct SessionInfo {
    jti: String,
    last_ip: Option<String>,
    issued_at: String,
    expires_at: String,
    is_current: bool,
}

#[derive(Serialize)]
struct ListSessionsResponse {
    sessions: Vec<SessionInfo>,
}

/// Resolve the database id behind an authenticated request.
async fn user_id(db: &Database, auth: &Auth) -> Result<i64, ApiError> {
    if let Some(id) = auth.user().user_id {
        return Ok(id);
    }
    auth.user()
        .load_user(db)
        .await
        .db_err("Failed to get user")?
        .map(|u| u.id)
        .ok_or_else(|| ApiError::unauthorized("User not found"))
}

/// List all active refresh tokens for the current user.
async fn list_sessions(
    State(state): State<AuthApiState>,
    auth: Auth,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id(&state.db, &auth).await?;

    let current_jti = get_cookie(&headers, REFRESH_COOKIE_NAME)
        .and_then(|token| state.jwt.validate_refresh_token(token).ok())
        .map(|claims| claims.jti);

    let tokens = state
        .db
        .tokens()
        .list_by_user(user_id)
        .await
        .db_err("Failed to list sessions")?;

    let sessions = tokens
        .into_iter()
        .map(|t| SessionInfo {
            is_current: current_jti.as_deref() == Some(t.jti.as_str()),
            jti: t.jti,
            last_ip: t.last_ip,
            issued_at: format_timestamp(t.issued_at),
            expires_at: format_timestamp(t.expires_at),
        })
        .collect();

    Ok(Json(ListSessionsResponse { sessions }))
}

#[derive(Serialize)]
struct RevokeResponse {
    revoked: bool,
}

/// Revoke a specific refresh token by JTI.
/// Users can revoke their own sessions, staff can revoke any.
async fn revoke_session(
    State(state): State<AuthApiState>,
    auth: Auth,
    Path(jti): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_uuid(&jti)?;

    let Some(token) = state
        .db
        .tokens()
        .get_by_jti(&jti)
        .await
        .db_err("Failed to get token")?
    else {
        // Already revoked or never existed
        return Ok(Json(RevokeResponse { revoked: false }));
    };

    let user_id = user_id(&state.db, &auth).await?;
    if token.user_id != user_id && !auth.user().role().is_staff() {
        return Err(ApiError::forbidden("Cannot revoke another user's session"));
    }

    let revoked = state
        .db
        .tokens()
        .delete_by_jti(&jti)
        .await
        .db_err("Failed to revoke session")?;

    Ok(Json(RevokeResponse { revoked }))
}
