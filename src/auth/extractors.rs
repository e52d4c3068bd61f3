//! Axum extractors for authentication.

use std::cell::RefCell;
use std::marker::PhantomData;

use axum::{
    extract::{FromRequestParts, Request},
    http::{HeaderValue, header, request::Parts},
    middleware::Next,
    response::Response,
};

use super::cookie::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, get_cookie, session_cookie};
use super::errors::{ApiAuthError, AuthErrorKind};
use super::ip::extract_client_ip;
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;
use crate::db::UserRole;
use crate::server_config;
use crate::session::{self, SessionSnapshot};

tokio::task_local! {
    /// Task-local storage for the new access token cookie.
    /// Used to pass the cookie from the auth extractor to the response middleware.
    pub static NEW_ACCESS_TOKEN_COOKIE: RefCell<Option<String>>;
}

/// Middleware that runs the request inside the task-local scope and appends
/// any access token minted during authentication to the response.
pub async fn add_access_token_cookie(request: Request, next: Next) -> Response {
    let (mut response, cookie) = NEW_ACCESS_TOKEN_COOKIE
        .scope(RefCell::new(None), async move {
            let response = next.run(request).await;
            let cookie = NEW_ACCESS_TOKEN_COOKIE.with(|cell| cell.borrow_mut().take());
            (response, cookie)
        })
        .await;

    if let Some(cookie) = cookie {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    response
}

/// Core authentication logic shared by the extractors and the page policy.
///
/// A valid access token is trusted as is. Otherwise the refresh token must be
/// valid and not revoked; role and tier are then re-derived and a new access
/// token is queued for the response. Storage failures along the way keep the
/// session alive on the refresh token's own claims.
pub(crate) async fn authenticate_request<S>(
    parts: &Parts,
    state: &S,
) -> Result<AuthenticatedUser, AuthErrorKind>
where
    S: HasAuthBackend + Send + Sync,
{
    // Try to validate access token first
    if let Some(access_token) = get_cookie(&parts.headers, ACCESS_COOKIE_NAME) {
        if let Ok(claims) = state.jwt().validate_access_token(access_token) {
            return Ok(AuthenticatedUser {
                claims,
                user_id: None,
            });
        }
    }

    // Access token missing or invalid - try refresh token
    let refresh_token =
        get_cookie(&parts.headers, REFRESH_COOKIE_NAME).ok_or(AuthErrorKind::NotAuthenticated)?;

    let refresh_claims = state
        .jwt()
        .validate_refresh_token(refresh_token)
        .map_err(|_| AuthErrorKind::InvalidToken)?;

    // A revoked token ends the session. If the lookup itself fails the
    // session continues on the values the refresh token carries.
    let active_token = match state.db().tokens().get_by_jti(&refresh_claims.jti).await {
        Ok(Some(token)) => Some(token),
        Ok(None) => return Err(AuthErrorKind::TokenRevoked),
        Err(e) => {
            tracing::warn!(
                user = %refresh_claims.sub,
                error = %e,
                "Refresh token lookup failed, keeping session"
            );
            None
        }
    };

    let previous = SessionSnapshot::from_refresh_claims(&refresh_claims);
    let snapshot = session::resolve(state.db(), &previous)
        .await
        .ok_or(AuthErrorKind::UserNotFound)?;

    // Track the last IP a session was seen from, if one can be determined
    if let Some(token) = &active_token {
        if let Ok(client_ip) = extract_client_ip(parts, server_config::ip_extractor().as_ref()) {
            if token.last_ip.as_ref() != Some(&client_ip) {
                if let Err(e) = state
                    .db()
                    .tokens()
                    .update_ip(&refresh_claims.jti, &client_ip)
                    .await
                {
                    tracing::warn!("Failed to update token IP: {}", e);
                }
            }
        }
    }

    let access_result = state.jwt().generate_access_token(&snapshot).map_err(|e| {
        tracing::error!("Failed to generate access token: {}", e);
        AuthErrorKind::DatabaseError
    })?;

    // Store the new access token cookie in task-local for the response middleware
    let new_cookie = session_cookie(
        ACCESS_COOKIE_NAME,
        &access_result.token,
        access_result.duration,
    );
    let _ = NEW_ACCESS_TOKEN_COOKIE.try_with(|cell| {
        cell.borrow_mut().replace(new_cookie);
    });

    tracing::debug!(user = %snapshot.user_uuid, tier = snapshot.tier.as_str(), "Access token renewed");

    Ok(AuthenticatedUser {
        claims: access_result.claims,
        user_id: active_token.map(|token| token.user_id),
    })
}

// =============================================================================
// Role constraints
// =============================================================================

/// Which roles an [`Auth`] extractor admits.
pub trait RoleConstraint {
    fn allows(role: UserRole) -> bool;
}

/// Any signed-in user.
pub struct AnyRole;

impl RoleConstraint for AnyRole {
    fn allows(_role: UserRole) -> bool {
        true
    }
}

/// Admins and superadmins.
pub struct StaffOnly;

impl RoleConstraint for StaffOnly {
    fn allows(role: UserRole) -> bool {
        role.is_staff()
    }
}

pub struct SuperadminOnly;

impl RoleConstraint for SuperadminOnly {
    fn allows(role: UserRole) -> bool {
        role == UserRole::Superadmin
    }
}

// =============================================================================
// API Extractors
// =============================================================================

/// Extractor for API endpoints that require authentication with a role.
/// Validates the access token and refreshes it from the refresh token when
/// needed. Returns JSON errors instead of redirects.
pub struct Auth<R: RoleConstraint = AnyRole>(pub AuthenticatedUser, PhantomData<R>);

impl<R: RoleConstraint> Auth<R> {
    pub fn user(&self) -> &AuthenticatedUser {
        &self.0
    }
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: HasAuthBackend + Send + Sync,
    R: RoleConstraint + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = authenticate_request(parts, state)
            .await
            .map_err(ApiAuthError::from)?;

        if !R::allows(user.role()) {
            return Err(ApiAuthError::new(AuthErrorKind::InsufficientRole));
        }

        Ok(Auth(user, PhantomData))
    }
}

/// Optional authentication extractor - never fails, returns Option<AuthenticatedUser>.
/// Useful for endpoints that work both authenticated and unauthenticated.
pub struct OptionalAuth(pub Option<AuthenticatedUser>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(authenticate_request(parts, state).await.ok()))
    }
}
