//! Page routes.
//!
//! Each page answers with the JSON context its view renders from. Every
//! route sits behind [`access_policy`], so handlers only run once the
//! policy has allowed the request, and flow pages only with a verified link.

use axum::{
    Extension, Json, Router,
    extract::{OriginalUri, Query},
    middleware,
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedUser;
use crate::db::{Tier, UserRole};
use crate::policy::{PolicyState, VerifiedSignature, access_policy};
use crate::signature::SignedPayload;

pub fn router(state: PolicyState) -> Router {
    Router::new()
        .route("/sign-in", get(page))
        .route("/admin/login", get(page))
        .route("/license", get(page))
        .route("/forgot-password", get(page))
        .route("/license-verify", get(flow_page))
        .route("/invite", get(flow_page))
        .route("/reset-password", get(flow_page))
        .route("/dashboard", get(page))
        .route("/trial", get(page))
        .route("/account", get(page))
        .route("/admin", get(page))
        .route("/admin/{*path}", get(page))
        .layer(middleware::from_fn_with_state(state, access_policy))
}

#[derive(Deserialize)]
struct PageQuery {
    error: Option<String>,
    #[serde(rename = "callbackUrl")]
    callback_url: Option<String>,
    signature: Option<String>,
}

#[derive(Serialize)]
struct Viewer {
    user_uuid: String,
    email: String,
    role: UserRole,
    tier: Tier,
}

impl From<&AuthenticatedUser> for Viewer {
    fn from(user: &AuthenticatedUser) -> Self {
        Self {
            user_uuid: user.claims.sub.clone(),
            email: user.claims.email.clone(),
            role: user.role(),
            tier: user.tier(),
        }
    }
}

/// What a flow link was issued for.
#[derive(Serialize)]
struct FlowContext {
    kind: &'static str,
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<UserRole>,
    /// Echoed back so the form can submit it.
    signature: String,
}

#[derive(Serialize)]
struct PageContext {
    page: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<Viewer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(rename = "callbackUrl", skip_serializing_if = "Option::is_none")]
    callback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flow: Option<FlowContext>,
}

/// Only same-site paths are accepted as a post sign-in target.
fn safe_callback(callback: Option<String>) -> Option<String> {
    callback.filter(|c| c.starts_with('/') && !c.starts_with("//"))
}

async fn page(
    OriginalUri(uri): OriginalUri,
    user: Option<Extension<AuthenticatedUser>>,
    Query(query): Query<PageQuery>,
) -> Json<PageContext> {
    Json(PageContext {
        page: uri.path().to_string(),
        user: user.as_ref().map(|Extension(u)| Viewer::from(u)),
        error: query.error,
        callback_url: safe_callback(query.callback_url),
        flow: None,
    })
}

async fn flow_page(
    OriginalUri(uri): OriginalUri,
    user: Option<Extension<AuthenticatedUser>>,
    Extension(VerifiedSignature(payload)): Extension<VerifiedSignature>,
    Query(query): Query<PageQuery>,
) -> Json<PageContext> {
    let role = match &payload {
        SignedPayload::Invite { role, .. } => Some(*role),
        _ => None,
    };
    let flow = FlowContext {
        kind: payload.kind().as_str(),
        email: payload.email().to_string(),
        role,
        signature: query.signature.unwrap_or_default(),
    };

    Json(PageContext {
        page: uri.path().to_string(),
        user: user.as_ref().map(|Extension(u)| Viewer::from(u)),
        error: query.error,
        callback_url: None,
        flow: Some(flow),
    })
}
