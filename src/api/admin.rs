//! Admin API endpoints.
//!
//! - GET `/users` - List all users (staff)
//! - POST `/invites` - Invite a user; inviting staff needs superadmin
//! - POST `/categories` - Create a catalog category (staff)
//! - POST `/catalog/{type}` - Create a catalog item (staff)

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use super::error::{ApiError, ResultExt, validate_email};
use crate::auth::{Auth, StaffOnly};
use crate::catalog::ContentType;
use crate::db::{Database, NewCatalogItem, Tier, UserRole};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::mail::Outbox;
use crate::signature::{INVITE_TTL_SECS, SignatureCodec, SignedPayload};
use crate::time::unix_now;

#[derive(Clone)]
pub struct AdminState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub codec: Arc<SignatureCodec>,
    pub outbox: Outbox,
}

impl_has_auth_backend!(AdminState);

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route("/invites", post(create_invite))
        .route("/categories", post(create_category))
        .route("/catalog/{content_type}", post(create_item))
        .with_state(state)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|d| d.is_unique_violation())
}

async fn list_users(
    State(state): State<AdminState>,
    _auth: Auth<StaffOnly>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .db
        .users()
        .list()
        .await
        .db_err("Failed to list users")?;

    Ok(Json(users))
}

#[derive(Deserialize)]
struct InviteRequest {
    email: String,
    #[serde(default = "default_invite_role")]
    role: UserRole,
}

fn default_invite_role() -> UserRole {
    UserRole::User
}

#[derive(Serialize)]
struct InviteResponse {
    success: bool,
    email: String,
    role: UserRole,
}

/// Invite someone by email. Only a superadmin may hand out staff roles.
async fn create_invite(
    State(state): State<AdminState>,
    auth: Auth<StaffOnly>,
    Json(body): Json<InviteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.role.is_staff() && auth.user().role() != UserRole::Superadmin {
        return Err(ApiError::forbidden("Only a superadmin can invite admins"));
    }

    let email = validate_email(&body.email)?;
    let existing = state
        .db
        .users()
        .get_by_email(&email)
        .await
        .db_err("Failed to look up user")?;
    if existing.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let signature = state
        .codec
        .issue(
            &SignedPayload::Invite {
                email: email.clone(),
                role: body.role,
            },
            INVITE_TTL_SECS,
        )
        .map_err(|e| {
            error!("Failed to sign invite: {}", e);
            ApiError::internal("Failed to create invite")
        })?;

    state
        .outbox
        .send_invite(&email, body.role.as_str(), &signature)
        .await;

    info!(invited_by = %auth.user().claims.sub, role = body.role.as_str(), "Invite sent");

    Ok((
        StatusCode::CREATED,
        Json(InviteResponse {
            success: true,
            email,
            role: body.role,
        }),
    ))
}

#[derive(Deserialize)]
struct CategoryRequest {
    content_type: String,
    slug: String,
    name: String,
    parent_slug: Option<String>,
}

#[derive(Serialize)]
struct CreatedResponse {
    id: i64,
}

fn parse_content_type(raw: &str) -> Result<ContentType, ApiError> {
    ContentType::from_str(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown content type: {}", raw)))
}

fn validate_slug(slug: &str) -> Result<(), ApiError> {
    let valid = !slug.is_empty()
        && slug.len() <= 128
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid {
        return Err(ApiError::bad_request(
            "Slug must be lowercase letters, digits, '-' or '_'",
        ));
    }
    if slug == "all" {
        return Err(ApiError::bad_request("Slug 'all' is reserved"));
    }
    Ok(())
}

async fn create_category(
    State(state): State<AdminState>,
    _auth: Auth<StaffOnly>,
    Json(body): Json<CategoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = parse_content_type(&body.content_type)?;
    validate_slug(&body.slug)?;
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }

    let catalog = state.db.catalog();

    let parent_id = match body.parent_slug.as_deref() {
        Some(parent_slug) => Some(
            catalog
                .category_by_slug(content_type, parent_slug)
                .await
                .db_err("Failed to look up parent category")?
                .ok_or_else(|| ApiError::not_found("Parent category not found"))?
                .id,
        ),
        None => None,
    };

    let id = catalog
        .insert_category(content_type, &body.slug, name, parent_id)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::conflict("Category already exists")
            } else {
                ApiError::db_error("Failed to create category", e)
            }
        })?;

    info!(content_type = content_type.as_str(), slug = %body.slug, "Category created");

    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

#[derive(Deserialize)]
struct ItemRequest {
    slug: String,
    title: String,
    author: Option<String>,
    category: Option<String>,
    tier: Tier,
    #[serde(default = "default_published")]
    published: bool,
    #[serde(default)]
    tool: String,
    asset_url: String,
    #[serde(default)]
    popularity: i64,
}

fn default_published() -> bool {
    true
}

async fn create_item(
    State(state): State<AdminState>,
    _auth: Auth<StaffOnly>,
    Path(content_type): Path<String>,
    Json(body): Json<ItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = parse_content_type(&content_type)?;
    validate_slug(&body.slug)?;
    if body.title.trim().is_empty() {
        return Err(ApiError::bad_request("Title is required"));
    }

    let catalog = state.db.catalog();

    let category_id = match body.category.as_deref() {
        Some(slug) => Some(
            catalog
                .category_by_slug(content_type, slug)
                .await
                .db_err("Failed to look up category")?
                .ok_or_else(|| ApiError::not_found("Category not found"))?
                .id,
        ),
        None => None,
    };

    let author_id = match body.author.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Some(
            catalog
                .insert_author(name)
                .await
                .db_err("Failed to create author")?,
        ),
        _ => None,
    };

    let id = catalog
        .insert_item(
            content_type,
            &NewCatalogItem {
                slug: &body.slug,
                title: body.title.trim(),
                author_id,
                category_id,
                tier: body.tier,
                published: body.published,
                tool: &body.tool,
                asset_url: &body.asset_url,
                popularity: body.popularity,
                created_at: unix_now(),
            },
        )
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::conflict("An item with this slug already exists")
            } else {
                ApiError::db_error("Failed to create item", e)
            }
        })?;

    info!(content_type = content_type.as_str(), slug = %body.slug, tier = body.tier.as_str(), "Catalog item created");

    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("hero-section_2").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("Hero").is_err());
        assert!(validate_slug("a b").is_err());
        assert!(validate_slug("all").is_err());
    }
}
