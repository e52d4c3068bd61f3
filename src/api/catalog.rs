//! Public catalog endpoints.
//!
//! - GET `/assets` - One page across every content type
//! - GET `/{type}` - One page of a single content type
//! - GET `/{type}/{slug}` - A single item
//!
//! Browsing needs no session. When one is present, items above the viewer's
//! tier come back locked and without their asset URL.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;

use super::error::{ApiError, ResultExt};
use crate::auth::OptionalAuth;
use crate::catalog::{self, CatalogFilters, ContentType, SortOrder};
use crate::db::{Database, Tier};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;

#[derive(Clone)]
pub struct CatalogState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
}

impl_has_auth_backend!(CatalogState);

pub fn router(state: CatalogState) -> Router {
    Router::new()
        .route("/assets", get(list_assets))
        .route("/{content_type}", get(list_by_type))
        .route("/{content_type}/{slug}", get(get_item))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct CatalogQuery {
    category: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
    /// Comma separated, e.g. `pro,pro_plus`.
    tiers: Option<String>,
    tool: Option<String>,
    #[serde(default)]
    sort: SortOrder,
    q: Option<String>,
}

impl CatalogQuery {
    fn into_filters(self) -> Result<CatalogFilters, ApiError> {
        let tiers = parse_tiers(self.tiers.as_deref())?;
        Ok(CatalogFilters::new(
            self.category.as_deref(),
            self.limit,
            self.offset,
            tiers,
            self.tool.as_deref(),
            self.sort,
            self.q.as_deref(),
        ))
    }
}

fn parse_tiers(raw: Option<&str>) -> Result<Vec<Tier>, ApiError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Tier::from_str(s).ok_or_else(|| ApiError::bad_request(format!("Unknown tier: {}", s))))
        .collect()
}

fn parse_content_type(raw: &str) -> Result<ContentType, ApiError> {
    ContentType::from_str(raw).ok_or_else(|| ApiError::not_found("Unknown content type"))
}

fn viewer_tier(auth: &OptionalAuth) -> Tier {
    auth.0.as_ref().map(|u| u.tier()).unwrap_or(Tier::Free)
}

async fn list_assets(
    State(state): State<CatalogState>,
    auth: OptionalAuth,
    Query(query): Query<CatalogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = query.into_filters()?;
    let page = catalog::get_assets_items(&state.db, &filters)
        .await
        .db_err("Failed to list assets")?;
    Ok(Json(page.for_viewer(viewer_tier(&auth))))
}

async fn list_by_type(
    State(state): State<CatalogState>,
    auth: OptionalAuth,
    Path(content_type): Path<String>,
    Query(query): Query<CatalogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = parse_content_type(&content_type)?;
    let filters = query.into_filters()?;
    let page = catalog::fetch_items(&state.db, content_type, &filters)
        .await
        .db_err("Failed to list items")?;
    Ok(Json(page.for_viewer(viewer_tier(&auth))))
}

async fn get_item(
    State(state): State<CatalogState>,
    auth: OptionalAuth,
    Path((content_type, slug)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = parse_content_type(&content_type)?;
    let item = catalog::get_item(&state.db, content_type, &slug)
        .await
        .db_err("Failed to get item")?
        .ok_or_else(|| ApiError::not_found("Item not found"))?;
    Ok(Json(item.for_viewer(viewer_tier(&auth))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tiers() {
        assert_eq!(parse_tiers(None).unwrap(), Vec::<Tier>::new());
        assert_eq!(
            parse_tiers(Some("pro, pro_plus,")).unwrap(),
            vec![Tier::Pro, Tier::ProPlus]
        );
        assert!(parse_tiers(Some("gold")).is_err());
    }
}
