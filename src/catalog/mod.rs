//! Public asset catalog: filtered, paginated listings across content types.
//!
//! Each content type lives in its own table with slightly different columns.
//! [`ContentType`] is the closed set of types and carries the per-table column
//! names; [`source::CatalogSource`] runs the queries for one type. The
//! cross-type listing is a two-phase query: every type returns at most
//! `offset + limit` `(id, sort_key)` candidates, those are merged in memory,
//! and details are fetched only for the ids inside the requested window.

mod source;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

pub use source::{CatalogSource, Candidate};

use crate::db::{Database, Tier};

pub const DEFAULT_PAGE_SIZE: u32 = 12;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Templates,
    Components,
    Designs,
    Gradients,
}

impl ContentType {
    pub const ALL: [ContentType; 4] = [
        ContentType::Templates,
        ContentType::Components,
        ContentType::Designs,
        ContentType::Gradients,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Templates => "templates",
            ContentType::Components => "components",
            ContentType::Designs => "designs",
            ContentType::Gradients => "gradients",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "templates" => Some(ContentType::Templates),
            "components" => Some(ContentType::Components),
            "designs" => Some(ContentType::Designs),
            "gradients" => Some(ContentType::Gradients),
            _ => None,
        }
    }

    pub fn table(&self) -> &'static str {
        self.as_str()
    }

    /// Column behind the `popular` sort.
    pub fn popularity_column(&self) -> &'static str {
        match self {
            ContentType::Components => "copy_count",
            ContentType::Templates | ContentType::Designs | ContentType::Gradients => {
                "download_count"
            }
        }
    }

    /// Column behind the `tool` filter.
    pub fn tool_column(&self) -> &'static str {
        match self {
            ContentType::Gradients => "gradient_type",
            ContentType::Templates | ContentType::Components | ContentType::Designs => "tool",
        }
    }

    /// Whether rows carry a draft/published status.
    pub fn has_status(&self) -> bool {
        match self {
            ContentType::Gradients => false,
            ContentType::Templates | ContentType::Components | ContentType::Designs => true,
        }
    }

    fn rank(&self) -> usize {
        match self {
            ContentType::Templates => 0,
            ContentType::Components => 1,
            ContentType::Designs => 2,
            ContentType::Gradients => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Recent,
    Popular,
}

/// Listing filters after validation.
#[derive(Debug, Clone)]
pub struct CatalogFilters {
    /// Category slug. `None` lists every category.
    pub category: Option<String>,
    pub limit: u32,
    pub offset: u32,
    /// Empty means any tier.
    pub tiers: Vec<Tier>,
    pub tool: Option<String>,
    pub sort: SortOrder,
    /// Case-insensitive substring of title, slug or author name.
    pub q: Option<String>,
}

impl Default for CatalogFilters {
    fn default() -> Self {
        Self {
            category: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            tiers: Vec::new(),
            tool: None,
            sort: SortOrder::Recent,
            q: None,
        }
    }
}

impl CatalogFilters {
    /// Normalize raw inputs: `all` and blanks mean no filter, and the page
    /// size is clamped to `1..=MAX_PAGE_SIZE`.
    pub fn new(
        category: Option<&str>,
        limit: Option<u32>,
        offset: Option<u32>,
        tiers: Vec<Tier>,
        tool: Option<&str>,
        sort: SortOrder,
        q: Option<&str>,
    ) -> Self {
        let non_blank = |s: Option<&str>| {
            s.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            category: non_blank(category).filter(|c| c != "all"),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
            tiers,
            tool: non_blank(tool),
            sort,
            q: non_blank(q),
        }
    }
}

/// A catalog item as shown to a viewer.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogItem {
    pub content_type: ContentType,
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub author: Option<String>,
    pub category: Option<String>,
    pub tier: Tier,
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_url: Option<String>,
    pub popularity: i64,
    pub created_at: i64,
    /// The viewer's tier does not cover this item.
    pub locked: bool,
}

impl CatalogItem {
    /// Mark the item for a viewer. Locked items lose their download link.
    pub fn for_viewer(mut self, viewer: Tier) -> Self {
        self.locked = !viewer.grants(self.tier);
        if self.locked {
            self.asset_url = None;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogPage {
    pub items: Vec<CatalogItem>,
    pub total_count: i64,
}

impl CatalogPage {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
        }
    }

    pub fn for_viewer(self, viewer: Tier) -> Self {
        Self {
            items: self
                .items
                .into_iter()
                .map(|item| item.for_viewer(viewer))
                .collect(),
            total_count: self.total_count,
        }
    }
}

/// Category restriction for one content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryScope {
    All,
    /// The category and its direct children. Empty if the slug is unknown.
    Ids(Vec<i64>),
}

impl CategoryScope {
    fn matches_nothing(&self) -> bool {
        matches!(self, CategoryScope::Ids(ids) if ids.is_empty())
    }
}

/// Expand a category slug to itself plus its immediate children.
/// Grandchildren are not included.
pub async fn resolve_category(
    db: &Database,
    content_type: ContentType,
    slug: Option<&str>,
) -> Result<CategoryScope, sqlx::Error> {
    let Some(slug) = slug else {
        return Ok(CategoryScope::All);
    };

    let Some(category) = db.catalog().category_by_slug(content_type, slug).await? else {
        return Ok(CategoryScope::Ids(Vec::new()));
    };

    let mut ids = vec![category.id];
    ids.extend(db.catalog().child_category_ids(category.id).await?);
    Ok(CategoryScope::Ids(ids))
}

/// One page of a single content type.
pub async fn fetch_items(
    db: &Database,
    content_type: ContentType,
    filters: &CatalogFilters,
) -> Result<CatalogPage, sqlx::Error> {
    let scope = resolve_category(db, content_type, filters.category.as_deref()).await?;
    if scope.matches_nothing() {
        return Ok(CatalogPage::empty());
    }

    let source = CatalogSource::new(db.pool().clone(), content_type);
    let items = source.fetch_page(filters, &scope).await?;
    let total_count = source.count(filters, &scope).await?;

    Ok(CatalogPage { items, total_count })
}

/// Order candidates for the merged listing: sort key, then newest, then a
/// fixed type order, then id. Both directions descending except type.
fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.sort_key
        .cmp(&a.sort_key)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.content_type.rank().cmp(&b.content_type.rank()))
        .then_with(|| b.id.cmp(&a.id))
}

/// One page across every content type.
pub async fn get_assets_items(
    db: &Database,
    filters: &CatalogFilters,
) -> Result<CatalogPage, sqlx::Error> {
    let window = filters.offset as i64 + filters.limit as i64;

    let mut candidates = Vec::new();
    let mut total_count = 0;

    for content_type in ContentType::ALL {
        let scope = resolve_category(db, content_type, filters.category.as_deref()).await?;
        if scope.matches_nothing() {
            continue;
        }

        let source = CatalogSource::new(db.pool().clone(), content_type);
        candidates.extend(source.list_candidate_ids(filters, &scope, window).await?);
        total_count += source.count(filters, &scope).await?;
    }

    candidates.sort_by(compare_candidates);
    let page: Vec<Candidate> = candidates
        .into_iter()
        .skip(filters.offset as usize)
        .take(filters.limit as usize)
        .collect();

    let mut ids_by_type: HashMap<ContentType, Vec<i64>> = HashMap::new();
    for candidate in &page {
        ids_by_type
            .entry(candidate.content_type)
            .or_default()
            .push(candidate.id);
    }

    let mut details: HashMap<(ContentType, i64), CatalogItem> = HashMap::new();
    for (content_type, ids) in ids_by_type {
        let source = CatalogSource::new(db.pool().clone(), content_type);
        for item in source.fetch_details(&ids).await? {
            details.insert((content_type, item.id), item);
        }
    }

    // Keep the merged order; a row deleted between the two phases drops out.
    let items = page
        .iter()
        .filter_map(|c| details.remove(&(c.content_type, c.id)))
        .collect();

    Ok(CatalogPage { items, total_count })
}

/// A single published item by slug.
pub async fn get_item(
    db: &Database,
    content_type: ContentType,
    slug: &str,
) -> Result<Option<CatalogItem>, sqlx::Error> {
    CatalogSource::new(db.pool().clone(), content_type)
        .fetch_by_slug(slug)
        .await
}
