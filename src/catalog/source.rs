//! Per-type catalog queries.

use sqlx::QueryBuilder;
use sqlx::sqlite::{Sqlite, SqlitePool};

use super::{CatalogFilters, CatalogItem, CategoryScope, ContentType, SortOrder};
use crate::db::Tier;

/// A listing candidate from the first phase of a cross-type query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub content_type: ContentType,
    pub id: i64,
    pub sort_key: i64,
    pub created_at: i64,
}

#[derive(sqlx::FromRow)]
struct CandidateRow {
    id: i64,
    sort_key: i64,
    created_at: i64,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    slug: String,
    title: String,
    author_name: Option<String>,
    category_slug: Option<String>,
    tier: String,
    tool: String,
    asset_url: String,
    popularity: i64,
    created_at: i64,
}

/// Escape LIKE wildcards so user input matches literally.
fn like_pattern(q: &str) -> String {
    let mut escaped = String::with_capacity(q.len() + 2);
    escaped.push('%');
    for c in q.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Runs catalog queries against one content type's table.
pub struct CatalogSource {
    pool: SqlitePool,
    content_type: ContentType,
}

impl CatalogSource {
    pub fn new(pool: SqlitePool, content_type: ContentType) -> Self {
        Self { pool, content_type }
    }

    /// `SELECT <columns>` over the type's table joined to authors and categories.
    fn select(&self, columns: &str) -> QueryBuilder<'static, Sqlite> {
        let mut query = QueryBuilder::new("SELECT ");
        query.push(columns);
        query.push(format_args!(
            " FROM {} t
             LEFT JOIN authors a ON a.id = t.author_id
             LEFT JOIN categories c ON c.id = t.category_id",
            self.content_type.table()
        ));
        query
    }

    fn detail_columns(&self) -> String {
        format!(
            "t.id, t.slug, t.title, a.name AS author_name, c.slug AS category_slug, t.tier,
             t.{} AS tool, t.asset_url, t.{} AS popularity, t.created_at",
            self.content_type.tool_column(),
            self.content_type.popularity_column()
        )
    }

    fn sort_column(&self, sort: SortOrder) -> String {
        match sort {
            SortOrder::Recent => "t.created_at".to_string(),
            SortOrder::Popular => format!("t.{}", self.content_type.popularity_column()),
        }
    }

    /// Append the WHERE clause for `filters` and `scope`.
    fn push_conditions(
        &self,
        query: &mut QueryBuilder<'static, Sqlite>,
        filters: &CatalogFilters,
        scope: &CategoryScope,
    ) {
        // Published rows only, where the type has a status
        query.push(if self.content_type.has_status() {
            " WHERE t.status = 'published'"
        } else {
            " WHERE 1 = 1"
        });

        if let CategoryScope::Ids(ids) = scope {
            query.push(" AND t.category_id IN (");
            let mut list = query.separated(", ");
            for id in ids {
                list.push_bind(*id);
            }
            list.push_unseparated(")");
        }

        if !filters.tiers.is_empty() {
            query.push(" AND t.tier IN (");
            let mut list = query.separated(", ");
            for tier in &filters.tiers {
                list.push_bind(tier.as_str());
            }
            list.push_unseparated(")");
        }

        if let Some(tool) = &filters.tool {
            query.push(format_args!(" AND t.{} = ", self.content_type.tool_column()));
            query.push_bind(tool.clone());
        }

        if let Some(q) = &filters.q {
            let pattern = like_pattern(q);
            query.push(" AND (LOWER(t.title) LIKE ");
            query.push_bind(pattern.clone());
            query.push(" ESCAPE '\\' OR LOWER(t.slug) LIKE ");
            query.push_bind(pattern.clone());
            query.push(" ESCAPE '\\' OR LOWER(COALESCE(a.name, '')) LIKE ");
            query.push_bind(pattern);
            query.push(" ESCAPE '\\')");
        }
    }

    fn push_order(&self, query: &mut QueryBuilder<'static, Sqlite>, sort: SortOrder) {
        let sort_column = self.sort_column(sort);
        query.push(format_args!(
            " ORDER BY {sort_column} DESC, t.created_at DESC, t.id DESC"
        ));
    }

    fn to_item(&self, row: ItemRow) -> CatalogItem {
        CatalogItem {
            content_type: self.content_type,
            id: row.id,
            slug: row.slug,
            title: row.title,
            author: row.author_name,
            category: row.category_slug,
            tier: Tier::from_str(&row.tier).unwrap_or(Tier::Free),
            tool: row.tool,
            asset_url: Some(row.asset_url),
            popularity: row.popularity,
            created_at: row.created_at,
            locked: false,
        }
    }

    /// First phase of a cross-type listing: ids and sort keys, best first.
    pub async fn list_candidate_ids(
        &self,
        filters: &CatalogFilters,
        scope: &CategoryScope,
        limit: i64,
    ) -> Result<Vec<Candidate>, sqlx::Error> {
        let columns = format!(
            "t.id, {} AS sort_key, t.created_at",
            self.sort_column(filters.sort)
        );
        let mut query = self.select(&columns);
        self.push_conditions(&mut query, filters, scope);
        self.push_order(&mut query, filters.sort);
        query.push(" LIMIT ");
        query.push_bind(limit);

        let rows: Vec<CandidateRow> = query.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|row| Candidate {
                content_type: self.content_type,
                id: row.id,
                sort_key: row.sort_key,
                created_at: row.created_at,
            })
            .collect())
    }

    pub async fn count(
        &self,
        filters: &CatalogFilters,
        scope: &CategoryScope,
    ) -> Result<i64, sqlx::Error> {
        let mut query = self.select("COUNT(*)");
        self.push_conditions(&mut query, filters, scope);

        let (count,): (i64,) = query.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Full rows for the given ids, in no particular order.
    pub async fn fetch_details(&self, ids: &[i64]) -> Result<Vec<CatalogItem>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = self.select(&self.detail_columns());
        query.push(" WHERE t.id IN (");
        let mut list = query.separated(", ");
        for id in ids {
            list.push_bind(*id);
        }
        list.push_unseparated(")");

        let rows: Vec<ItemRow> = query.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|row| self.to_item(row)).collect())
    }

    /// One filtered, sorted page with details.
    pub async fn fetch_page(
        &self,
        filters: &CatalogFilters,
        scope: &CategoryScope,
    ) -> Result<Vec<CatalogItem>, sqlx::Error> {
        let mut query = self.select(&self.detail_columns());
        self.push_conditions(&mut query, filters, scope);
        self.push_order(&mut query, filters.sort);
        query.push(" LIMIT ");
        query.push_bind(filters.limit as i64);
        query.push(" OFFSET ");
        query.push_bind(filters.offset as i64);

        let rows: Vec<ItemRow> = query.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|row| self.to_item(row)).collect())
    }

    pub async fn fetch_by_slug(&self, slug: &str) -> Result<Option<CatalogItem>, sqlx::Error> {
        let mut query = self.select(&self.detail_columns());
        query.push(" WHERE t.slug = ");
        query.push_bind(slug.to_string());
        if self.content_type.has_status() {
            query.push(" AND t.status = 'published'");
        }

        let row: Option<ItemRow> = query.build_query_as().fetch_optional(&self.pool).await?;
        Ok(row.map(|row| self.to_item(row)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewCatalogItem};

    async fn seed(db: &Database) {
        let ada = db.catalog().insert_author("Ada Lovelace").await.unwrap();
        let items = [
            ("hero-section", Tier::Free, true, "figma", 5),
            ("pricing_table", Tier::Pro, true, "framer", 50),
            ("secret-draft", Tier::Free, false, "figma", 500),
            ("footer", Tier::ProPlus, true, "figma", 1),
        ];
        for (i, (slug, tier, published, tool, popularity)) in items.into_iter().enumerate() {
            db.catalog()
                .insert_item(
                    ContentType::Components,
                    &NewCatalogItem {
                        slug,
                        title: slug,
                        author_id: if slug == "footer" { Some(ada) } else { None },
                        category_id: None,
                        tier,
                        published,
                        tool,
                        asset_url: "https://cdn.example.com/x.zip",
                        popularity,
                        created_at: 1_000 + i as i64,
                    },
                )
                .await
                .unwrap();
        }
    }

    fn source(db: &Database) -> CatalogSource {
        CatalogSource::new(db.pool().clone(), ContentType::Components)
    }

    fn slugs(items: &[CatalogItem]) -> Vec<&str> {
        items.iter().map(|i| i.slug.as_str()).collect()
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("Hero"), "%hero%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[tokio::test]
    async fn test_drafts_are_hidden() {
        let db = Database::open(":memory:").await.unwrap();
        seed(&db).await;

        let filters = CatalogFilters::default();
        let items = source(&db)
            .fetch_page(&filters, &CategoryScope::All)
            .await
            .unwrap();
        assert_eq!(slugs(&items), vec!["footer", "pricing_table", "hero-section"]);
        assert_eq!(source(&db).count(&filters, &CategoryScope::All).await.unwrap(), 3);
        assert!(source(&db).fetch_by_slug("secret-draft").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_filters_combine() {
        let db = Database::open(":memory:").await.unwrap();
        seed(&db).await;

        let filters = CatalogFilters {
            tiers: vec![Tier::Free, Tier::ProPlus],
            tool: Some("figma".into()),
            sort: SortOrder::Popular,
            ..CatalogFilters::default()
        };
        let items = source(&db)
            .fetch_page(&filters, &CategoryScope::All)
            .await
            .unwrap();
        assert_eq!(slugs(&items), vec!["hero-section", "footer"]);
    }

    #[tokio::test]
    async fn test_search_matches_title_slug_and_author() {
        let db = Database::open(":memory:").await.unwrap();
        seed(&db).await;

        let by_author = CatalogFilters {
            q: Some("LOVELACE".into()),
            ..CatalogFilters::default()
        };
        let items = source(&db)
            .fetch_page(&by_author, &CategoryScope::All)
            .await
            .unwrap();
        assert_eq!(slugs(&items), vec!["footer"]);
        assert_eq!(items[0].author.as_deref(), Some("Ada Lovelace"));

        // Underscore is literal, so "o_s" does not match "hero-section".
        let literal = CatalogFilters {
            q: Some("o_s".into()),
            ..CatalogFilters::default()
        };
        assert!(
            source(&db)
                .fetch_page(&literal, &CategoryScope::All)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_candidates_are_limited_and_sorted() {
        let db = Database::open(":memory:").await.unwrap();
        seed(&db).await;

        let filters = CatalogFilters {
            sort: SortOrder::Popular,
            ..CatalogFilters::default()
        };
        let candidates = source(&db)
            .list_candidate_ids(&filters, &CategoryScope::All, 2)
            .await
            .unwrap();
        let keys: Vec<i64> = candidates.iter().map(|c| c.sort_key).collect();
        assert_eq!(keys, vec![50, 5]);
    }

    #[tokio::test]
    async fn test_every_filter_binds_together() {
        let db = Database::open(":memory:").await.unwrap();
        seed(&db).await;
        let navigation = db
            .catalog()
            .insert_category(ContentType::Components, "navigation", "Navigation", None)
            .await
            .unwrap();
        for (slug, tier) in [("nav-free", Tier::Free), ("nav-pro", Tier::Pro), ("nav-plus", Tier::ProPlus)] {
            db.catalog()
                .insert_item(
                    ContentType::Components,
                    &NewCatalogItem {
                        slug,
                        title: slug,
                        author_id: None,
                        category_id: Some(navigation),
                        tier,
                        published: true,
                        tool: "figma",
                        asset_url: "https://cdn.example.com/nav.zip",
                        popularity: 0,
                        created_at: 2_000,
                    },
                )
                .await
                .unwrap();
        }

        let filters = CatalogFilters {
            tiers: vec![Tier::Pro, Tier::ProPlus],
            tool: Some("figma".into()),
            q: Some("NAV-P".into()),
            ..CatalogFilters::default()
        };
        let scope = CategoryScope::Ids(vec![navigation, 999]);

        assert_eq!(source(&db).count(&filters, &scope).await.unwrap(), 2);
        let candidates = source(&db)
            .list_candidate_ids(&filters, &scope, 10)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 2);
        let mut items = source(&db).fetch_page(&filters, &scope).await.unwrap();
        items.sort_by(|a, b| a.slug.cmp(&b.slug));
        assert_eq!(slugs(&items), vec!["nav-plus", "nav-pro"]);
        assert_eq!(items[0].category.as_deref(), Some("navigation"));
    }

    #[tokio::test]
    async fn test_fetch_details_only_requested_ids() {
        let db = Database::open(":memory:").await.unwrap();
        seed(&db).await;

        let items = source(&db).fetch_details(&[2]).await.unwrap();
        assert_eq!(slugs(&items), vec!["pricing_table"]);
        assert!(source(&db).fetch_details(&[]).await.unwrap().is_empty());
    }
}
