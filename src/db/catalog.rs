//! Catalog authoring: authors, categories and items.
//!
//! Listing queries live in `crate::catalog`; this store only writes rows and
//! resolves categories.

use serde::Serialize;
use sqlx::sqlite::SqlitePool;

use super::license::Tier;
use crate::catalog::ContentType;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub content_type: String,
    pub parent_id: Option<i64>,
}

/// A new catalog item. `tool` lands in `gradient_type` for gradients, and
/// `published` is ignored for types without a publish status.
#[derive(Debug, Clone)]
pub struct NewCatalogItem<'a> {
    pub slug: &'a str,
    pub title: &'a str,
    pub author_id: Option<i64>,
    pub category_id: Option<i64>,
    pub tier: Tier,
    pub published: bool,
    pub tool: &'a str,
    pub asset_url: &'a str,
    pub popularity: i64,
    pub created_at: i64,
}

#[derive(Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_author(&self, name: &str) -> Result<i64, sqlx::Error> {
        let result = sqlx::query("INSERT INTO authors (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_category(
        &self,
        content_type: ContentType,
        slug: &str,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO categories (slug, name, content_type, parent_id) VALUES (?, ?, ?, ?)",
        )
        .bind(slug)
        .bind(name)
        .bind(content_type.as_str())
        .bind(parent_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn category_by_slug(
        &self,
        content_type: ContentType,
        slug: &str,
    ) -> Result<Option<Category>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, slug, name, content_type, parent_id FROM categories
             WHERE content_type = ? AND slug = ?",
        )
        .bind(content_type.as_str())
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
    }

    /// Ids of the direct children of a category.
    pub async fn child_category_ids(&self, parent_id: i64) -> Result<Vec<i64>, sqlx::Error> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT id FROM categories WHERE parent_id = ? ORDER BY id")
                .bind(parent_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    pub async fn list_categories(
        &self,
        content_type: ContentType,
    ) -> Result<Vec<Category>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, slug, name, content_type, parent_id FROM categories
             WHERE content_type = ? ORDER BY name, id",
        )
        .bind(content_type.as_str())
        .fetch_all(&self.pool)
        .await
    }

    pub async fn insert_item(
        &self,
        content_type: ContentType,
        item: &NewCatalogItem<'_>,
    ) -> Result<i64, sqlx::Error> {
        let table = content_type.table();
        let tool_column = content_type.tool_column();
        let counter_column = content_type.popularity_column();

        let result = if content_type.has_status() {
            let status = if item.published { "published" } else { "draft" };
            sqlx::query(&format!(
                "INSERT INTO {table}
                 (slug, title, author_id, category_id, tier, status, {tool_column}, asset_url, {counter_column}, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(item.slug)
            .bind(item.title)
            .bind(item.author_id)
            .bind(item.category_id)
            .bind(item.tier.as_str())
            .bind(status)
            .bind(item.tool)
            .bind(item.asset_url)
            .bind(item.popularity)
            .bind(item.created_at)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "INSERT INTO {table}
                 (slug, title, author_id, category_id, tier, {tool_column}, asset_url, {counter_column}, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(item.slug)
            .bind(item.title)
            .bind(item.author_id)
            .bind(item.category_id)
            .bind(item.tier.as_str())
            .bind(item.tool)
            .bind(item.asset_url)
            .bind(item.popularity)
            .bind(item.created_at)
            .execute(&self.pool)
            .await?
        };

        Ok(result.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_categories_are_scoped_by_content_type() {
        let db = Database::open(":memory:").await.unwrap();
        let catalog = db.catalog();

        let landing = catalog
            .insert_category(ContentType::Templates, "landing", "Landing", None)
            .await
            .unwrap();
        catalog
            .insert_category(ContentType::Components, "landing", "Landing", None)
            .await
            .unwrap();
        let saas = catalog
            .insert_category(ContentType::Templates, "saas", "SaaS", Some(landing))
            .await
            .unwrap();

        let found = catalog
            .category_by_slug(ContentType::Templates, "landing")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, landing);
        assert_eq!(catalog.child_category_ids(landing).await.unwrap(), vec![saas]);
        assert!(
            catalog
                .category_by_slug(ContentType::Designs, "landing")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            catalog
                .list_categories(ContentType::Templates)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_duplicate_category_slug_fails() {
        let db = Database::open(":memory:").await.unwrap();
        let catalog = db.catalog();
        catalog
            .insert_category(ContentType::Designs, "icons", "Icons", None)
            .await
            .unwrap();
        assert!(
            catalog
                .insert_category(ContentType::Designs, "icons", "Icons 2", None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_insert_item_for_every_type() {
        let db = Database::open(":memory:").await.unwrap();
        let author = db.catalog().insert_author("Ada").await.unwrap();

        for content_type in ContentType::ALL {
            let id = db
                .catalog()
                .insert_item(
                    content_type,
                    &NewCatalogItem {
                        slug: "first",
                        title: "First",
                        author_id: Some(author),
                        category_id: None,
                        tier: Tier::Free,
                        published: true,
                        tool: "figma",
                        asset_url: "https://cdn.example.com/first.zip",
                        popularity: 3,
                        created_at: 1_700_000_000,
                    },
                )
                .await
                .unwrap();
            assert_eq!(id, 1);
        }
    }
}
