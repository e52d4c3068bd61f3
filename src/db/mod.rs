mod catalog;
mod license;
mod otp;
mod token;
mod user;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use catalog::{CatalogStore, Category, NewCatalogItem};
pub use license::{
    License, LicenseStatus, LicenseStore, LicenseUpsert, NewTransaction, PlanType, Tier,
    TransactionStore,
};
pub use otp::{OtpAttemptStore, OtpStore};
pub use token::{RefreshToken, TokenStore};
pub use user::{User, UserRole, UserStore, UserSummary};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        if version < 2 {
            self.migrate_v2().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Accounts, sessions, one-time codes and licenses.
    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT UNIQUE NOT NULL,
                    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    name TEXT,
                    password_hash TEXT,
                    role TEXT NOT NULL DEFAULT 'user',
                    email_verified INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL DEFAULT (unixepoch())
                )",
                "CREATE INDEX idx_users_uuid ON users(uuid)",
                "CREATE INDEX idx_users_email ON users(email)",
                "CREATE TABLE refresh_tokens (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    jti TEXT UNIQUE NOT NULL,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    last_ip TEXT,
                    issued_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL,
                    created_at INTEGER NOT NULL DEFAULT (unixepoch())
                )",
                "CREATE INDEX idx_refresh_tokens_user_id ON refresh_tokens(user_id)",
                "CREATE INDEX idx_refresh_tokens_expires_at ON refresh_tokens(expires_at)",
                // One live code per identity key; issuing replaces the row.
                "CREATE TABLE otp_codes (
                    identity_key TEXT PRIMARY KEY NOT NULL,
                    code TEXT NOT NULL,
                    expires_at INTEGER NOT NULL
                )",
                "CREATE INDEX idx_otp_codes_expires_at ON otp_codes(expires_at)",
                "CREATE TABLE otp_attempts (
                    identity_key TEXT PRIMARY KEY NOT NULL,
                    session_attempts INTEGER NOT NULL DEFAULT 0,
                    daily_attempts INTEGER NOT NULL DEFAULT 0,
                    day TEXT NOT NULL,
                    cooldown_started_at INTEGER NOT NULL DEFAULT 0,
                    cooldown_secs INTEGER NOT NULL DEFAULT 0,
                    updated_at INTEGER NOT NULL
                )",
                "CREATE TABLE licenses (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    license_key TEXT UNIQUE NOT NULL,
                    status TEXT NOT NULL,
                    tier TEXT NOT NULL,
                    plan_type TEXT NOT NULL,
                    activated_at INTEGER,
                    expires_at INTEGER,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )",
                "CREATE INDEX idx_licenses_user_created ON licenses(user_id, created_at)",
                "CREATE TABLE license_transactions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    license_id INTEGER NOT NULL REFERENCES licenses(id) ON DELETE CASCADE,
                    transaction_type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    amount INTEGER NOT NULL,
                    metadata TEXT NOT NULL DEFAULT '{}',
                    created_at INTEGER NOT NULL DEFAULT (unixepoch())
                )",
                "CREATE INDEX idx_license_transactions_license ON license_transactions(license_id)",
            ],
        )
        .await
    }

    /// Catalog tables. Templates, components and designs carry a publish
    /// status and a tool; gradients have neither and use `gradient_type`.
    async fn migrate_v2(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            2,
            &[
                "CREATE TABLE authors (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL
                )",
                "CREATE TABLE categories (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    slug TEXT NOT NULL,
                    name TEXT NOT NULL,
                    content_type TEXT NOT NULL,
                    parent_id INTEGER REFERENCES categories(id) ON DELETE CASCADE,
                    UNIQUE (content_type, slug)
                )",
                "CREATE INDEX idx_categories_parent ON categories(parent_id)",
                "CREATE TABLE templates (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    slug TEXT UNIQUE NOT NULL,
                    title TEXT NOT NULL,
                    author_id INTEGER REFERENCES authors(id) ON DELETE SET NULL,
                    category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                    tier TEXT NOT NULL DEFAULT 'free',
                    status TEXT NOT NULL DEFAULT 'draft',
                    tool TEXT NOT NULL,
                    asset_url TEXT NOT NULL DEFAULT '',
                    download_count INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL DEFAULT (unixepoch())
                )",
                "CREATE TABLE components (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    slug TEXT UNIQUE NOT NULL,
                    title TEXT NOT NULL,
                    author_id INTEGER REFERENCES authors(id) ON DELETE SET NULL,
                    category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                    tier TEXT NOT NULL DEFAULT 'free',
                    status TEXT NOT NULL DEFAULT 'draft',
                    tool TEXT NOT NULL,
                    asset_url TEXT NOT NULL DEFAULT '',
                    copy_count INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL DEFAULT (unixepoch())
                )",
                "CREATE TABLE designs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    slug TEXT UNIQUE NOT NULL,
                    title TEXT NOT NULL,
                    author_id INTEGER REFERENCES authors(id) ON DELETE SET NULL,
                    category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                    tier TEXT NOT NULL DEFAULT 'free',
                    status TEXT NOT NULL DEFAULT 'draft',
                    tool TEXT NOT NULL,
                    asset_url TEXT NOT NULL DEFAULT '',
                    download_count INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL DEFAULT (unixepoch())
                )",
                "CREATE TABLE gradients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    slug TEXT UNIQUE NOT NULL,
                    title TEXT NOT NULL,
                    author_id INTEGER REFERENCES authors(id) ON DELETE SET NULL,
                    category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                    tier TEXT NOT NULL DEFAULT 'free',
                    gradient_type TEXT NOT NULL,
                    asset_url TEXT NOT NULL DEFAULT '',
                    download_count INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL DEFAULT (unixepoch())
                )",
                "CREATE INDEX idx_templates_category ON templates(category_id)",
                "CREATE INDEX idx_components_category ON components(category_id)",
                "CREATE INDEX idx_designs_category ON designs(category_id)",
                "CREATE INDEX idx_gradients_category ON gradients(category_id)",
            ],
        )
        .await
    }

    /// Get the user store.
    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    /// Get the refresh token store.
    pub fn tokens(&self) -> TokenStore {
        TokenStore::new(self.pool.clone())
    }

    /// Get the one-time code store.
    pub fn otps(&self) -> OtpStore {
        OtpStore::new(self.pool.clone())
    }

    /// Get the one-time code throttle store.
    pub fn otp_attempts(&self) -> OtpAttemptStore {
        OtpAttemptStore::new(self.pool.clone())
    }

    /// Get the license store.
    pub fn licenses(&self) -> LicenseStore {
        LicenseStore::new(self.pool.clone())
    }

    /// Get the license transaction log.
    pub fn transactions(&self) -> TransactionStore {
        TransactionStore::new(self.pool.clone())
    }

    /// Get the catalog store.
    pub fn catalog(&self) -> CatalogStore {
        CatalogStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool. Subsequent queries fail, which tests use to simulate
    /// an unreachable database.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
