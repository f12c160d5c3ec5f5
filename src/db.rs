use sqlx::{postgres::PgPoolOptions, PgPool};

/// Idempotent DDL for the durable cache layer.
///
/// Every table carries `expires_at`; readers always filter on it.
pub const SCHEMA: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS lead_api",
    r#"CREATE TABLE IF NOT EXISTS lead_api.searches (
        id UUID PRIMARY KEY,
        cache_key TEXT NOT NULL,
        query TEXT NOT NULL,
        location TEXT NOT NULL,
        enrich_cnpj BOOLEAN NOT NULL,
        enrich_instagram BOOLEAN NOT NULL,
        total INTEGER NOT NULL,
        discarded INTEGER NOT NULL,
        duration_ms BIGINT NOT NULL,
        category_codes TEXT[] NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        expires_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS searches_lookup_idx
        ON lead_api.searches (cache_key, created_at DESC)"#,
    r#"CREATE TABLE IF NOT EXISTS lead_api.results (
        id BIGSERIAL PRIMARY KEY,
        search_id UUID NOT NULL REFERENCES lead_api.searches(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        lead JSONB NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS results_search_idx ON lead_api.results (search_id, position)",
    r#"CREATE TABLE IF NOT EXISTS lead_api.enrichments (
        key TEXT PRIMARY KEY,
        data JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        expires_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS lead_api.category_hints (
        key TEXT PRIMARY KEY,
        query TEXT NOT NULL,
        codes TEXT[] NOT NULL,
        snippet TEXT NOT NULL DEFAULT '',
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        expires_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS lead_api.category_codes (
        code TEXT PRIMARY KEY,
        description TEXT NOT NULL
    )"#,
];

/// Store-side removal of expired rows. Results go with their search via cascade.
pub const PURGE_EXPIRED: &[&str] = &[
    "DELETE FROM lead_api.searches WHERE expires_at <= now()",
    "DELETE FROM lead_api.results WHERE expires_at <= now()",
    "DELETE FROM lead_api.enrichments WHERE expires_at <= now()",
    "DELETE FROM lead_api.category_hints WHERE expires_at <= now()",
];

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates the schema if missing. Safe to run on every start.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Durable store schema ready");
        Ok(())
    }

    /// Deletes expired rows and returns how many were removed.
    pub async fn purge_expired(&self) -> anyhow::Result<u64> {
        let mut removed = 0;
        for statement in PURGE_EXPIRED {
            removed += sqlx::query(statement)
                .execute(&self.pool)
                .await?
                .rows_affected();
        }
        Ok(removed)
    }
}
