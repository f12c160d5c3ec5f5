//! Durable (L2) storage for searches, results, enrichments and category hints.
//!
//! [`PgLeadStore`] is the production store. [`InMemoryLeadStore`] keeps the same
//! expiry semantics in process memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use failsafe::futures::CircuitBreaker as _;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::circuit_breaker::{create_store_circuit_breaker, StoreCircuitBreaker};
use crate::errors::{AppError, ResultExt};
use crate::models::{CategoryHint, EnrichmentRecord, Lead, StoredSearch};

/// Operations the tiered cache and the pipeline need from the durable layer.
///
/// Reads never return expired rows. Writes take the TTL the caller wants applied.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Most recent unexpired search stored under this cache key.
    async fn find_search(&self, cache_key: &str) -> Result<Option<StoredSearch>, AppError>;

    /// Leads saved for a search, in their original order.
    async fn find_results(&self, search_id: Uuid) -> Result<Vec<Lead>, AppError>;

    /// Saves search metadata and its leads together.
    async fn save_search(
        &self,
        search: &StoredSearch,
        leads: &[Lead],
        ttl: Duration,
    ) -> Result<(), AppError>;

    async fn get_enrichment(&self, key: &str) -> Result<Option<EnrichmentRecord>, AppError>;

    async fn save_enrichment(
        &self,
        key: &str,
        record: &EnrichmentRecord,
        ttl: Duration,
    ) -> Result<(), AppError>;

    async fn get_category_hint(&self, key: &str) -> Result<Option<CategoryHint>, AppError>;

    async fn save_category_hint(
        &self,
        key: &str,
        hint: &CategoryHint,
        ttl: Duration,
    ) -> Result<(), AppError>;

    /// Category codes whose reference description mentions any of the keywords.
    async fn reference_codes(&self, keywords: &[String]) -> Result<Vec<String>, AppError>;
}

fn expires_at(ttl: Duration) -> Result<DateTime<Utc>, AppError> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| AppError::InternalError(format!("TTL out of range: {}", e)))?;
    Ok(Utc::now() + ttl)
}

pub struct PgLeadStore {
    pool: PgPool,
    breaker: StoreCircuitBreaker,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            breaker: create_store_circuit_breaker(),
        }
    }

    /// Runs a store call through the circuit breaker.
    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match self.breaker.call(call).await {
            Ok(value) => Ok(value),
            Err(failsafe::Error::Rejected) => Err(AppError::ServiceUnavailable(format!(
                "durable store circuit open ({})",
                operation
            ))),
            Err(failsafe::Error::Inner(e)) => Err(e),
        }
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn find_search(&self, cache_key: &str) -> Result<Option<StoredSearch>, AppError> {
        self.guarded("find_search", async {
            let row = sqlx::query(
                r#"
                SELECT id, cache_key, query, location, enrich_cnpj, enrich_instagram, total,
                       discarded, duration_ms, category_codes, created_at
                FROM lead_api.searches
                WHERE cache_key = $1 AND expires_at > now()
                ORDER BY created_at DESC
                LIMIT 1
                "#,
            )
            .bind(cache_key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up stored search")?;

            let Some(row) = row else {
                return Ok(None);
            };
            Ok(Some(StoredSearch {
                id: row.try_get("id")?,
                cache_key: row.try_get("cache_key")?,
                query: row.try_get("query")?,
                location: row.try_get("location")?,
                enrich_cnpj: row.try_get("enrich_cnpj")?,
                enrich_instagram: row.try_get("enrich_instagram")?,
                total: row.try_get("total")?,
                discarded: row.try_get("discarded")?,
                duration_ms: row.try_get("duration_ms")?,
                category_codes: row.try_get("category_codes")?,
                created_at: row.try_get("created_at")?,
            }))
        })
        .await
    }

    async fn find_results(&self, search_id: Uuid) -> Result<Vec<Lead>, AppError> {
        self.guarded("find_results", async {
            let rows = sqlx::query(
                r#"
                SELECT lead FROM lead_api.results
                WHERE search_id = $1 AND expires_at > now()
                ORDER BY position
                "#,
            )
            .bind(search_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load search results")?;

            rows.iter()
                .map(|row| {
                    row.try_get::<Json<Lead>, _>("lead")
                        .map(|json| json.0)
                        .map_err(AppError::from)
                })
                .collect()
        })
        .await
    }

    async fn save_search(
        &self,
        search: &StoredSearch,
        leads: &[Lead],
        ttl: Duration,
    ) -> Result<(), AppError> {
        let expires = expires_at(ttl)?;
        self.guarded("save_search", async {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO lead_api.searches
                    (id, cache_key, query, location, enrich_cnpj, enrich_instagram, total,
                     discarded, duration_ms, category_codes, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(search.id)
            .bind(&search.cache_key)
            .bind(&search.query)
            .bind(&search.location)
            .bind(search.enrich_cnpj)
            .bind(search.enrich_instagram)
            .bind(search.total)
            .bind(search.discarded)
            .bind(search.duration_ms)
            .bind(&search.category_codes)
            .bind(search.created_at)
            .bind(expires)
            .execute(&mut *tx)
            .await
            .context("Failed to insert search")?;

            for (position, lead) in leads.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO lead_api.results (search_id, position, lead, expires_at)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(search.id)
                .bind(position as i32)
                .bind(Json(lead))
                .bind(expires)
                .execute(&mut *tx)
                .await
                .context("Failed to insert search result")?;
            }

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn get_enrichment(&self, key: &str) -> Result<Option<EnrichmentRecord>, AppError> {
        self.guarded("get_enrichment", async {
            let row = sqlx::query(
                "SELECT data FROM lead_api.enrichments WHERE key = $1 AND expires_at > now()",
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read enrichment")?;

            row.map(|row| {
                row.try_get::<Json<EnrichmentRecord>, _>("data")
                    .map(|json| json.0)
                    .map_err(AppError::from)
            })
            .transpose()
        })
        .await
    }

    async fn save_enrichment(
        &self,
        key: &str,
        record: &EnrichmentRecord,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let expires = expires_at(ttl)?;
        self.guarded("save_enrichment", async {
            sqlx::query(
                r#"
                INSERT INTO lead_api.enrichments (key, data, updated_at, expires_at)
                VALUES ($1, $2, now(), $3)
                ON CONFLICT (key) DO UPDATE
                SET data = EXCLUDED.data, updated_at = now(), expires_at = EXCLUDED.expires_at
                "#,
            )
            .bind(key)
            .bind(Json(record))
            .bind(expires)
            .execute(&self.pool)
            .await
            .context("Failed to upsert enrichment")?;
            Ok(())
        })
        .await
    }

    async fn get_category_hint(&self, key: &str) -> Result<Option<CategoryHint>, AppError> {
        self.guarded("get_category_hint", async {
            let row = sqlx::query(
                r#"
                SELECT query, codes, snippet FROM lead_api.category_hints
                WHERE key = $1 AND expires_at > now()
                "#,
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read category hint")?;

            let Some(row) = row else {
                return Ok(None);
            };
            Ok(Some(CategoryHint {
                query: row.try_get("query")?,
                codes: row.try_get("codes")?,
                snippet: row.try_get("snippet")?,
            }))
        })
        .await
    }

    async fn save_category_hint(
        &self,
        key: &str,
        hint: &CategoryHint,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let expires = expires_at(ttl)?;
        self.guarded("save_category_hint", async {
            sqlx::query(
                r#"
                INSERT INTO lead_api.category_hints
                    (key, query, codes, snippet, updated_at, expires_at)
                VALUES ($1, $2, $3, $4, now(), $5)
                ON CONFLICT (key) DO UPDATE
                SET query = EXCLUDED.query, codes = EXCLUDED.codes, snippet = EXCLUDED.snippet,
                    updated_at = now(), expires_at = EXCLUDED.expires_at
                "#,
            )
            .bind(key)
            .bind(&hint.query)
            .bind(&hint.codes)
            .bind(&hint.snippet)
            .bind(expires)
            .execute(&self.pool)
            .await
            .context("Failed to upsert category hint")?;
            Ok(())
        })
        .await
    }

    async fn reference_codes(&self, keywords: &[String]) -> Result<Vec<String>, AppError> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let patterns: Vec<String> = keywords.iter().map(|k| format!("%{}%", k)).collect();
        self.guarded("reference_codes", async {
            let rows = sqlx::query(
                r#"
                SELECT code FROM lead_api.category_codes
                WHERE description ILIKE ANY($1)
                ORDER BY code
                LIMIT 50
                "#,
            )
            .bind(&patterns)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query category reference table")?;

            rows.iter()
                .map(|row| row.try_get::<String, _>("code").map_err(AppError::from))
                .collect()
        })
        .await
    }
}

struct Expiring<T> {
    value: T,
    expires_at: tokio::time::Instant,
}

impl<T: Clone> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: tokio::time::Instant::now() + ttl,
        }
    }

    fn live(&self) -> Option<T> {
        (tokio::time::Instant::now() < self.expires_at).then(|| self.value.clone())
    }
}

#[derive(Default)]
struct MemoryTables {
    searches: Vec<Expiring<StoredSearch>>,
    results: HashMap<Uuid, Expiring<Vec<Lead>>>,
    enrichments: HashMap<String, Expiring<EnrichmentRecord>>,
    hints: HashMap<String, Expiring<CategoryHint>>,
    reference: Vec<(String, String)>,
}

/// Process-local store with the same expiry rules as the Postgres one.
#[derive(Default)]
pub struct InMemoryLeadStore {
    tables: RwLock<MemoryTables>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the category reference table with `(code, description)` rows.
    pub fn with_reference_codes(rows: Vec<(String, String)>) -> Self {
        Self {
            tables: RwLock::new(MemoryTables {
                reference: rows,
                ..MemoryTables::default()
            }),
        }
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn find_search(&self, cache_key: &str) -> Result<Option<StoredSearch>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .searches
            .iter()
            .rev()
            .filter_map(Expiring::live)
            .find(|s| s.cache_key == cache_key))
    }

    async fn find_results(&self, search_id: Uuid) -> Result<Vec<Lead>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .results
            .get(&search_id)
            .and_then(Expiring::live)
            .unwrap_or_default())
    }

    async fn save_search(
        &self,
        search: &StoredSearch,
        leads: &[Lead],
        ttl: Duration,
    ) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        tables.searches.push(Expiring::new(search.clone(), ttl));
        tables
            .results
            .insert(search.id, Expiring::new(leads.to_vec(), ttl));
        Ok(())
    }

    async fn get_enrichment(&self, key: &str) -> Result<Option<EnrichmentRecord>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables.enrichments.get(key).and_then(Expiring::live))
    }

    async fn save_enrichment(
        &self,
        key: &str,
        record: &EnrichmentRecord,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        tables
            .enrichments
            .insert(key.to_string(), Expiring::new(record.clone(), ttl));
        Ok(())
    }

    async fn get_category_hint(&self, key: &str) -> Result<Option<CategoryHint>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables.hints.get(key).and_then(Expiring::live))
    }

    async fn save_category_hint(
        &self,
        key: &str,
        hint: &CategoryHint,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        tables
            .hints
            .insert(key.to_string(), Expiring::new(hint.clone(), ttl));
        Ok(())
    }

    async fn reference_codes(&self, keywords: &[String]) -> Result<Vec<String>, AppError> {
        let tables = self.tables.read().await;
        let mut codes: Vec<String> = tables
            .reference
            .iter()
            .filter(|(_, description)| {
                let description = crate::normalize::normalize_name(description);
                keywords.iter().any(|k| description.contains(k.as_str()))
            })
            .map(|(code, _)| code.clone())
            .collect();
        codes.sort();
        codes.dedup();
        Ok(codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(registry_id: &str) -> EnrichmentRecord {
        EnrichmentRecord {
            registry_id: registry_id.to_string(),
            ..EnrichmentRecord::default()
        }
    }

    #[tokio::test]
    async fn memory_store_round_trips_before_expiry() {
        let store = InMemoryLeadStore::new();
        store
            .save_enrichment("k", &record("11.222.333/0001-81"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get_enrichment("k").await.unwrap(),
            Some(record("11.222.333/0001-81"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn memory_store_hides_expired_rows() {
        let store = InMemoryLeadStore::new();
        let hint = CategoryHint {
            query: "padaria".into(),
            codes: vec!["1091".into()],
            snippet: String::new(),
        };
        store
            .save_category_hint("padaria", &hint, Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get_category_hint("padaria").await.unwrap(), None);
    }

    #[tokio::test]
    async fn reference_lookup_matches_folded_descriptions() {
        let store = InMemoryLeadStore::with_reference_codes(vec![
            ("5611201".into(), "Restaurantes e similares".into()),
            ("4771701".into(), "Comércio varejista de produtos farmacêuticos".into()),
        ]);
        let codes = store
            .reference_codes(&["farmaceuticos".to_string()])
            .await
            .unwrap();
        assert_eq!(codes, vec!["4771701".to_string()]);
    }
}
