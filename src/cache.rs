//! Two-layer read-through cache.
//!
//! L1 is an in-process moka cache holding checksummed JSON; L2 is the durable
//! [`LeadStore`]. Both are optional. An absent or failing layer reads as a miss,
//! and writes to either layer never fail the caller.

use moka::future::Cache;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache_validator::ValidatedCacheEntry;
use crate::config::Config;
use crate::db_storage::LeadStore;
use crate::errors::AppError;
use crate::models::{CategoryHint, EnrichmentRecord, SearchRequest, SearchResponse, StoredSearch};

pub const SEARCH_KEY_PREFIX: &str = "lead:search:v1:";
pub const ENRICHMENT_KEY_PREFIX: &str = "lead:enrich:v1:";
pub const HINT_KEY_PREFIX: &str = "lead:hint:v1:";

fn digest(material: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    hex::encode(hasher.finalize())
}

fn key_part(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Stable key for a whole search.
pub fn search_key(query: &str, location: &str, enrich_cnpj: bool, enrich_instagram: bool) -> String {
    let material = format!(
        "{}|{}|cnpj={}|ig={}",
        key_part(query),
        key_part(location),
        enrich_cnpj,
        enrich_instagram
    );
    format!("{}{}", SEARCH_KEY_PREFIX, digest(&material))
}

/// [`search_key`] for a request.
pub fn request_key(request: &SearchRequest) -> String {
    search_key(
        &request.query,
        &request.location,
        request.enrich_cnpj,
        request.enrich_instagram,
    )
}

/// Key for a category hint. Left readable so the durable table can be inspected by hand.
pub fn category_hint_key(query: &str) -> String {
    format!("{}{}", HINT_KEY_PREFIX, key_part(query))
}

/// Stable key for one lead's enrichment record.
pub fn enrichment_key(name: &str, city: &str) -> String {
    let material = format!("{}|{}", key_part(name), key_part(city));
    format!("{}{}", ENRICHMENT_KEY_PREFIX, digest(&material))
}

/// The two independent enrichment axes, each with its own key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentAxis {
    Registry,
    Social,
}

impl EnrichmentAxis {
    pub fn label(&self) -> &'static str {
        match self {
            EnrichmentAxis::Registry => "registry",
            EnrichmentAxis::Social => "social",
        }
    }

    pub fn cache_key(&self, name: &str, city: &str) -> String {
        match self {
            EnrichmentAxis::Registry => enrichment_key(name, city),
            EnrichmentAxis::Social => enrichment_key(&format!("ig:{}", name), city),
        }
    }

    /// A cached record only counts as a hit when it carries this axis' identifier.
    pub fn is_hit(&self, record: &EnrichmentRecord) -> bool {
        match self {
            EnrichmentAxis::Registry => !record.registry_id.is_empty(),
            EnrichmentAxis::Social => !record.social_handle.is_empty(),
        }
    }
}

/// Per-record-kind TTLs, shortest for searches, longest for category hints.
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub search: Duration,
    pub enrichment: Duration,
    pub category_hint: Duration,
}

impl TtlPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            search: Duration::from_secs(config.search_cache_ttl_secs),
            enrichment: Duration::from_secs(config.enrichment_cache_ttl_secs),
            category_hint: Duration::from_secs(config.category_hint_ttl_secs),
        }
    }
}

/// L1 key spaces. Each has its own moka instance and TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L1Namespace {
    Search,
    Enrichment,
    CategoryHint,
}

#[derive(Clone)]
pub struct L1Cache {
    searches: Cache<String, String>,
    enrichments: Cache<String, String>,
    hints: Cache<String, String>,
}

impl L1Cache {
    pub fn new(capacity: u64, ttl: &TtlPolicy) -> Self {
        let build = |ttl: Duration| {
            Cache::builder()
                .time_to_live(ttl)
                .max_capacity(capacity)
                .build()
        };
        Self {
            searches: build(ttl.search),
            enrichments: build(ttl.enrichment),
            hints: build(ttl.category_hint),
        }
    }

    fn space(&self, namespace: L1Namespace) -> &Cache<String, String> {
        match namespace {
            L1Namespace::Search => &self.searches,
            L1Namespace::Enrichment => &self.enrichments,
            L1Namespace::CategoryHint => &self.hints,
        }
    }

    /// Decoded value under `key`. Corrupt or undecodable entries are evicted and read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, namespace: L1Namespace, key: &str) -> Option<T> {
        let stored = self.space(namespace).get(key).await?;
        let value = ValidatedCacheEntry::open(&stored);
        if value.is_none() {
            self.space(namespace).invalidate(key).await;
        }
        value
    }

    pub async fn put<T: Serialize>(
        &self,
        namespace: L1Namespace,
        key: &str,
        value: &T,
    ) -> Result<(), AppError> {
        let serialized = ValidatedCacheEntry::seal(value)?.serialize()?;
        self.space(namespace)
            .insert(key.to_string(), serialized)
            .await;
        Ok(())
    }

    pub async fn remove(&self, namespace: L1Namespace, key: &str) -> bool {
        self.space(namespace).remove(key).await.is_some()
    }
}

/// Discards the error of a best-effort cache or persistence write after logging it.
///
/// Returns the value on success so callers can still use it.
pub fn best_effort<T>(operation: &str, result: Result<T, AppError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(operation, error = %e, "Best-effort cache write failed, continuing");
            None
        }
    }
}

/// Read-through over a store read; failures degrade to a miss.
fn degrade<T>(operation: &str, result: Result<Option<T>, AppError>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(operation, error = %e, "Durable cache unavailable, treating as miss");
            None
        }
    }
}

#[derive(Clone)]
pub struct TieredCache {
    l1: Option<L1Cache>,
    l2: Option<Arc<dyn LeadStore>>,
    ttl: TtlPolicy,
}

impl TieredCache {
    pub fn new(l1: Option<L1Cache>, l2: Option<Arc<dyn LeadStore>>, ttl: TtlPolicy) -> Self {
        Self { l1, l2, ttl }
    }

    /// A cache with no layers; every read misses.
    pub fn disabled(ttl: TtlPolicy) -> Self {
        Self::new(None, None, ttl)
    }

    pub fn l1(&self) -> Option<&L1Cache> {
        self.l1.as_ref()
    }

    pub fn store(&self) -> Option<&Arc<dyn LeadStore>> {
        self.l2.as_ref()
    }

    pub fn ttl(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Looks up a whole search in L1, then L2. An L2 hit is written back into L1.
    pub async fn get_search(&self, request: &SearchRequest) -> Option<SearchResponse> {
        let key = request_key(request);

        if let Some(l1) = &self.l1 {
            if let Some(mut response) = l1.get::<SearchResponse>(L1Namespace::Search, &key).await {
                tracing::info!(query = %request.query, "Search served from L1");
                response.cached = true;
                return Some(response);
            }
        }

        let store = self.l2.as_ref()?;
        let stored = degrade("find_search", store.find_search(&key).await)?;
        let leads = match store.find_results(stored.id).await {
            Ok(leads) => leads,
            Err(e) => {
                tracing::warn!(error = %e, "Stored search has unreadable results, treating as miss");
                return None;
            }
        };

        let response = SearchResponse {
            query: request.query.clone(),
            location: request.location.clone(),
            enrich_cnpj: stored.enrich_cnpj,
            enrich_instagram: stored.enrich_instagram,
            total: leads.len(),
            discarded: usize::try_from(stored.discarded).unwrap_or_default(),
            cached: true,
            search_id: Some(stored.id),
            cnae_hint_codes: stored.category_codes,
            started_at: stored.created_at,
            duration_ms: stored.duration_ms,
            leads,
        };
        tracing::info!(query = %request.query, search_id = %stored.id, "Search served from L2");

        if let Some(l1) = &self.l1 {
            best_effort(
                "warm_search_l1",
                l1.put(L1Namespace::Search, &key, &response).await,
            );
        }
        Some(response)
    }

    /// Writes a finished search into L1.
    pub async fn put_search(&self, response: &SearchResponse) {
        let Some(l1) = &self.l1 else {
            return;
        };
        let key = search_key(
            &response.query,
            &response.location,
            response.enrich_cnpj,
            response.enrich_instagram,
        );
        best_effort("put_search_l1", l1.put(L1Namespace::Search, &key, response).await);
    }

    /// Persists search metadata and results to L2. Returns the search id when stored.
    pub async fn persist_search(&self, response: &SearchResponse) -> Option<Uuid> {
        let store = self.l2.as_ref()?;
        let search = StoredSearch {
            id: Uuid::new_v4(),
            cache_key: search_key(
                &response.query,
                &response.location,
                response.enrich_cnpj,
                response.enrich_instagram,
            ),
            query: response.query.clone(),
            location: response.location.clone(),
            enrich_cnpj: response.enrich_cnpj,
            enrich_instagram: response.enrich_instagram,
            total: i32::try_from(response.total).unwrap_or(i32::MAX),
            discarded: i32::try_from(response.discarded).unwrap_or(i32::MAX),
            duration_ms: response.duration_ms,
            category_codes: response.cnae_hint_codes.clone(),
            created_at: response.started_at,
        };
        best_effort(
            "persist_search",
            store
                .save_search(&search, &response.leads, self.ttl.search)
                .await,
        )
        .map(|_| search.id)
    }

    /// Drops one search from L1. Fails only when there is no L1 to invalidate.
    pub async fn invalidate_search(&self, request: &SearchRequest) -> Result<String, AppError> {
        let l1 = self.l1.as_ref().ok_or_else(|| {
            AppError::ServiceUnavailable("search cache is not configured".to_string())
        })?;
        let key = request_key(request);
        let existed = l1.remove(L1Namespace::Search, &key).await;
        tracing::info!(key = %key, existed, "Search cache entry invalidated");
        Ok(key)
    }

    /// Cached enrichment for one lead on one axis, L1 first, then L2 (warming L1).
    pub async fn get_enrichment(
        &self,
        axis: EnrichmentAxis,
        name: &str,
        city: &str,
    ) -> Option<EnrichmentRecord> {
        let key = axis.cache_key(name, city);

        if let Some(l1) = &self.l1 {
            if let Some(record) = l1
                .get::<EnrichmentRecord>(L1Namespace::Enrichment, &key)
                .await
                .filter(|r| axis.is_hit(r))
            {
                tracing::debug!(axis = axis.label(), lead = name, "Enrichment served from L1");
                return Some(record);
            }
        }

        let store = self.l2.as_ref()?;
        let record = degrade("get_enrichment", store.get_enrichment(&key).await)
            .filter(|r| axis.is_hit(r))?;
        tracing::debug!(axis = axis.label(), lead = name, "Enrichment served from L2");
        if let Some(l1) = &self.l1 {
            best_effort(
                "warm_enrichment_l1",
                l1.put(L1Namespace::Enrichment, &key, &record).await,
            );
        }
        Some(record)
    }

    /// Writes a resolved enrichment into both layers.
    pub async fn put_enrichment(
        &self,
        axis: EnrichmentAxis,
        name: &str,
        city: &str,
        record: &EnrichmentRecord,
    ) {
        let key = axis.cache_key(name, city);
        if let Some(l1) = &self.l1 {
            best_effort(
                "put_enrichment_l1",
                l1.put(L1Namespace::Enrichment, &key, record).await,
            );
        }
        if let Some(store) = &self.l2 {
            best_effort(
                "put_enrichment_l2",
                store.save_enrichment(&key, record, self.ttl.enrichment).await,
            );
        }
    }

    pub async fn get_category_hint(&self, query: &str) -> Option<CategoryHint> {
        let key = category_hint_key(query);
        if let Some(l1) = &self.l1 {
            if let Some(hint) = l1
                .get::<CategoryHint>(L1Namespace::CategoryHint, &key)
                .await
                .filter(|h| !h.codes.is_empty())
            {
                return Some(hint);
            }
        }

        let store = self.l2.as_ref()?;
        let hint = degrade("get_category_hint", store.get_category_hint(&key).await)
            .filter(|h| !h.codes.is_empty())?;
        if let Some(l1) = &self.l1 {
            best_effort(
                "warm_category_hint_l1",
                l1.put(L1Namespace::CategoryHint, &key, &hint).await,
            );
        }
        Some(hint)
    }

    pub async fn put_category_hint(&self, hint: &CategoryHint) {
        let key = category_hint_key(&hint.query);
        if let Some(l1) = &self.l1 {
            best_effort(
                "put_category_hint_l1",
                l1.put(L1Namespace::CategoryHint, &key, hint).await,
            );
        }
        if let Some(store) = &self.l2 {
            best_effort(
                "put_category_hint_l2",
                store
                    .save_category_hint(&key, hint, self.ttl.category_hint)
                    .await,
            );
        }
    }

    /// Reference-table codes for the keywords; empty without a durable store.
    pub async fn reference_codes(&self, keywords: &[String]) -> Vec<String> {
        let Some(store) = &self.l2 else {
            return Vec::new();
        };
        degrade(
            "reference_codes",
            store.reference_codes(keywords).await.map(Some),
        )
        .unwrap_or_default()
    }
}
