//! Request pipeline:
//! cache check, discovery, name pre-filter, registry enrichment with post-filters,
//! social enrichment, persist, respond.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{L1Cache, TieredCache, TtlPolicy};
use crate::category::CategoryResolver;
use crate::config::Config;
use crate::db_storage::LeadStore;
use crate::discovery::DiscoveryAggregator;
use crate::enrichment::EnrichmentOrchestrator;
use crate::errors::AppError;
use crate::filter;
use crate::models::{Lead, SearchRequest, SearchResponse};
use crate::normalize::parse_location;
use crate::providers::default_providers;
use crate::transport::{BackoffPolicy, RetryingTransport};

/// Cancels its token when the time runs out, or never if dropped first.
struct Deadline {
    token: CancellationToken,
    timer: JoinHandle<()>,
}

impl Deadline {
    fn start(after: Duration) -> Self {
        let token = CancellationToken::new();
        let fire = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            tracing::warn!(deadline_ms = after.as_millis() as u64, "Request deadline reached");
            fire.cancel();
        });
        Self { token, timer }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

pub struct SearchPipeline {
    cache: TieredCache,
    discovery: DiscoveryAggregator,
    categories: CategoryResolver,
    enrichment: EnrichmentOrchestrator,
    request_deadline: Duration,
}

impl SearchPipeline {
    pub fn new(
        cache: TieredCache,
        discovery: DiscoveryAggregator,
        categories: CategoryResolver,
        enrichment: EnrichmentOrchestrator,
        request_deadline: Duration,
    ) -> Self {
        Self {
            cache,
            discovery,
            categories,
            enrichment,
            request_deadline,
        }
    }

    /// Wires the production providers, chains and cache layers.
    pub fn from_config(config: &Config, store: Option<Arc<dyn LeadStore>>) -> Result<Self, AppError> {
        let transport = RetryingTransport::new(
            config.provider_timeout(),
            BackoffPolicy::default(),
            config.http_max_attempts,
        )
        .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        let ttl = TtlPolicy::from_config(config);
        let l1 = config
            .l1_cache_enabled
            .then(|| L1Cache::new(config.l1_cache_capacity, &ttl));
        let cache = TieredCache::new(l1, store, ttl);

        let providers = default_providers(&transport, config.geoapify_api_key.as_deref());
        tracing::info!(
            providers = providers.len(),
            l1 = cache.l1().is_some(),
            l2 = cache.store().is_some(),
            "Search pipeline configured"
        );

        Ok(Self::new(
            cache.clone(),
            DiscoveryAggregator::new(
                providers,
                config.discovery_concurrency,
                config.provider_timeout(),
            ),
            CategoryResolver::from_transport(&transport, cache.clone(), config.chain_link_timeout()),
            EnrichmentOrchestrator::from_config(config, &transport, cache),
            config.request_deadline(),
        ))
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Removes a search from L1 and returns the key it was stored under.
    pub async fn invalidate(&self, request: &SearchRequest) -> Result<String, AppError> {
        self.cache.invalidate_search(request).await
    }

    pub async fn run(&self, request: SearchRequest) -> Result<SearchResponse, AppError> {
        let request = request.validated()?;
        let started_at = Utc::now();
        let clock = Instant::now();

        if let Some(cached) = self.cache.get_search(&request).await {
            return Ok(cached);
        }

        let deadline = Deadline::start(self.request_deadline);
        let cancel = &deadline.token;
        let (city, state) = parse_location(&request.location);

        let stage = Instant::now();
        let discovery = self
            .discovery
            .search_all(&request.query, &request.location, cancel)
            .await;
        let mut leads = discovery.leads;
        for lead in &mut leads {
            if lead.city.is_empty() {
                lead.city = city.clone();
            }
            if lead.state.is_empty() {
                lead.state = state.clone();
            }
        }
        tracing::info!(
            leads = leads.len(),
            failed_providers = discovery.outcomes.iter().filter(|o| o.error.is_some()).count(),
            elapsed_ms = stage.elapsed().as_millis() as u64,
            "Stage discovery done"
        );

        let (mut leads, mut discarded) = filter::by_name_relevance(leads, &request.query);
        tracing::info!(leads = leads.len(), discarded, "Stage name pre-filter done");

        let mut category_codes = Vec::new();
        if request.enrich_cnpj && !leads.is_empty() {
            let stage = Instant::now();
            category_codes = self.categories.compatible_codes(&request.query, cancel).await;
            let enriched = self
                .enrichment
                .enrich_registry(&mut leads, &category_codes, cancel)
                .await;

            let (kept, by_location) = filter::by_location(leads, &city, &state);
            let (kept, by_category) = filter::by_category(kept, &category_codes);
            leads = kept;
            discarded += by_location + by_category;
            tracing::info!(
                enriched,
                by_location,
                by_category,
                leads = leads.len(),
                elapsed_ms = stage.elapsed().as_millis() as u64,
                "Stage registry enrichment done"
            );
        }

        if request.enrich_instagram && !leads.is_empty() {
            let stage = Instant::now();
            let enriched = self.enrichment.enrich_social(&mut leads, cancel).await;
            tracing::info!(
                enriched,
                leads = leads.len(),
                elapsed_ms = stage.elapsed().as_millis() as u64,
                "Stage social enrichment done"
            );
        }
        drop(deadline);

        let mut response = build_response(&request, leads, discarded, category_codes);
        response.started_at = started_at;
        response.duration_ms = clock.elapsed().as_millis() as i64;

        response.search_id = self.cache.persist_search(&response).await;
        self.cache.put_search(&response).await;

        tracing::info!(
            query = %response.query,
            total = response.total,
            discarded = response.discarded,
            duration_ms = response.duration_ms,
            "Search completed"
        );
        Ok(response)
    }
}

fn build_response(
    request: &SearchRequest,
    leads: Vec<Lead>,
    discarded: usize,
    category_codes: Vec<String>,
) -> SearchResponse {
    SearchResponse {
        query: request.query.clone(),
        location: request.location.clone(),
        enrich_cnpj: request.enrich_cnpj,
        enrich_instagram: request.enrich_instagram,
        total: leads.len(),
        discarded,
        cached: false,
        search_id: None,
        cnae_hint_codes: category_codes,
        started_at: Utc::now(),
        duration_ms: 0,
        leads,
    }
}
