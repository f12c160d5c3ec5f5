//! Per-lead enrichment on two independent axes.
//!
//! Registry axis: cache, then a snippet-search chain that finds the CNPJ, then the
//! registry APIs for company details. Social axis: cache, then a snippet-search chain
//! that finds the Instagram handle and follower count.
//!
//! Workers return `(index, record)` and the orchestrator applies all records after the
//! pool drains, so the lead slice is never shared between tasks.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::{EnrichmentAxis, TieredCache};
use crate::config::Config;
use crate::discovery::indexed;
use crate::errors::AppError;
use crate::filter::classify;
use crate::models::{EnrichmentRecord, Lead};
use crate::registry::{extract_registry_id, RegistryId};
use crate::services::{
    BrasilApiService, ReceitaWsService, RegistryDetailsSource, SearchEngine, SnippetSearchService,
    SnippetSource,
};
use crate::social::{extract_followers, extract_handle};
use crate::transport::RetryingTransport;

/// Fixed pause between two links of a chain.
pub const LINK_PAUSE: Duration = Duration::from_millis(500);

/// One sub-provider of a fallback chain.
#[async_trait]
pub trait ChainLink<T>: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` is a miss: nothing found, or only a placeholder.
    async fn attempt(&self, query: &str, cancel: &CancellationToken) -> Result<Option<T>, AppError>;
}

/// Runs a snippet search and pulls a specific answer out of the text.
pub struct SnippetLink<T> {
    source: Arc<dyn SnippetSource>,
    extract: fn(&str) -> Option<T>,
}

impl<T> SnippetLink<T> {
    pub fn new(source: Arc<dyn SnippetSource>, extract: fn(&str) -> Option<T>) -> Self {
        Self { source, extract }
    }
}

#[async_trait]
impl<T: Send + 'static> ChainLink<T> for SnippetLink<T> {
    fn name(&self) -> &str {
        self.source.name()
    }

    async fn attempt(&self, query: &str, cancel: &CancellationToken) -> Result<Option<T>, AppError> {
        let text = self.source.snippets(query, cancel).await?;
        Ok((self.extract)(&text))
    }
}

/// Ordered links tried one at a time until one answers.
pub struct FallbackChain<T> {
    links: Vec<Arc<dyn ChainLink<T>>>,
    link_timeout: Duration,
    pause: Duration,
}

impl<T: Send + 'static> FallbackChain<T> {
    pub fn new(links: Vec<Arc<dyn ChainLink<T>>>, link_timeout: Duration) -> Self {
        Self {
            links,
            link_timeout,
            pause: LINK_PAUSE,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// First answer from the chain, or `None` once every link missed, failed or timed out.
    pub async fn resolve(&self, query: &str, cancel: &CancellationToken) -> Option<T> {
        for (position, link) in self.links.iter().enumerate() {
            if position > 0 && !self.pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(self.pause) => {}
                }
            }
            if cancel.is_cancelled() {
                return None;
            }

            match tokio::time::timeout(self.link_timeout, link.attempt(query, cancel)).await {
                Ok(Ok(Some(answer))) => {
                    tracing::debug!(link = link.name(), query, "Fallback link answered");
                    return Some(answer);
                }
                Ok(Ok(None)) => {
                    tracing::debug!(link = link.name(), query, "Fallback link missed");
                }
                Ok(Err(e)) => {
                    tracing::warn!(link = link.name(), query, error = %e, "Fallback link failed");
                }
                Err(_) => {
                    tracing::warn!(
                        link = link.name(),
                        query,
                        timeout_ms = self.link_timeout.as_millis() as u64,
                        "Fallback link timed out"
                    );
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialProfile {
    pub handle: String,
    pub followers: String,
}

/// Handle plus the follower count written on the same line as the handle, if any.
pub fn social_profile_from(text: &str) -> Option<SocialProfile> {
    let handle = extract_handle(text)?;
    let needle = handle.to_lowercase();
    let followers = text
        .lines()
        .filter(|line| line.to_lowercase().contains(&needle))
        .find_map(extract_followers)
        .unwrap_or_default();
    Some(SocialProfile { handle, followers })
}

fn snippet_links<T: Send + 'static>(
    transport: &RetryingTransport,
    engines: &[SearchEngine],
    extract: fn(&str) -> Option<T>,
) -> Vec<Arc<dyn ChainLink<T>>> {
    engines
        .iter()
        .map(|engine| {
            let source: Arc<dyn SnippetSource> =
                Arc::new(SnippetSearchService::new(transport.clone(), *engine));
            Arc::new(SnippetLink::new(source, extract)) as Arc<dyn ChainLink<T>>
        })
        .collect()
}

pub struct EnrichmentOrchestrator {
    cache: TieredCache,
    registry_chain: FallbackChain<RegistryId>,
    registry_details: Vec<Arc<dyn RegistryDetailsSource>>,
    social_chain: FallbackChain<SocialProfile>,
    registry_workers: usize,
    social_workers: usize,
    lookup_timeout: Duration,
}

impl EnrichmentOrchestrator {
    pub fn new(
        cache: TieredCache,
        registry_chain: FallbackChain<RegistryId>,
        registry_details: Vec<Arc<dyn RegistryDetailsSource>>,
        social_chain: FallbackChain<SocialProfile>,
    ) -> Self {
        Self {
            cache,
            registry_chain,
            registry_details,
            social_chain,
            registry_workers: 5,
            social_workers: 4,
            lookup_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_workers(mut self, registry: usize, social: usize) -> Self {
        self.registry_workers = registry.max(1);
        self.social_workers = social.max(1);
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Production wiring: DuckDuckGo, Mojeek, Bing for CNPJ; DuckDuckGo, Bing, Mojeek for
    /// Instagram; BrasilAPI then ReceitaWS for company details.
    pub fn from_config(config: &Config, transport: &RetryingTransport, cache: TieredCache) -> Self {
        let link_timeout = config.chain_link_timeout();
        let registry_chain = FallbackChain::new(
            snippet_links(
                transport,
                &[SearchEngine::DuckDuckGo, SearchEngine::Mojeek, SearchEngine::Bing],
                extract_registry_id,
            ),
            link_timeout,
        );
        let social_chain = FallbackChain::new(
            snippet_links(
                transport,
                &[SearchEngine::DuckDuckGo, SearchEngine::Bing, SearchEngine::Mojeek],
                social_profile_from,
            ),
            link_timeout,
        );
        let registry_details: Vec<Arc<dyn RegistryDetailsSource>> = vec![
            Arc::new(BrasilApiService::new(transport.clone())),
            Arc::new(ReceitaWsService::new(transport.clone())),
        ];

        Self::new(cache, registry_chain, registry_details, social_chain)
            .with_workers(config.registry_workers, config.social_workers)
            .with_lookup_timeout(link_timeout)
    }

    /// Registry enrichment for one lead. `Ok(None)` when every source missed.
    pub async fn enrich_cnpj(
        &self,
        lead: &Lead,
        cancel: &CancellationToken,
    ) -> Result<Option<EnrichmentRecord>, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let axis = EnrichmentAxis::Registry;
        if let Some(record) = self.cache.get_enrichment(axis, &lead.name, &lead.city).await {
            tracing::debug!(lead = %lead.name, "Registry enrichment cache hit");
            return Ok(Some(record));
        }

        let query = format!("{} {} {} cnpj", lead.name, lead.city, lead.state);
        let Some(id) = self.registry_chain.resolve(query.trim(), cancel).await else {
            tracing::debug!(lead = %lead.name, "No CNPJ found");
            return Ok(None);
        };

        let mut record = EnrichmentRecord {
            registry_id: id.formatted(),
            ..EnrichmentRecord::default()
        };
        if let Some(details) = self.lookup_details(&id, cancel).await {
            record.legal_name = details.legal_name;
            record.trade_name = details.trade_name;
            record.registry_status = details.status;
            record.category_code = details.category_code;
            record.category_desc = details.category_desc;
            record.municipality = details.municipality;
            record.state = details.state;
            record.partners = details.partners;
        }

        self.cache
            .put_enrichment(axis, &lead.name, &lead.city, &record)
            .await;
        tracing::info!(lead = %lead.name, cnpj = %record.registry_id, "✅ CNPJ resolved");
        Ok(Some(record))
    }

    async fn lookup_details(
        &self,
        id: &RegistryId,
        cancel: &CancellationToken,
    ) -> Option<crate::services::RegistryDetails> {
        for source in &self.registry_details {
            if cancel.is_cancelled() {
                return None;
            }
            match tokio::time::timeout(self.lookup_timeout, source.details(id, cancel)).await {
                Ok(Ok(Some(details))) => return Some(details),
                Ok(Ok(None)) => {
                    tracing::debug!(source = source.name(), cnpj = %id.formatted(), "Registry has no record");
                }
                Ok(Err(e)) => {
                    tracing::warn!(source = source.name(), error = %e, "Registry lookup failed");
                }
                Err(_) => {
                    tracing::warn!(source = source.name(), "Registry lookup timed out");
                }
            }
        }
        None
    }

    /// Social enrichment for one lead. `Ok(None)` when every source missed.
    pub async fn enrich_instagram(
        &self,
        lead: &Lead,
        cancel: &CancellationToken,
    ) -> Result<Option<EnrichmentRecord>, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let axis = EnrichmentAxis::Social;
        if let Some(record) = self.cache.get_enrichment(axis, &lead.name, &lead.city).await {
            tracing::debug!(lead = %lead.name, "Social enrichment cache hit");
            return Ok(Some(record));
        }

        let query = format!("{} {} instagram", lead.name, lead.city);
        let Some(profile) = self.social_chain.resolve(query.trim(), cancel).await else {
            tracing::debug!(lead = %lead.name, "No Instagram profile found");
            return Ok(None);
        };

        let record = EnrichmentRecord {
            social_handle: profile.handle,
            follower_count: profile.followers,
            ..EnrichmentRecord::default()
        };
        self.cache
            .put_enrichment(axis, &lead.name, &lead.city, &record)
            .await;
        tracing::info!(lead = %lead.name, instagram = %record.social_handle, "✅ Instagram resolved");
        Ok(Some(record))
    }

    /// Runs registry enrichment over every lead and marks category compatibility.
    /// Returns how many leads were enriched.
    pub async fn enrich_registry(
        &self,
        leads: &mut [Lead],
        compatible_codes: &[String],
        cancel: &CancellationToken,
    ) -> usize {
        let jobs: Vec<_> = leads
            .iter()
            .enumerate()
            .map(|(idx, lead)| indexed(idx, self.enrich_cnpj(lead, cancel)))
            .collect();
        let results: Vec<(usize, Result<Option<EnrichmentRecord>, AppError>)> =
            stream::iter(jobs)
                .buffer_unordered(self.registry_workers)
                .collect()
                .await;

        let mut enriched = 0;
        for (idx, result) in results {
            if let Ok(Some(record)) = result {
                apply_registry(&mut leads[idx], record, compatible_codes);
                enriched += 1;
            }
        }
        enriched
    }

    /// Runs social enrichment over every lead. Returns how many leads were enriched.
    pub async fn enrich_social(&self, leads: &mut [Lead], cancel: &CancellationToken) -> usize {
        let jobs: Vec<_> = leads
            .iter()
            .enumerate()
            .map(|(idx, lead)| indexed(idx, self.enrich_instagram(lead, cancel)))
            .collect();
        let results: Vec<(usize, Result<Option<EnrichmentRecord>, AppError>)> =
            stream::iter(jobs)
                .buffer_unordered(self.social_workers)
                .collect()
                .await;

        let mut enriched = 0;
        for (idx, result) in results {
            if let Ok(Some(record)) = result {
                apply_social(&mut leads[idx], record);
                enriched += 1;
            }
        }
        enriched
    }
}

/// Writes registry fields onto a lead and classifies its category code.
pub fn apply_registry(lead: &mut Lead, record: EnrichmentRecord, compatible_codes: &[String]) {
    lead.category_match = classify(&record.category_code, compatible_codes);
    lead.registry_id = record.registry_id;
    lead.legal_name = record.legal_name;
    lead.trade_name = record.trade_name;
    lead.registry_status = record.registry_status;
    lead.category_code = record.category_code;
    lead.category_desc = record.category_desc;
    lead.resolved_municipality = record.municipality;
    lead.resolved_state = record.state;
    lead.partners = record.partners;
}

pub fn apply_social(lead: &mut Lead, record: EnrichmentRecord) {
    lead.social_handle = record.social_handle;
    lead.follower_count = record.follower_count;
}
