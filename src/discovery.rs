use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::dedup::deduplicate;
use crate::models::{Lead, ProviderOutcome};
use crate::providers::LeadProvider;

/// Tags a unit of pooled work with its position so results can be applied after the
/// pool drains.
pub(crate) async fn indexed<F: Future>(idx: usize, work: F) -> (usize, F::Output) {
    (idx, work.await)
}

/// Deduplicated leads plus how each provider fared.
#[derive(Debug, Default)]
pub struct Discovery {
    pub leads: Vec<Lead>,
    pub outcomes: Vec<ProviderOutcome>,
}

impl Discovery {
    pub fn failed_providers(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_some()).count()
    }
}

/// Fans a query out to every provider under a concurrency cap.
pub struct DiscoveryAggregator {
    providers: Vec<Arc<dyn LeadProvider>>,
    concurrency: usize,
    provider_timeout: Duration,
}

impl DiscoveryAggregator {
    pub fn new(
        providers: Vec<Arc<dyn LeadProvider>>,
        concurrency: usize,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            concurrency: concurrency.max(1),
            provider_timeout,
        }
    }

    /// Never fails: provider errors and timeouts are recorded in the outcomes.
    ///
    /// Providers not yet started when `cancel` fires are skipped; running ones finish
    /// on their own.
    pub async fn search_all(
        &self,
        query: &str,
        location: &str,
        cancel: &CancellationToken,
    ) -> Discovery {
        let jobs: Vec<_> = self
            .providers
            .iter()
            .cloned()
            .enumerate()
            .map(|(idx, provider)| indexed(idx, self.run_one(provider, query, location, cancel)))
            .collect();
        let mut runs: Vec<(usize, (ProviderOutcome, Vec<Lead>))> = stream::iter(jobs)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        runs.sort_by_key(|(idx, _)| *idx);

        let mut candidates = Vec::new();
        let mut outcomes = Vec::with_capacity(runs.len());
        for (_, (outcome, leads)) in runs {
            candidates.extend(leads);
            outcomes.push(outcome);
        }

        let raw = candidates.len();
        let leads = deduplicate(candidates);
        tracing::info!(
            query,
            location,
            providers = outcomes.len(),
            raw,
            deduplicated = leads.len(),
            "Discovery finished"
        );
        Discovery { leads, outcomes }
    }

    async fn run_one(
        &self,
        provider: Arc<dyn LeadProvider>,
        query: &str,
        location: &str,
        cancel: &CancellationToken,
    ) -> (ProviderOutcome, Vec<Lead>) {
        let mut outcome = ProviderOutcome {
            provider: provider.name().to_string(),
            leads: 0,
            error: None,
            elapsed_ms: 0,
            skipped: false,
        };
        if cancel.is_cancelled() {
            tracing::debug!(provider = provider.name(), "Deadline reached, provider skipped");
            outcome.skipped = true;
            return (outcome, Vec::new());
        }

        let started = Instant::now();
        let result =
            tokio::time::timeout(self.provider_timeout, provider.search(query, location, cancel))
                .await;
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;

        let leads = match result {
            Ok(Ok(leads)) => leads
                .into_iter()
                .filter(|lead| !lead.name.trim().is_empty())
                .collect::<Vec<_>>(),
            Ok(Err(e)) => {
                tracing::warn!(provider = provider.name(), error = %e, "Provider failed");
                outcome.error = Some(e.to_string());
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    provider = provider.name(),
                    timeout_ms = self.provider_timeout.as_millis() as u64,
                    "Provider timed out"
                );
                outcome.error = Some(format!(
                    "timed out after {}ms",
                    self.provider_timeout.as_millis()
                ));
                Vec::new()
            }
        };

        outcome.leads = leads.len();
        tracing::debug!(
            provider = provider.name(),
            leads = outcome.leads,
            elapsed_ms = outcome.elapsed_ms,
            "Provider finished"
        );
        (outcome, leads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        name: &'static str,
        leads: Vec<Lead>,
        fail: bool,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LeadProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn search(
            &self,
            _query: &str,
            _location: &str,
            _cancel: &CancellationToken,
        ) -> Result<Vec<Lead>, AppError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::ExternalApiError("HTTP 503 after 3 retries".into()));
            }
            Ok(self.leads.clone())
        }
    }

    fn providers(count: usize, peak: &Arc<AtomicUsize>) -> Vec<Arc<dyn LeadProvider>> {
        let in_flight = Arc::new(AtomicUsize::new(0));
        (0..count)
            .map(|i| {
                let mut lead = Lead::new(format!("Loja {}", i), "fixed");
                lead.phone = format!("1191234{:04}", i);
                Arc::new(FixedProvider {
                    name: "fixed",
                    leads: vec![lead, Lead::new("", "fixed")],
                    fail: i == 0,
                    in_flight: in_flight.clone(),
                    peak: peak.clone(),
                }) as Arc<dyn LeadProvider>
            })
            .collect()
    }

    #[tokio::test]
    async fn failures_are_recorded_not_fatal() {
        let peak = Arc::new(AtomicUsize::new(0));
        let aggregator = DiscoveryAggregator::new(providers(4, &peak), 2, Duration::from_secs(5));
        let discovery = aggregator
            .search_all("loja", "Campinas, SP", &CancellationToken::new())
            .await;

        assert_eq!(discovery.outcomes.len(), 4);
        assert_eq!(discovery.failed_providers(), 1);
        assert_eq!(discovery.leads.len(), 3);
        assert!(discovery.leads.iter().all(|l| !l.name.is_empty()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancelled_token_skips_every_provider() {
        let peak = Arc::new(AtomicUsize::new(0));
        let aggregator = DiscoveryAggregator::new(providers(3, &peak), 5, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let discovery = aggregator.search_all("loja", "Campinas, SP", &cancel).await;
        assert!(discovery.leads.is_empty());
        assert!(discovery.outcomes.iter().all(|o| o.skipped));
        assert_eq!(peak.load(Ordering::SeqCst), 0);
    }
}
