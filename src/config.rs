use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Durable store (L2). `None` runs the service with the in-process layer only.
    pub database_url: Option<String>,
    pub l1_cache_enabled: bool,
    pub l1_cache_capacity: u64,
    pub search_cache_ttl_secs: u64,
    pub enrichment_cache_ttl_secs: u64,
    pub category_hint_ttl_secs: u64,
    pub discovery_concurrency: usize,
    pub registry_workers: usize,
    pub social_workers: usize,
    pub request_deadline_secs: u64,
    pub provider_timeout_secs: u64,
    pub chain_link_timeout_secs: u64,
    pub http_max_attempts: u32,
    pub geoapify_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            l1_cache_enabled: true,
            l1_cache_capacity: 50_000,
            search_cache_ttl_secs: 24 * 3600,
            enrichment_cache_ttl_secs: 7 * 24 * 3600,
            category_hint_ttl_secs: 90 * 24 * 3600,
            discovery_concurrency: 5,
            registry_workers: 5,
            social_workers: 4,
            request_deadline_secs: 240,
            provider_timeout_secs: 45,
            chain_link_timeout_secs: 20,
            http_max_attempts: 3,
            geoapify_api_key: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        _ => Ok(default),
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            port: parse_var("PORT", defaults.port)
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            database_url: optional_var("DATABASE_URL")
                .or_else(|| optional_var("DB_URL"))
                .map(|url| {
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })
                .transpose()?,
            l1_cache_enabled: parse_var("L1_CACHE_ENABLED", defaults.l1_cache_enabled)?,
            l1_cache_capacity: parse_var("L1_CACHE_CAPACITY", defaults.l1_cache_capacity)?,
            search_cache_ttl_secs: parse_var(
                "SEARCH_CACHE_TTL_SECS",
                defaults.search_cache_ttl_secs,
            )?,
            enrichment_cache_ttl_secs: parse_var(
                "ENRICHMENT_CACHE_TTL_SECS",
                defaults.enrichment_cache_ttl_secs,
            )?,
            category_hint_ttl_secs: parse_var(
                "CATEGORY_HINT_TTL_SECS",
                defaults.category_hint_ttl_secs,
            )?,
            discovery_concurrency: parse_var(
                "DISCOVERY_CONCURRENCY",
                defaults.discovery_concurrency,
            )?,
            registry_workers: parse_var("REGISTRY_WORKERS", defaults.registry_workers)?,
            social_workers: parse_var("SOCIAL_WORKERS", defaults.social_workers)?,
            request_deadline_secs: parse_var(
                "REQUEST_DEADLINE_SECS",
                defaults.request_deadline_secs,
            )?,
            provider_timeout_secs: parse_var(
                "PROVIDER_TIMEOUT_SECS",
                defaults.provider_timeout_secs,
            )?,
            chain_link_timeout_secs: parse_var(
                "CHAIN_LINK_TIMEOUT_SECS",
                defaults.chain_link_timeout_secs,
            )?,
            http_max_attempts: parse_var("HTTP_MAX_ATTEMPTS", defaults.http_max_attempts)?,
            geoapify_api_key: optional_var("GEOAPIFY_API_KEY"),
        };

        config.validate()?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        match config.database_url {
            Some(ref url) => tracing::debug!("Database URL: {}...", url.chars().take(20).collect::<String>()),
            None => tracing::warn!("DATABASE_URL not set, durable cache layer disabled"),
        }
        if !config.l1_cache_enabled {
            tracing::warn!("L1 cache disabled, invalidation endpoint will answer 503");
        }
        tracing::debug!(
            "Workers: discovery={} registry={} social={}",
            config.discovery_concurrency,
            config.registry_workers,
            config.social_workers
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Rejects combinations that break the cache volatility ordering or the timeout nesting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.search_cache_ttl_secs == 0 {
            anyhow::bail!("SEARCH_CACHE_TTL_SECS must be positive");
        }
        if self.search_cache_ttl_secs > self.enrichment_cache_ttl_secs
            || self.enrichment_cache_ttl_secs > self.category_hint_ttl_secs
        {
            anyhow::bail!("cache TTLs must satisfy search <= enrichment <= category hint");
        }
        if self.chain_link_timeout_secs >= self.provider_timeout_secs
            || self.provider_timeout_secs >= self.request_deadline_secs
        {
            anyhow::bail!("timeouts must satisfy chain link < provider < request deadline");
        }
        if self.discovery_concurrency == 0 || self.registry_workers == 0 || self.social_workers == 0
        {
            anyhow::bail!("worker counts must be at least 1");
        }
        if self.http_max_attempts == 0 {
            anyhow::bail!("HTTP_MAX_ATTEMPTS must be at least 1");
        }
        Ok(())
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn chain_link_timeout(&self) -> Duration {
        Duration::from_secs(self.chain_link_timeout_secs)
    }
}
