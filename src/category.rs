//! Compatible category-code resolution for a free-text query.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::TieredCache;
use crate::catalog::{query_keywords, static_compatible_codes};
use crate::models::CategoryHint;
use crate::services::{SearchEngine, SnippetSearchService, SnippetSource};
use crate::transport::RetryingTransport;

const MAX_SNIPPET_CHARS: usize = 4000;

fn labelled_code_patterns() -> &'static [Regex; 3] {
    static RE: OnceLock<[Regex; 3]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            Regex::new(r"(?i)cnae\s*:?\s*(\d{2}\.?\d{2}[\d.\-/]*)").expect("cnae pattern is valid"),
            Regex::new(r"(?i)atividade\s+principal\s*:?\s*(\d{2}\.?\d{2}[\d.\-/]*)")
                .expect("primary activity pattern is valid"),
            Regex::new(r"(?i)classe\s*:?\s*(\d{2}\.?\d{2}[\d.\-/]*)").expect("class pattern is valid"),
        ]
    })
}

fn nearby_code_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:cnae|atividade|classe|c[oó]digo|classifica[cç][aã]o)\D{0,10}(\d{2}\.?\d{2})")
            .expect("nearby code pattern is valid")
    })
}

/// Four-digit code prefixes found next to classification keywords, in order of appearance.
pub fn extract_category_codes(text: &str) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    let patterns = labelled_code_patterns()
        .iter()
        .chain(std::iter::once(nearby_code_pattern()));
    for re in patterns {
        for caps in re.captures_iter(text) {
            let digits: String = caps[1].chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.len() < 4 {
                continue;
            }
            let prefix = digits[..4].to_string();
            if !codes.contains(&prefix) {
                codes.push(prefix);
            }
        }
    }
    codes
}

/// Resolves the compatible code set: stored hint, live discovery, reference table, static table.
pub struct CategoryResolver {
    cache: TieredCache,
    sources: Vec<Arc<dyn SnippetSource>>,
    lookup_timeout: Duration,
}

impl CategoryResolver {
    pub fn new(cache: TieredCache, sources: Vec<Arc<dyn SnippetSource>>, lookup_timeout: Duration) -> Self {
        Self {
            cache,
            sources,
            lookup_timeout,
        }
    }

    pub fn from_transport(transport: &RetryingTransport, cache: TieredCache, lookup_timeout: Duration) -> Self {
        let sources: Vec<Arc<dyn SnippetSource>> = [SearchEngine::DuckDuckGo, SearchEngine::Mojeek]
            .into_iter()
            .map(|engine| {
                Arc::new(SnippetSearchService::new(transport.clone(), engine)) as Arc<dyn SnippetSource>
            })
            .collect();
        Self::new(cache, sources, lookup_timeout)
    }

    pub async fn compatible_codes(&self, query: &str, cancel: &CancellationToken) -> Vec<String> {
        if let Some(hint) = self.cache.get_category_hint(query).await {
            tracing::debug!(query, codes = ?hint.codes, "Category hint cache hit");
            return hint.codes;
        }

        if let Some(hint) = self.discover(query, cancel).await {
            self.cache.put_category_hint(&hint).await;
            tracing::info!(query, codes = ?hint.codes, "Category codes discovered from search");
            return hint.codes;
        }

        let mut reference: Vec<String> = Vec::new();
        for code in self.cache.reference_codes(&query_keywords(query)).await {
            let prefix: String = code.chars().filter(|c| c.is_ascii_digit()).take(4).collect();
            if prefix.len() == 4 && !reference.contains(&prefix) {
                reference.push(prefix);
            }
        }
        if !reference.is_empty() {
            tracing::debug!(query, codes = ?reference, "Category codes from reference table");
            return reference;
        }

        let fallback = static_compatible_codes(query);
        tracing::debug!(query, codes = ?fallback, "Category codes from static table");
        fallback
    }

    /// Queries every engine and unions the codes found. `None` when nothing was found.
    async fn discover(&self, query: &str, cancel: &CancellationToken) -> Option<CategoryHint> {
        let search = format!("\"{}\" CNAE atividade econômica", query);
        let mut snippet = String::new();
        let mut codes: Vec<String> = Vec::new();

        for source in &self.sources {
            if cancel.is_cancelled() {
                break;
            }
            match tokio::time::timeout(self.lookup_timeout, source.snippets(&search, cancel)).await {
                Ok(Ok(text)) => {
                    for code in extract_category_codes(&text) {
                        if !codes.contains(&code) {
                            codes.push(code);
                        }
                    }
                    if !snippet.is_empty() {
                        snippet.push('\n');
                    }
                    snippet.push_str(&text);
                }
                Ok(Err(e)) => {
                    tracing::warn!(source = source.name(), error = %e, "Category discovery search failed");
                }
                Err(_) => {
                    tracing::warn!(source = source.name(), "Category discovery search timed out");
                }
            }
        }

        if codes.is_empty() {
            return None;
        }
        Some(CategoryHint {
            query: query.to_string(),
            codes,
            snippet: snippet.chars().take(MAX_SNIPPET_CHARS).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_labelled_and_nearby_codes() {
        let text = "Farmácia Boa - CNAE: 4771-7/01 comércio varejista.\n\
                    Atividade principal 47.73-3-00. Classe 4772-5.\n\
                    Código da atividade: 4771";
        assert_eq!(extract_category_codes(text), vec!["4771", "4773", "4772"]);
    }

    #[test]
    fn ignores_unlabelled_numbers() {
        assert!(extract_category_codes("Rua das Flores, 1234 - CEP 13010-000").is_empty());
    }
}
