use async_trait::async_trait;
use regex::Regex;
use reqwest::header::ACCEPT_LANGUAGE;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

use crate::errors::AppError;
use crate::registry::RegistryId;
use crate::transport::RetryingTransport;

const ACCEPT_LANGUAGE_PT_BR: &str = "pt-BR,pt;q=0.9,en;q=0.5";

/// Search engines whose result pages are read as plain snippet text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchEngine {
    DuckDuckGo,
    Bing,
    Mojeek,
}

impl SearchEngine {
    pub fn name(&self) -> &'static str {
        match self {
            SearchEngine::DuckDuckGo => "duckduckgo",
            SearchEngine::Bing => "bing",
            SearchEngine::Mojeek => "mojeek",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            SearchEngine::DuckDuckGo => "https://lite.duckduckgo.com",
            SearchEngine::Bing => "https://www.bing.com",
            SearchEngine::Mojeek => "https://www.mojeek.com",
        }
    }

    fn path(&self) -> &'static str {
        match self {
            SearchEngine::DuckDuckGo => "/lite/",
            SearchEngine::Bing | SearchEngine::Mojeek => "/search",
        }
    }
}

/// Anything that turns a free-text query into result snippet text.
#[async_trait]
pub trait SnippetSource: Send + Sync {
    fn name(&self) -> &str;

    async fn snippets(&self, query: &str, cancel: &CancellationToken) -> Result<String, AppError>;
}

pub struct SnippetSearchService {
    transport: RetryingTransport,
    engine: SearchEngine,
    base_url: String,
}

impl SnippetSearchService {
    pub fn new(transport: RetryingTransport, engine: SearchEngine) -> Self {
        Self::with_base_url(transport, engine, engine.default_base_url())
    }

    pub fn with_base_url(
        transport: RetryingTransport,
        engine: SearchEngine,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            engine,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn engine(&self) -> SearchEngine {
        self.engine
    }
}

#[async_trait]
impl SnippetSource for SnippetSearchService {
    fn name(&self) -> &str {
        self.engine.name()
    }

    async fn snippets(&self, query: &str, cancel: &CancellationToken) -> Result<String, AppError> {
        let url = Url::parse_with_params(
            &format!("{}{}", self.base_url, self.engine.path()),
            &[("q", query)],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        tracing::debug!(engine = self.engine.name(), query, "Fetching search snippets");

        let request = self
            .transport
            .client()
            .get(url)
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_PT_BR)
            .build()?;
        let response = self.transport.send(request, cancel).await?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "{} returned status {}",
                self.engine.name(),
                response.status()
            )));
        }

        let html = response.text().await?;
        Ok(html_to_text(&html))
    }
}

fn regex(slot: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    slot.get_or_init(|| Regex::new(pattern).expect("literal pattern is valid"))
}

fn script_blocks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>")
}

fn anchor_href() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>"#)
}

fn block_tags() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)<\s*(br|/p|/div|/li|/tr|/td|/h[1-6]|/article|/section)\b[^>]*>")
}

fn any_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<[^>]*>")
}

/// Search engines wrap result links in redirects; the target sits in a query parameter.
fn unwrap_redirect(href: &str) -> String {
    let Ok(url) = Url::parse(href).or_else(|_| Url::parse(&format!("https:{}", href))) else {
        return href.to_string();
    };
    url.query_pairs()
        .find(|(k, _)| k == "uddg")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| href.to_string())
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Visible text of an HTML page, one block per line, with link targets kept inline.
pub fn html_to_text(html: &str) -> String {
    let text = script_blocks().replace_all(html, " ");
    let text = anchor_href().replace_all(&text, |caps: &regex::Captures| {
        format!(" {} ", unwrap_redirect(&caps[1]))
    });
    let text = block_tags().replace_all(&text, "\n");
    let text = any_tag().replace_all(&text, " ");
    decode_entities(&text)
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Company details from a registry lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryDetails {
    pub legal_name: String,
    pub trade_name: String,
    pub status: String,
    /// Digits only.
    pub category_code: String,
    pub category_desc: String,
    pub municipality: String,
    pub state: String,
    pub partners: Vec<String>,
}

/// A public registry API that resolves an identifier to company details.
#[async_trait]
pub trait RegistryDetailsSource: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the registry does not know the identifier.
    async fn details(
        &self,
        id: &RegistryId,
        cancel: &CancellationToken,
    ) -> Result<Option<RegistryDetails>, AppError>;
}

fn digits_of(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[derive(Debug, Deserialize)]
struct BrasilApiPartner {
    #[serde(default)]
    nome_socio: String,
}

#[derive(Debug, Deserialize)]
struct BrasilApiCompany {
    #[serde(default)]
    razao_social: String,
    #[serde(default)]
    nome_fantasia: Option<String>,
    #[serde(default)]
    descricao_situacao_cadastral: Option<String>,
    #[serde(default)]
    cnae_fiscal: Value,
    #[serde(default)]
    cnae_fiscal_descricao: Option<String>,
    #[serde(default)]
    municipio: Option<String>,
    #[serde(default)]
    uf: Option<String>,
    #[serde(default)]
    qsa: Vec<BrasilApiPartner>,
}

impl From<BrasilApiCompany> for RegistryDetails {
    fn from(c: BrasilApiCompany) -> Self {
        Self {
            legal_name: c.razao_social,
            trade_name: c.nome_fantasia.unwrap_or_default(),
            status: c.descricao_situacao_cadastral.unwrap_or_default(),
            category_code: digits_of(&text_of(&c.cnae_fiscal)),
            category_desc: c.cnae_fiscal_descricao.unwrap_or_default(),
            municipality: c.municipio.unwrap_or_default(),
            state: c.uf.unwrap_or_default(),
            partners: c
                .qsa
                .into_iter()
                .map(|p| p.nome_socio)
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }
}

pub struct BrasilApiService {
    transport: RetryingTransport,
    base_url: String,
}

impl BrasilApiService {
    pub fn new(transport: RetryingTransport) -> Self {
        Self::with_base_url(transport, "https://brasilapi.com.br")
    }

    pub fn with_base_url(transport: RetryingTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RegistryDetailsSource for BrasilApiService {
    fn name(&self) -> &str {
        "brasilapi"
    }

    async fn details(
        &self,
        id: &RegistryId,
        cancel: &CancellationToken,
    ) -> Result<Option<RegistryDetails>, AppError> {
        let url = format!("{}/api/cnpj/v1/{}", self.base_url, id.digits());
        tracing::info!("Fetching BrasilAPI company data for: {}", id.formatted());

        let request = self.transport.client().get(&url).build()?;
        let response = self.transport.send(request, cancel).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "BrasilAPI returned status {}",
                response.status()
            )));
        }

        let company: BrasilApiCompany = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse BrasilAPI response: {}", e))
        })?;
        Ok(Some(company.into()))
    }
}

#[derive(Debug, Deserialize)]
struct ReceitaWsActivity {
    #[serde(default)]
    code: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ReceitaWsPartner {
    #[serde(default)]
    nome: String,
}

#[derive(Debug, Deserialize)]
struct ReceitaWsCompany {
    #[serde(default)]
    status: String,
    #[serde(default)]
    nome: String,
    #[serde(default)]
    fantasia: String,
    #[serde(default)]
    situacao: String,
    #[serde(default)]
    atividade_principal: Vec<ReceitaWsActivity>,
    #[serde(default)]
    municipio: String,
    #[serde(default)]
    uf: String,
    #[serde(default)]
    qsa: Vec<ReceitaWsPartner>,
}

impl From<ReceitaWsCompany> for RegistryDetails {
    fn from(c: ReceitaWsCompany) -> Self {
        let (category_code, category_desc) = c
            .atividade_principal
            .into_iter()
            .next()
            .map(|a| (digits_of(&a.code), a.text))
            .unwrap_or_default();
        Self {
            legal_name: c.nome,
            trade_name: c.fantasia,
            status: c.situacao,
            category_code,
            category_desc,
            municipality: c.municipio,
            state: c.uf,
            partners: c
                .qsa
                .into_iter()
                .map(|p| p.nome)
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }
}

pub struct ReceitaWsService {
    transport: RetryingTransport,
    base_url: String,
}

impl ReceitaWsService {
    pub fn new(transport: RetryingTransport) -> Self {
        Self::with_base_url(transport, "https://receitaws.com.br")
    }

    pub fn with_base_url(transport: RetryingTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RegistryDetailsSource for ReceitaWsService {
    fn name(&self) -> &str {
        "receitaws"
    }

    async fn details(
        &self,
        id: &RegistryId,
        cancel: &CancellationToken,
    ) -> Result<Option<RegistryDetails>, AppError> {
        let url = format!("{}/v1/cnpj/{}", self.base_url, id.digits());
        tracing::info!("Fetching ReceitaWS company data for: {}", id.formatted());

        let request = self.transport.client().get(&url).build()?;
        let response = self.transport.send(request, cancel).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "ReceitaWS returned status {}",
                response.status()
            )));
        }

        let company: ReceitaWsCompany = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse ReceitaWS response: {}", e))
        })?;
        if company.status.eq_ignore_ascii_case("error") {
            return Ok(None);
        }
        Ok(Some(company.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_to_text_keeps_blocks_and_links() {
        let html = r#"<html><head><style>p{color:red}</style></head><body>
            <table><tr><td><a href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.instagram.com%2Fpadariasol%2F&amp;rut=x">Padaria Sol</a></td></tr>
            <tr><td class="result-snippet">CNPJ 11.222.333/0001-81 &amp; mais</td></tr></table>
            <script>var x = "<b>";</script></body></html>"#;
        let text = html_to_text(html);
        assert!(text.contains("https://www.instagram.com/padariasol/"));
        assert!(text.contains("CNPJ 11.222.333/0001-81 & mais"));
        assert!(!text.contains("color:red"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn brasilapi_numeric_category_code_is_read() {
        let company: BrasilApiCompany = serde_json::from_value(serde_json::json!({
            "razao_social": "PADARIA SOL LTDA",
            "nome_fantasia": null,
            "descricao_situacao_cadastral": "ATIVA",
            "cnae_fiscal": 1091102,
            "cnae_fiscal_descricao": "Fabricação de produtos de padaria",
            "municipio": "CAMPINAS",
            "uf": "SP",
            "qsa": [{"nome_socio": "MARIA SILVA"}, {"nome_socio": ""}]
        }))
        .unwrap();
        let details = RegistryDetails::from(company);
        assert_eq!(details.category_code, "1091102");
        assert_eq!(details.trade_name, "");
        assert_eq!(details.partners, vec!["MARIA SILVA"]);
    }

    #[test]
    fn receitaws_activity_code_is_digits_only() {
        let company: ReceitaWsCompany = serde_json::from_value(serde_json::json!({
            "status": "OK",
            "nome": "FARMACIA BOA LTDA",
            "situacao": "ATIVA",
            "atividade_principal": [{"code": "47.71-7-01", "text": "Comércio varejista de produtos farmacêuticos"}],
            "municipio": "CAMPINAS",
            "uf": "SP"
        }))
        .unwrap();
        let details = RegistryDetails::from(company);
        assert_eq!(details.category_code, "4771701");
        assert_eq!(details.legal_name, "FARMACIA BOA LTDA");
    }
}
