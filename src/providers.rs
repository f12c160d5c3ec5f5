//! Discovery providers. Each turns `(query, location)` into raw leads.

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::USER_AGENT;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

use crate::errors::AppError;
use crate::models::Lead;
use crate::normalize::{clean_phone, is_valid_email, normalize_name, parse_location};
use crate::services::{SearchEngine, SnippetSearchService, SnippetSource};
use crate::transport::RetryingTransport;

/// Nominatim and Overpass ask clients to identify themselves.
const OSM_USER_AGENT: &str = "rust-lead-api/0.1 (business lead discovery)";

#[async_trait]
pub trait LeadProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Lead>, AppError>;
}

fn has_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(k))
}

/// OSM tag filters for a query; generic shop/amenity when the category is unknown.
pub fn osm_tags(query: &str) -> Vec<&'static str> {
    let q = normalize_name(query);
    if has_any(&q, &["roupa", "vestuario", "moda", "confeccao"]) {
        vec![r#""shop"="clothes""#, r#""shop"="boutique""#, r#""shop"="fashion""#]
    } else if has_any(&q, &["calcado", "sapato", "tenis"]) {
        vec![r#""shop"="shoes""#]
    } else if has_any(&q, &["farmacia", "drogaria"]) {
        vec![r#""amenity"="pharmacy""#]
    } else if has_any(&q, &["restaurante", "lanchonete", "comida"]) {
        vec![r#""amenity"="restaurant""#, r#""amenity"="fast_food""#, r#""amenity"="cafe""#]
    } else if has_any(&q, &["supermercado", "mercado", "mercadinho"]) {
        vec![r#""shop"="supermarket""#, r#""shop"="convenience""#]
    } else if has_any(&q, &["academia", "fitness", "musculacao"]) {
        vec![r#""leisure"="fitness_centre""#, r#""leisure"="sports_centre""#]
    } else if has_any(&q, &["padaria", "confeitaria"]) {
        vec![r#""shop"="bakery""#]
    } else if has_any(&q, &["barbearia", "cabeleireiro", "salao"]) {
        vec![r#""shop"="hairdresser""#, r#""shop"="barber""#]
    } else if has_any(&q, &["pet", "veterinaria"]) {
        vec![r#""shop"="pet""#, r#""amenity"="veterinary""#]
    } else {
        vec![r#""shop""#, r#""amenity""#]
    }
}

/// Overpass QL selecting nodes and ways with any of the tags inside the bounding box.
pub fn overpass_query(tags: &[&str], bbox: &str) -> String {
    let blocks: String = tags
        .iter()
        .map(|tag| format!("node[{tag}]({bbox});way[{tag}]({bbox});"))
        .collect();
    format!("[out:json][timeout:30];({blocks});out body;")
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    #[serde(default)]
    boundingbox: Vec<String>,
    #[serde(default)]
    lat: String,
    #[serde(default)]
    lon: String,
}

impl NominatimPlace {
    /// Overpass order: south,west,north,east.
    fn bbox(&self) -> Option<String> {
        if let [south, north, west, east] = self.boundingbox.as_slice() {
            return Some(format!("{},{},{},{}", south, west, north, east));
        }
        let lat: f64 = self.lat.parse().ok()?;
        let lon: f64 = self.lon.parse().ok()?;
        Some(format!(
            "{:.6},{:.6},{:.6},{:.6}",
            lat - 0.05,
            lon - 0.05,
            lat + 0.05,
            lon + 0.05
        ))
    }
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(default)]
    tags: HashMap<String, String>,
}

impl OverpassElement {
    fn tag(&self, key: &str) -> &str {
        self.tags.get(key).map(String::as_str).unwrap_or_default()
    }

    fn into_lead(self, city: &str, state: &str) -> Option<Lead> {
        let name = self.tag("name").trim();
        if name.is_empty() {
            return None;
        }
        let mut lead = Lead::new(name, "overpass");
        let phone = [self.tag("phone"), self.tag("contact:phone")]
            .into_iter()
            .find(|p| !p.is_empty())
            .unwrap_or_default();
        lead.phone = clean_phone(phone);
        lead.phone2 = clean_phone(self.tag("phone:2"));
        lead.website = [self.tag("website"), self.tag("contact:website")]
            .into_iter()
            .find(|w| !w.is_empty())
            .unwrap_or_default()
            .to_string();
        let email = self.tag("email");
        if is_valid_email(email) {
            lead.email = email.to_string();
        }
        let street = self.tag("addr:street");
        if !street.is_empty() {
            lead.address = match self.tag("addr:housenumber") {
                "" => street.to_string(),
                number => format!("{}, {}", street, number),
            };
        }
        lead.category = [self.tag("shop"), self.tag("amenity"), self.tag("leisure")]
            .into_iter()
            .find(|c| !c.is_empty())
            .unwrap_or_default()
            .to_string();
        lead.city = city.to_string();
        lead.state = state.to_string();
        Some(lead)
    }
}

/// OpenStreetMap: Nominatim for the city's bounding box, Overpass for the places in it.
pub struct OverpassProvider {
    transport: RetryingTransport,
    nominatim_url: String,
    overpass_url: String,
}

impl OverpassProvider {
    pub fn new(transport: RetryingTransport) -> Self {
        Self::with_endpoints(
            transport,
            "https://nominatim.openstreetmap.org",
            "https://overpass-api.de",
        )
    }

    pub fn with_endpoints(
        transport: RetryingTransport,
        nominatim_url: impl Into<String>,
        overpass_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            nominatim_url: nominatim_url.into().trim_end_matches('/').to_string(),
            overpass_url: overpass_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn bounding_box(
        &self,
        city: &str,
        state: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AppError> {
        let place = format!("{}, {}, Brazil", city, state);
        let url = Url::parse_with_params(
            &format!("{}/search", self.nominatim_url),
            &[("q", place.as_str()), ("format", "json"), ("limit", "1")],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        let request = self
            .transport
            .client()
            .get(url)
            .header(USER_AGENT, OSM_USER_AGENT)
            .build()?;
        let response = self.transport.send(request, cancel).await?;
        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Nominatim returned status {}",
                response.status()
            )));
        }

        let places: Vec<NominatimPlace> = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Nominatim response: {}", e))
        })?;
        places
            .first()
            .and_then(NominatimPlace::bbox)
            .ok_or_else(|| AppError::ExternalApiError(format!("City not found: {}", place)))
    }
}

#[async_trait]
impl LeadProvider for OverpassProvider {
    fn name(&self) -> &str {
        "overpass"
    }

    async fn search(
        &self,
        query: &str,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Lead>, AppError> {
        let (city, state) = parse_location(location);
        let bbox = self.bounding_box(&city, &state, cancel).await?;
        let ql = overpass_query(&osm_tags(query), &bbox);

        let url = Url::parse_with_params(
            &format!("{}/api/interpreter", self.overpass_url),
            &[("data", ql.as_str())],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;
        let request = self
            .transport
            .client()
            .get(url)
            .header(USER_AGENT, OSM_USER_AGENT)
            .build()?;
        let response = self.transport.send(request, cancel).await?;
        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Overpass returned status {}",
                response.status()
            )));
        }

        let body: OverpassResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Overpass response: {}", e))
        })?;
        Ok(body
            .elements
            .into_iter()
            .filter_map(|el| el.into_lead(&city, &state))
            .collect())
    }
}

fn snippet_phone() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\(?\d{2}\)?\s*\d{4,5}[-\s]?\d{4}").expect("phone pattern is valid")
    })
}

fn snippet_email() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}").expect("email pattern is valid")
    })
}

fn snippet_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://\S+").expect("url pattern is valid"))
}

fn trailing_separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s\-|·•,:]+$").expect("separator pattern is valid"))
}

/// Leads from result text: every line carrying a phone or email, named by what remains.
///
/// Lines that leave no usable name are dropped.
pub fn extract_leads_from_text(text: &str, city: &str, state: &str, source: &str) -> Vec<Lead> {
    let mut leads = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| l.len() >= 5) {
        let phones: Vec<&str> = snippet_phone()
            .find_iter(line)
            .take(2)
            .map(|m| m.as_str())
            .collect();
        let email = snippet_email()
            .find(line)
            .map(|m| m.as_str())
            .filter(|e| is_valid_email(e));
        if phones.is_empty() && email.is_none() {
            continue;
        }

        let name = snippet_phone().replace_all(line, "");
        let name = snippet_email().replace_all(&name, "");
        let name = snippet_url().replace_all(&name, "");
        let name = trailing_separators().replace_all(name.trim(), "");
        let name = name.trim();
        let name_len = name.chars().count();
        if name_len <= 3 || name_len >= 100 {
            continue;
        }

        let mut lead = Lead::new(name, source);
        if let Some(phone) = phones.first() {
            lead.phone = clean_phone(phone);
        }
        if let Some(phone) = phones.get(1) {
            lead.phone2 = clean_phone(phone);
        }
        if let Some(email) = email {
            lead.email = email.to_string();
        }
        lead.city = city.to_string();
        lead.state = state.to_string();
        leads.push(lead);
    }
    leads
}

/// Business listings read from a search engine's result snippets.
pub struct SearchEngineLeadProvider {
    name: &'static str,
    source: Arc<dyn SnippetSource>,
}

impl SearchEngineLeadProvider {
    pub fn new(transport: RetryingTransport, engine: SearchEngine) -> Self {
        Self::with_source(engine.name(), Arc::new(SnippetSearchService::new(transport, engine)))
    }

    pub fn with_source(name: &'static str, source: Arc<dyn SnippetSource>) -> Self {
        Self { name, source }
    }
}

#[async_trait]
impl LeadProvider for SearchEngineLeadProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn search(
        &self,
        query: &str,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Lead>, AppError> {
        let (city, state) = parse_location(location);
        let search = format!("\"{}\" \"{}\" {} telefone endereço", query, city, state);
        let text = self.source.snippets(search.trim(), cancel).await?;
        Ok(extract_leads_from_text(&text, &city, &state, self.name))
    }
}

/// Geoapify place category for a query.
pub fn geoapify_category(query: &str) -> &'static str {
    let q = normalize_name(query);
    if has_any(&q, &["roupa", "vestuario", "moda", "confeccao"]) {
        "commercial.clothing"
    } else if has_any(&q, &["calcado", "sapato"]) {
        "commercial.clothing.shoes"
    } else if has_any(&q, &["farmacia", "drogaria"]) {
        "healthcare.pharmacy"
    } else if has_any(&q, &["restaurante", "lanchonete"]) {
        "catering.restaurant"
    } else if has_any(&q, &["supermercado", "mercado"]) {
        "commercial.supermarket"
    } else if has_any(&q, &["academia", "fitness"]) {
        "sport.fitness"
    } else if has_any(&q, &["padaria"]) {
        "commercial.food_and_drink.bakery"
    } else if has_any(&q, &["barbearia", "cabeleireiro", "salao"]) {
        "service.beauty.hairdresser"
    } else if has_any(&q, &["pet", "veterinaria"]) {
        "pet"
    } else {
        "commercial"
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct PlacesResponse {
    #[serde(default)]
    features: Vec<PlaceFeature>,
}

#[derive(Debug, Deserialize)]
struct PlaceFeature {
    properties: PlaceProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlaceProperties {
    name: String,
    street: String,
    housenumber: String,
    categories: Vec<String>,
    datasource: Option<PlaceDatasource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlaceDatasource {
    raw: HashMap<String, serde_json::Value>,
}

impl PlaceProperties {
    fn raw(&self, key: &str) -> String {
        self.datasource
            .as_ref()
            .and_then(|d| d.raw.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

/// Geoapify Places, searched within 10 km of the geocoded city centre.
pub struct GeoapifyProvider {
    transport: RetryingTransport,
    api_key: String,
    base_url: String,
}

impl GeoapifyProvider {
    pub fn new(transport: RetryingTransport, api_key: impl Into<String>) -> Self {
        Self::with_base_url(transport, api_key, "https://api.geoapify.com")
    }

    pub fn with_base_url(
        transport: RetryingTransport,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: Url,
        what: &str,
        cancel: &CancellationToken,
    ) -> Result<T, AppError> {
        let request = self.transport.client().get(url).build()?;
        let response = self.transport.send(request, cancel).await?;
        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Geoapify {} returned status {}",
                what,
                response.status()
            )));
        }
        response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Geoapify {} response: {}", what, e))
        })
    }
}

#[async_trait]
impl LeadProvider for GeoapifyProvider {
    fn name(&self) -> &str {
        "geoapify"
    }

    async fn search(
        &self,
        query: &str,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Lead>, AppError> {
        let (city, state) = parse_location(location);
        let place = format!("{}, {}, Brazil", city, state);
        let geocode_url = Url::parse_with_params(
            &format!("{}/v1/geocode/search", self.base_url),
            &[
                ("text", place.as_str()),
                ("format", "json"),
                ("apiKey", self.api_key.as_str()),
            ],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;
        let geocode: GeocodeResponse = self.get_json(geocode_url, "geocode", cancel).await?;
        let centre = geocode
            .results
            .first()
            .ok_or_else(|| AppError::ExternalApiError(format!("City not found: {}", place)))?;

        let filter = format!("circle:{},{},10000", centre.lon, centre.lat);
        let places_url = Url::parse_with_params(
            &format!("{}/v2/places", self.base_url),
            &[
                ("categories", geoapify_category(query)),
                ("filter", filter.as_str()),
                ("limit", "200"),
                ("apiKey", self.api_key.as_str()),
            ],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;
        let places: PlacesResponse = self.get_json(places_url, "places", cancel).await?;

        Ok(places
            .features
            .into_iter()
            .filter_map(|feature| {
                let p = feature.properties;
                let name = p.name.trim();
                if name.is_empty() {
                    return None;
                }
                let mut lead = Lead::new(name, "geoapify");
                lead.phone = clean_phone(&p.raw("phone"));
                lead.website = p.raw("website");
                let email = p.raw("email");
                if is_valid_email(&email) {
                    lead.email = email;
                }
                if !p.street.is_empty() {
                    lead.address = if p.housenumber.is_empty() {
                        p.street.clone()
                    } else {
                        format!("{}, {}", p.street, p.housenumber)
                    };
                }
                lead.category = p.categories.first().cloned().unwrap_or_default();
                lead.city = city.clone();
                lead.state = state.clone();
                Some(lead)
            })
            .collect())
    }
}

/// Every provider this deployment can use.
pub fn default_providers(
    transport: &RetryingTransport,
    geoapify_api_key: Option<&str>,
) -> Vec<Arc<dyn LeadProvider>> {
    let mut providers: Vec<Arc<dyn LeadProvider>> = vec![
        Arc::new(OverpassProvider::new(transport.clone())),
        Arc::new(SearchEngineLeadProvider::new(transport.clone(), SearchEngine::DuckDuckGo)),
        Arc::new(SearchEngineLeadProvider::new(transport.clone(), SearchEngine::Bing)),
        Arc::new(SearchEngineLeadProvider::new(transport.clone(), SearchEngine::Mojeek)),
    ];
    if let Some(key) = geoapify_api_key.filter(|k| !k.trim().is_empty()) {
        providers.push(Arc::new(GeoapifyProvider::new(transport.clone(), key)));
    }
    providers
}
