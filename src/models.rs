use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;
use uuid::Uuid;

/// Delimiter used when the provider provenance list is rendered as a single string.
pub const SOURCE_DELIMITER: char = '+';

/// Whether a lead's resolved category code fits the searched category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CategoryMatch {
    #[default]
    Unknown,
    Compatible,
    Incompatible,
}

impl CategoryMatch {
    pub fn is_unknown(&self) -> bool {
        matches!(self, CategoryMatch::Unknown)
    }
}

impl Serialize for CategoryMatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CategoryMatch::Unknown => serializer.serialize_none(),
            CategoryMatch::Compatible => serializer.serialize_bool(true),
            CategoryMatch::Incompatible => serializer.serialize_bool(false),
        }
    }
}

impl<'de> Deserialize<'de> for CategoryMatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<bool>::deserialize(deserializer)? {
            None => CategoryMatch::Unknown,
            Some(true) => CategoryMatch::Compatible,
            Some(false) => CategoryMatch::Incompatible,
        })
    }
}

mod source_list {
    use super::SOURCE_DELIMITER;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(sources: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&sources.join(&SOURCE_DELIMITER.to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw
            .split(SOURCE_DELIMITER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// One business candidate, raw from a provider or enriched.
///
/// Enrichment fields stay empty until the registry or social axis resolves them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Lead {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phone: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phone2: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub city: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub website: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rating: String,
    /// Providers that contributed to this record, in contribution order.
    #[serde(rename = "source", default, with = "source_list")]
    #[schema(value_type = String, example = "overpass+duckduckgo")]
    pub sources: Vec<String>,

    #[serde(rename = "cnpj", default, skip_serializing_if = "String::is_empty")]
    pub registry_id: String,
    #[serde(rename = "razao_social", default, skip_serializing_if = "String::is_empty")]
    pub legal_name: String,
    #[serde(rename = "nome_fantasia", default, skip_serializing_if = "String::is_empty")]
    pub trade_name: String,
    #[serde(rename = "situacao", default, skip_serializing_if = "String::is_empty")]
    pub registry_status: String,
    #[serde(rename = "cnae_code", default, skip_serializing_if = "String::is_empty")]
    pub category_code: String,
    #[serde(rename = "cnae_desc", default, skip_serializing_if = "String::is_empty")]
    pub category_desc: String,
    #[serde(rename = "municipio", default, skip_serializing_if = "String::is_empty")]
    pub resolved_municipality: String,
    #[serde(rename = "uf", default, skip_serializing_if = "String::is_empty")]
    pub resolved_state: String,
    #[serde(rename = "socios", default, skip_serializing_if = "Vec::is_empty")]
    pub partners: Vec<String>,
    #[serde(rename = "cnae_match", default, skip_serializing_if = "CategoryMatch::is_unknown")]
    #[schema(value_type = Option<bool>)]
    pub category_match: CategoryMatch,
    #[serde(rename = "instagram", default, skip_serializing_if = "String::is_empty")]
    pub social_handle: String,
    #[serde(rename = "followers", default, skip_serializing_if = "String::is_empty")]
    pub follower_count: String,
}

impl Lead {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: vec![source.into()],
            ..Self::default()
        }
    }

    /// Completeness score used to pick which duplicate keeps its identity.
    pub fn quality_score(&self) -> u32 {
        let mut score = 0;
        if !self.phone.is_empty() {
            score += 3;
        }
        if !self.address.is_empty() {
            score += 2;
        }
        if !self.registry_id.is_empty() {
            score += 2;
        }
        if !self.website.is_empty() {
            score += 1;
        }
        if !self.email.is_empty() {
            score += 1;
        }
        if !self.category.is_empty() {
            score += 1;
        }
        score
    }

    /// Appends providers not already present, keeping first-contribution order.
    pub fn add_sources<'a>(&mut self, others: impl IntoIterator<Item = &'a String>) {
        for source in others {
            if !self.sources.iter().any(|s| s == source) {
                self.sources.push(source.clone());
            }
        }
    }

    pub fn source_label(&self) -> String {
        self.sources.join(&SOURCE_DELIMITER.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    /// "City, UF", for example "Campinas, SP".
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub enrich_cnpj: bool,
    #[serde(default)]
    pub enrich_instagram: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            location: location.into(),
            ..Self::default()
        }
    }

    /// Trims both text fields and rejects the request when either is blank.
    pub fn validated(mut self) -> Result<Self, crate::errors::AppError> {
        self.query = self.query.trim().to_string();
        self.location = self.location.trim().to_string();
        if self.query.is_empty() {
            return Err(crate::errors::AppError::BadRequest(
                "query is required".to_string(),
            ));
        }
        if self.location.is_empty() {
            return Err(crate::errors::AppError::BadRequest(
                "location is required".to_string(),
            ));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchResponse {
    pub query: String,
    pub location: String,
    pub enrich_cnpj: bool,
    pub enrich_instagram: bool,
    pub total: usize,
    pub discarded: usize,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_id: Option<Uuid>,
    #[serde(default)]
    pub cnae_hint_codes: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub leads: Vec<Lead>,
}

/// Search metadata as kept by the durable store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSearch {
    pub id: Uuid,
    /// Same derived key the L1 layer uses for this search.
    pub cache_key: String,
    pub query: String,
    pub location: String,
    pub enrich_cnpj: bool,
    pub enrich_instagram: bool,
    pub total: i32,
    pub discarded: i32,
    pub duration_ms: i64,
    pub category_codes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Whatever one enrichment axis resolved for a lead; the per-lead cache value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub legal_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trade_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry_status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category_desc: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub municipality: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partners: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub social_handle: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub follower_count: String,
}

/// Category-code prefixes discovered for one raw query string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryHint {
    pub query: String,
    pub codes: Vec<String>,
    #[serde(default)]
    pub snippet: String,
}

/// How one discovery provider fared for a request.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderOutcome {
    pub provider: String,
    pub leads: usize,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    /// Not started because the request deadline had already fired.
    pub skipped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_weights_phone_address_and_registry() {
        let mut lead = Lead::new("Padaria Central", "overpass");
        assert_eq!(lead.quality_score(), 0);
        lead.phone = "11912345678".into();
        lead.address = "Rua A, 10".into();
        lead.registry_id = "11.222.333/0001-81".into();
        lead.website = "https://padaria.example".into();
        lead.email = "contato@padaria.example".into();
        lead.category = "bakery".into();
        assert_eq!(lead.quality_score(), 10);
    }

    #[test]
    fn source_serializes_joined_and_parses_back() {
        let mut lead = Lead::new("Loja", "bing");
        lead.add_sources(&["mojeek".to_string(), "bing".to_string()]);
        let json = serde_json::to_value(&lead).unwrap();
        assert_eq!(json["source"], "bing+mojeek");

        let back: Lead = serde_json::from_value(json).unwrap();
        assert_eq!(back.sources, vec!["bing", "mojeek"]);
    }

    #[test]
    fn category_match_is_tri_state_on_the_wire() {
        let mut lead = Lead::new("Loja", "bing");
        let json = serde_json::to_value(&lead).unwrap();
        assert!(json.get("cnae_match").is_none());

        lead.category_match = CategoryMatch::Incompatible;
        let json = serde_json::to_value(&lead).unwrap();
        assert_eq!(json["cnae_match"], false);
    }

    #[test]
    fn blank_query_is_rejected() {
        let err = SearchRequest::new("  ", "Campinas, SP").validated().unwrap_err();
        assert!(matches!(err, crate::errors::AppError::BadRequest(_)));
    }
}
