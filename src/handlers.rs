use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::errors::AppError;
use crate::models::{Lead, SearchRequest, SearchResponse};
use crate::pipeline::SearchPipeline;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state injected into handlers.
pub struct AppState {
    pub pipeline: SearchPipeline,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InvalidateResponse {
    pub status: String,
    pub key: String,
}

/// Query string of the cache invalidation endpoint. Flags accept `0|1` or `false|true`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct InvalidateParams {
    pub query: Option<String>,
    pub location: Option<String>,
    pub enrich_cnpj: Option<String>,
    pub enrich_instagram: Option<String>,
}

fn flag(value: Option<&str>) -> Result<bool, AppError> {
    match value.map(str::trim).unwrap_or_default() {
        "" | "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        other => Err(AppError::BadRequest(format!(
            "invalid flag value '{}', expected 0 or 1",
            other
        ))),
    }
}

impl InvalidateParams {
    fn into_request(self) -> Result<SearchRequest, AppError> {
        let request = SearchRequest {
            enrich_cnpj: flag(self.enrich_cnpj.as_deref())?,
            enrich_instagram: flag(self.enrich_instagram.as_deref())?,
            query: self.query.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
        };
        request.validated()
    }
}

/// Liveness probe. Not rate limited.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        time: Utc::now(),
    })
}

/// POST /api/v1/search
///
/// Runs discovery and the requested enrichments, or answers from cache.
#[utoipa::path(
    post,
    path = "/api/v1/search",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "Leads found", body = SearchResponse),
        (status = 400, description = "query or location missing"),
        (status = 500, description = "Pipeline failure")
    )
)]
pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    tracing::info!(
        "POST /search - query: {:?}, location: {:?}, cnpj: {}, instagram: {}",
        request.query,
        request.location,
        request.enrich_cnpj,
        request.enrich_instagram
    );
    let response = state.pipeline.run(request).await?;
    Ok(Json(response))
}

/// DELETE /api/v1/search/cache
///
/// Drops one search from the in-process cache.
#[utoipa::path(
    delete,
    path = "/api/v1/search/cache",
    params(InvalidateParams),
    responses(
        (status = 200, description = "Entry removed", body = InvalidateResponse),
        (status = 400, description = "query or location missing"),
        (status = 503, description = "Search cache not configured")
    )
)]
pub async fn invalidate_search_cache(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InvalidateParams>,
) -> Result<Json<InvalidateResponse>, AppError> {
    let request = params.into_request()?;
    let key = state.pipeline.invalidate(&request).await?;
    Ok(Json(InvalidateResponse {
        status: "deleted".to_string(),
        key,
    }))
}

#[derive(OpenApi)]
#[openapi(
    paths(health, search, invalidate_search_cache),
    components(schemas(
        HealthResponse,
        InvalidateResponse,
        SearchRequest,
        SearchResponse,
        Lead
    )),
    info(title = "Lead discovery API", version = "0.1.0")
)]
pub struct ApiDoc;

pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

/// Swagger UI page loading the generated OpenAPI document.
pub async fn swagger_ui() -> impl IntoResponse {
    let html = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Lead API - Swagger UI</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>body { margin: 0; padding: 0; }</style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({ url: "/api-docs/openapi.json", dom_id: '#swagger-ui' });
        };
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}

/// Routes that sit behind the body limit and, in the server, the rate limiter.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/docs", get(swagger_ui))
        .route("/api-docs/openapi.json", get(openapi_json))
        .route("/api/v1/search", post(search))
        .route("/api/v1/search/cache", delete(invalidate_search_cache))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}

/// Full application without per-IP rate limiting.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_digits_and_words() {
        assert!(!flag(None).unwrap());
        assert!(flag(Some("1")).unwrap());
        assert!(flag(Some("true")).unwrap());
        assert!(flag(Some("yes")).is_err());
    }

    #[test]
    fn invalidate_params_require_query_and_location() {
        let params = InvalidateParams {
            location: Some("Campinas, SP".into()),
            ..InvalidateParams::default()
        };
        assert!(matches!(params.into_request(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn openapi_lists_the_three_endpoints() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/health"));
        assert!(paths.contains_key("/api/v1/search"));
        assert!(paths.contains_key("/api/v1/search/cache"));
    }
}
