/// Integration tests with mocked external APIs
/// Exercises the HTTP adapters against wiremock servers instead of the real services
use rust_lead_api::errors::AppError;
use rust_lead_api::providers::{LeadProvider, OverpassProvider};
use rust_lead_api::registry::RegistryId;
use rust_lead_api::services::{
    BrasilApiService, ReceitaWsService, RegistryDetailsSource, SearchEngine,
    SnippetSearchService, SnippetSource,
};
use rust_lead_api::transport::{BackoffPolicy, RetryingTransport, TransportError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Transport with short delays so retry tests stay fast
fn fast_transport(max_attempts: u32) -> RetryingTransport {
    let policy = BackoffPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
    };
    RetryingTransport::new(Duration::from_secs(5), policy, max_attempts).unwrap()
}

fn cnpj() -> RegistryId {
    RegistryId::parse("11.222.333/0001-81").unwrap()
}

#[tokio::test]
async fn test_transport_retries_503_then_succeeds() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let transport = fast_transport(3);
    let request = transport
        .client()
        .get(format!("{}/flaky", mock_server.uri()))
        .build()
        .unwrap();
    let response = transport
        .send(request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_transport_gives_up_after_max_attempts() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let transport = fast_transport(3);
    let request = transport
        .client()
        .get(format!("{}/down", mock_server.uri()))
        .build()
        .unwrap();
    let err = transport
        .send(request, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        TransportError::Status { status, attempts } => {
            assert_eq!(status.as_u16(), 503);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_transport_does_not_retry_other_statuses() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;

    let transport = fast_transport(3);
    let request = transport
        .client()
        .get(format!("{}/broken", mock_server.uri()))
        .build()
        .unwrap();
    let response = transport
        .send(request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn test_transport_caps_retry_after_hint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let transport = fast_transport(2);
    let request = transport
        .client()
        .get(format!("{}/limited", mock_server.uri()))
        .build()
        .unwrap();

    let started = Instant::now();
    let response = transport
        .send(request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    // The 30s hint is capped at the policy's 50ms maximum
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_transport_respects_cancelled_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let transport = fast_transport(3);
    let request = transport
        .client()
        .get(format!("{}/never", mock_server.uri()))
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = transport.send(request, &cancel).await.unwrap_err();
    assert!(matches!(err, TransportError::Cancelled));
}

#[tokio::test]
async fn test_brasilapi_company_lookup() {
    let mock_server = MockServer::start().await;

    let mock_response = serde_json::json!({
        "cnpj": "11222333000181",
        "razao_social": "CANTINA BELLA LTDA",
        "nome_fantasia": "CANTINA BELLA",
        "descricao_situacao_cadastral": "ATIVA",
        "cnae_fiscal": 5611201,
        "cnae_fiscal_descricao": "Restaurantes e similares",
        "municipio": "CAMPINAS",
        "uf": "SP",
        "qsa": [{"nome_socio": "ANA ROSSI"}]
    });

    Mock::given(method("GET"))
        .and(path("/api/cnpj/v1/11222333000181"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&mock_response))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = BrasilApiService::with_base_url(fast_transport(1), mock_server.uri());
    let details = service
        .details(&cnpj(), &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(details.legal_name, "CANTINA BELLA LTDA");
    assert_eq!(details.category_code, "5611201");
    assert_eq!(details.municipality, "CAMPINAS");
    assert_eq!(details.state, "SP");
    assert_eq!(details.partners, vec!["ANA ROSSI"]);
}

#[tokio::test]
async fn test_brasilapi_unknown_company_is_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/cnpj/v1/11222333000181"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let service = BrasilApiService::with_base_url(fast_transport(1), mock_server.uri());
    let details = service
        .details(&cnpj(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(details.is_none());
}

#[tokio::test]
async fn test_brasilapi_server_error_is_external_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/cnpj/v1/11222333000181"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let service = BrasilApiService::with_base_url(fast_transport(1), mock_server.uri());
    let result = service.details(&cnpj(), &CancellationToken::new()).await;
    assert!(matches!(result, Err(AppError::ExternalApiError(_))));
}

#[tokio::test]
async fn test_receitaws_company_lookup() {
    let mock_server = MockServer::start().await;

    let mock_response = serde_json::json!({
        "status": "OK",
        "nome": "CANTINA BELLA LTDA",
        "fantasia": "CANTINA BELLA",
        "situacao": "ATIVA",
        "atividade_principal": [{"code": "56.11-2-01", "text": "Restaurantes e similares"}],
        "municipio": "CAMPINAS",
        "uf": "SP",
        "qsa": [{"nome": "ANA ROSSI"}]
    });

    Mock::given(method("GET"))
        .and(path("/v1/cnpj/11222333000181"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&mock_response))
        .mount(&mock_server)
        .await;

    let service = ReceitaWsService::with_base_url(fast_transport(1), mock_server.uri());
    let details = service
        .details(&cnpj(), &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(details.trade_name, "CANTINA BELLA");
    assert_eq!(details.category_code, "5611201");
    assert_eq!(details.category_desc, "Restaurantes e similares");
}

#[tokio::test]
async fn test_receitaws_error_status_is_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/cnpj/11222333000181"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ERROR",
            "message": "CNPJ inválido"
        })))
        .mount(&mock_server)
        .await;

    let service = ReceitaWsService::with_base_url(fast_transport(1), mock_server.uri());
    let details = service
        .details(&cnpj(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(details.is_none());
}

#[tokio::test]
async fn test_snippet_search_returns_visible_text() {
    let mock_server = MockServer::start().await;

    let html = r#"<html><body><table>
        <tr><td><a href="https://www.instagram.com/cantinabella/">Cantina Bella (@cantinabella)</a></td></tr>
        <tr><td class="result-snippet">CNPJ 11.222.333/0001-81 - Campinas &amp; região</td></tr>
        </table></body></html>"#;

    Mock::given(method("GET"))
        .and(path("/lite/"))
        .and(query_param("q", "cantina bella campinas cnpj"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service =
        SnippetSearchService::with_base_url(fast_transport(1), SearchEngine::DuckDuckGo, mock_server.uri());
    let text = service
        .snippets("cantina bella campinas cnpj", &CancellationToken::new())
        .await
        .unwrap();

    assert!(text.contains("https://www.instagram.com/cantinabella/"));
    assert!(text.contains("CNPJ 11.222.333/0001-81 - Campinas & região"));
    assert!(!text.contains("<td"));
}

#[tokio::test]
async fn test_snippet_search_blocked_is_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let service =
        SnippetSearchService::with_base_url(fast_transport(1), SearchEngine::Mojeek, mock_server.uri());
    let result = service.snippets("cantina", &CancellationToken::new()).await;
    assert!(matches!(result, Err(AppError::ExternalApiError(_))));
}

#[tokio::test]
async fn test_overpass_provider_resolves_city_then_places() {
    let nominatim = MockServer::start().await;
    let overpass = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "Campinas, SP, Brazil"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"boundingbox": ["-23.0", "-22.7", "-47.2", "-46.9"], "lat": "-22.9", "lon": "-47.06"}
        ])))
        .expect(1)
        .mount(&nominatim)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/interpreter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "elements": [
                {"type": "node", "id": 1, "tags": {
                    "name": "Drogaria Central",
                    "amenity": "pharmacy",
                    "phone": "+55 19 3232-1234",
                    "addr:street": "Rua Barão de Jaguara",
                    "addr:housenumber": "900"
                }},
                {"type": "node", "id": 2, "tags": {"amenity": "pharmacy"}}
            ]
        })))
        .expect(1)
        .mount(&overpass)
        .await;

    let provider = OverpassProvider::with_endpoints(fast_transport(1), nominatim.uri(), overpass.uri());
    let leads = provider
        .search("farmácia", "Campinas, SP", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].name, "Drogaria Central");
    assert_eq!(leads[0].city, "Campinas");
    assert_eq!(leads[0].state, "SP");
    assert_eq!(leads[0].sources, vec!["overpass"]);
    assert!(!leads[0].phone.is_empty());
}

#[tokio::test]
async fn test_overpass_provider_unknown_city_fails() {
    let nominatim = MockServer::start().await;
    let overpass = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&nominatim)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&overpass)
        .await;

    let provider = OverpassProvider::with_endpoints(fast_transport(1), nominatim.uri(), overpass.uri());
    let result = provider
        .search("farmácia", "Cidade Inexistente, ZZ", &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(AppError::ExternalApiError(_))));
}
