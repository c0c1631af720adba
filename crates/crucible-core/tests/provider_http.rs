//! reqwest transport against a mock provider proxy.

use crucible_core::providers::{
    HttpTransport, ProviderError, ProviderRequest, ProviderTransport, REQUEST_ID_HEADER,
};
use wiremock::matchers::{bearer_token, body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> ProviderRequest {
    ProviderRequest {
        path: "/v1/chat/completions".into(),
        bearer: "sk-crucible-proxy-abc".into(),
        request_id: "req-1".into(),
        experiment_id: "exp-1".into(),
        hypothesis_id: "hyp-1".into(),
        row_id: "row-1".into(),
        body: serde_json::json!({"model": "gpt-4o-mini", "messages": []}),
    }
}

#[tokio::test]
async fn posts_body_with_tracking_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(bearer_token("sk-crucible-proxy-abc"))
        .and(header(REQUEST_ID_HEADER, "req-1"))
        .and(header("Crucible-Experiment-Id", "exp-1"))
        .and(header("Crucible-Hypothesis-Id", "hyp-1"))
        .and(header("Crucible-Row-Id", "row-1"))
        .and(body_json(serde_json::json!({"model": "gpt-4o-mini", "messages": []})))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":"chatcmpl-1"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(server.uri()).unwrap();
    let resp = transport.post(&request()).await.unwrap();

    assert!(resp.is_success());
    assert_eq!(resp.body, r#"{"id":"chatcmpl-1"}"#);
}

#[tokio::test]
async fn error_status_is_returned_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(format!("{}/", server.uri())).unwrap();
    let resp = transport.post(&request()).await.unwrap();

    assert_eq!(resp.status, 429);
    assert!(!resp.is_success());
}

#[tokio::test]
async fn unreachable_proxy_is_a_transport_error() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let transport = HttpTransport::new(uri).unwrap();
    let err = transport.post(&request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Transport(_)));
}
