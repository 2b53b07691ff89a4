//! Credential and token injection into transports

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use mcproxy_core::{OAuthTokenRecord, OAuthTokenRepository, TokenKey};
use mcproxy_gateway::pool::transport::{
    headers_from_env, probe_auth_challenge, requires_oauth,
};
use pretty_assertions::assert_eq;
use tests::{fixtures, MockBackend, MockTransportProvider};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::Harness;

fn protected_harness() -> Harness {
    let a = Arc::new(MockBackend::with_tools(&["x"]));
    Harness::new(
        vec![fixtures::backend("A", &["x"]).with_oauth()],
        MockTransportProvider::new().serve("A", a),
    )
}

#[tokio::test]
async fn test_stored_token_is_injected_as_bearer() {
    let harness = protected_harness();
    let mut token =
        OAuthTokenRecord::new(TokenKey::new("a", fixtures::OWNER), "client-123", "at-1");
    token.expires_at = Some(Utc::now() + Duration::hours(1));
    harness
        .repos
        .oauth_tokens
        .insert_superseding(&token)
        .await
        .unwrap();

    harness
        .aggregator()
        .call_tool("inst", "x", None, None)
        .await
        .unwrap();

    let ctx = harness.provider.last_context("A").unwrap();
    assert_eq!(ctx.bearer_token.as_deref(), Some("at-1"));
}

#[tokio::test]
async fn test_expired_token_is_not_injected() {
    let harness = protected_harness();
    let mut token = OAuthTokenRecord::new(TokenKey::new("a", fixtures::OWNER), "client-123", "old");
    token.expires_at = Some(Utc::now() - Duration::minutes(1));
    harness
        .repos
        .oauth_tokens
        .insert_superseding(&token)
        .await
        .unwrap();

    harness
        .aggregator()
        .call_tool("inst", "x", None, None)
        .await
        .unwrap();

    assert!(harness
        .provider
        .last_context("A")
        .unwrap()
        .bearer_token
        .is_none());
}

#[tokio::test]
async fn test_unprotected_backend_never_gets_a_token() {
    let a = Arc::new(MockBackend::with_tools(&["x"]));
    let harness = Harness::new(
        vec![fixtures::backend("A", &["x"])],
        MockTransportProvider::new().serve("A", a),
    );
    let token = OAuthTokenRecord::new(TokenKey::new("a", fixtures::OWNER), "client-123", "at-1");
    harness
        .repos
        .oauth_tokens
        .insert_superseding(&token)
        .await
        .unwrap();

    harness
        .aggregator()
        .call_tool("inst", "x", None, None)
        .await
        .unwrap();

    assert!(harness
        .provider
        .last_context("A")
        .unwrap()
        .bearer_token
        .is_none());
}

#[test]
fn test_env_to_header_conventions() {
    let env: BTreeMap<String, String> = [
        ("GITHUB_API_KEY", "gh-1"),
        ("ACCESS_TOKEN", "Bearer tok"),
        ("HEADER_X_TENANT_ID", "t-9"),
        ("DATABASE_URL", "postgres://secret"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let headers = headers_from_env(&env);

    assert_eq!(headers.get("X-API-Key").map(String::as_str), Some("gh-1"));
    assert_eq!(
        headers.get("Authorization").map(String::as_str),
        Some("Bearer tok")
    );
    assert_eq!(headers.get("X-Tenant-Id").map(String::as_str), Some("t-9"));
    assert_eq!(headers.len(), 3);
}

#[test]
fn test_auth_error_detection() {
    assert!(requires_oauth("Unexpected server response: 401"));
    assert!(requires_oauth("error=\"invalid_token\""));
    assert!(!requires_oauth("connection refused"));
    assert!(!requires_oauth("channel closed"));
}

#[tokio::test]
async fn test_probe_reports_challenge() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mcp"))
        .and(header("x-api-key", "k"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", "Bearer realm=\"mcp\", error=\"invalid_token\""),
        )
        .mount(&server)
        .await;

    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("x-api-key", reqwest::header::HeaderValue::from_static("k"));
    let probe = probe_auth_challenge(
        &reqwest::Client::new(),
        &format!("{}/mcp", server.uri()),
        &headers,
    )
    .await
    .unwrap();

    assert_eq!(probe.status, 401);
    assert_eq!(
        probe.challenge.as_deref(),
        Some("Bearer realm=\"mcp\", error=\"invalid_token\"")
    );
}

#[tokio::test]
async fn test_probe_ignores_healthy_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let probe = probe_auth_challenge(
        &reqwest::Client::new(),
        &server.uri(),
        &reqwest::header::HeaderMap::new(),
    )
    .await;

    assert!(probe.is_none());
}
