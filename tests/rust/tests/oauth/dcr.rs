//! Discovery and dynamic client registration

use mcproxy_gateway::oauth::{parse_www_authenticate, ClientRegistrationRequest, DcrClient};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_path_aware_auth_server_discovery() {
    let server = MockServer::start().await;
    let issuer = format!("{}/tenant-a", server.uri());
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server/tenant-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{}/authorize", issuer),
            "token_endpoint": format!("{}/token", issuer),
        })))
        .mount(&server)
        .await;

    let metadata = DcrClient::default().discover_auth_server(&issuer).await.unwrap();

    assert_eq!(metadata.issuer, issuer);
    assert!(metadata.registration_endpoint.is_none());
    assert!(metadata.supports_pkce());
}

#[tokio::test]
async fn test_openid_configuration_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": server.uri(),
            "authorization_endpoint": format!("{}/oidc/auth", server.uri()),
            "token_endpoint": format!("{}/oidc/token", server.uri()),
            "code_challenge_methods_supported": ["plain", "S256"],
        })))
        .mount(&server)
        .await;

    let metadata = DcrClient::default()
        .discover_auth_server(&server.uri())
        .await
        .unwrap();

    assert_eq!(
        metadata.authorization_endpoint,
        format!("{}/oidc/auth", server.uri())
    );
}

#[tokio::test]
async fn test_discovery_without_metadata_is_server_error() {
    let server = MockServer::start().await;

    let err = DcrClient::default()
        .discover_auth_server(&server.uri())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "server_error");
}

#[tokio::test]
async fn test_registration_sends_public_client_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .and(body_partial_json(json!({
            "client_name": "McProxy Gateway",
            "redirect_uris": ["http://localhost:45818/oauth/callback/b1"],
            "grant_types": ["authorization_code", "refresh_token"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "client_id": "abc",
            "client_id_issued_at": 1700000000,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = DcrClient::default()
        .register_client(
            &format!("{}/register", server.uri()),
            &ClientRegistrationRequest::public_client(
                "McProxy Gateway",
                "http://localhost:45818/oauth/callback/b1",
            ),
        )
        .await
        .unwrap();

    assert_eq!(response.client_id, "abc");
    assert!(response.client_secret.is_none());
    assert_eq!(response.client_id_issued_at, Some(1700000000));
}

#[tokio::test]
async fn test_registration_server_failure_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = DcrClient::default()
        .register_client(
            &format!("{}/register", server.uri()),
            &ClientRegistrationRequest::public_client("x", "http://localhost/cb"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "temporarily_unavailable");
}

#[test]
fn test_challenge_with_resource_metadata_and_scope() {
    let challenge = parse_www_authenticate(
        "Bearer resource_metadata=\"https://api.example.com/.well-known/oauth-protected-resource\", scope=\"files:read files:write\"",
    )
    .unwrap();

    assert!(challenge.is_bearer());
    assert!(challenge.as_uri().is_none());
    assert_eq!(challenge.scopes(), vec!["files:read", "files:write"]);
}
