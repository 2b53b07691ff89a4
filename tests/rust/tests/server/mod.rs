//! HTTP surface tests driven through the router with `oneshot`

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use mcproxy_core::ToolBinding;
use mcproxy_gateway::{GatewayServer, GatewaySettings};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tests::{fixtures, MockBackend, MockInstanceRepository, MockRepositories, MockTransportProvider};
use tower::ServiceExt;

const ISSUER: &str = "https://auth.example.com";

struct TestServer {
    router: Router,
    backend: Arc<MockBackend>,
    repos: MockRepositories,
}

fn server_with(settings: GatewaySettings) -> TestServer {
    let backend = Arc::new(MockBackend::with_tools(&["x", "off"]));
    let repos = MockRepositories::new(
        MockInstanceRepository::new()
            .with_instance(fixtures::instance("inst").with_oauth(true))
            .with_instance(fixtures::instance("plain"))
            .with_backends(
                "inst",
                vec![fixtures::backend("A", &["x"])
                    .with_tool_binding(ToolBinding::disabled("off"))],
            ),
    );
    let provider = Arc::new(MockTransportProvider::new().serve("A", backend.clone()));
    let server = GatewayServer::new(settings, repos.dependencies(provider));
    TestServer {
        router: server.build_router(),
        backend,
        repos,
    }
}

fn server() -> TestServer {
    server_with(GatewaySettings {
        issuer_url: Some(ISSUER.to_string()),
        oauth_scopes: vec!["mcp".to_string()],
        ..fixtures::settings()
    })
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn rpc_raw(router: &Router, instance_id: &str, body: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/mcp/{}", instance_id))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn rpc(router: &Router, instance_id: &str, body: Value) -> Value {
    let (status, value) = rpc_raw(router, instance_id, &body.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    value
}

#[tokio::test]
async fn test_health() {
    let server = server();

    let (status, body) = get(&server.router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_authorization_server_document() {
    let server = server();

    let (status, body) = get(&server.router, "/.well-known/oauth-authorization-server").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["issuer"], ISSUER);
    assert_eq!(body["authorization_endpoint"], format!("{}/authorize", ISSUER));
    assert_eq!(body["token_endpoint"], format!("{}/token", ISSUER));
    assert_eq!(body["registration_endpoint"], format!("{}/register", ISSUER));
    assert_eq!(body["code_challenge_methods_supported"], json!(["S256"]));
    assert_eq!(body["scopes_supported"], json!(["mcp"]));
}

#[tokio::test]
async fn test_protected_resource_document_for_instance() {
    let server = server();

    let (status, body) = get(
        &server.router,
        "/.well-known/oauth-protected-resource/mcp/inst",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resource"], "http://localhost:45818/mcp/inst");
    assert_eq!(body["authorization_servers"], json!([ISSUER]));
    assert_eq!(body["bearer_methods_supported"], json!(["header"]));
}

#[tokio::test]
async fn test_well_known_error_statuses() {
    let server = server();

    let (status, body) = get(
        &server.router,
        "/.well-known/oauth-authorization-server/mcp/missing",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = get(
        &server.router,
        "/.well-known/oauth-protected-resource/mcp/plain",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "oauth_not_supported");
}

#[tokio::test]
async fn test_missing_issuer_is_misconfiguration() {
    let server = server_with(fixtures::settings());

    let (status, body) = get(&server.router, "/.well-known/oauth-protected-resource").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "server_misconfiguration");
    assert!(body["error_description"].is_string());
}

#[tokio::test]
async fn test_initialize_echoes_protocol_version() {
    let server = server();

    let body = rpc(
        &server.router,
        "inst",
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "2025-03-26", "capabilities": {} }
        }),
    )
    .await;

    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(body["result"]["serverInfo"]["name"], "mcproxy-gateway");
    assert!(body["result"]["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn test_tools_list_hides_disabled_tools() {
    let server = server();

    let body = rpc(
        &server.router,
        "inst",
        json!({ "jsonrpc": "2.0", "id": "a", "method": "tools/list" }),
    )
    .await;

    let tools = body["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "x");
    assert_eq!(tools[0]["description"], "[A] Does x");
    assert!(tools[0]["inputSchema"].is_object());
    assert!(tools[0].get("enabled").is_none());
}

#[tokio::test]
async fn test_tools_call_round_trip() {
    let server = server();

    let body = rpc(
        &server.router,
        "inst",
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {
                "name": "x",
                "arguments": { "q": 1 },
                "_meta": { "progressToken": 42 }
            }
        }),
    )
    .await;

    assert_eq!(body["id"], 7);
    assert_eq!(body["result"]["content"][0]["text"], "x ok");
    assert_eq!(body["result"]["isError"], false);
    let calls = server.backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].progress_token, Some(json!(42)));

    let records = server.repos.request_logs.wait_for(1).await;
    assert_eq!(records[0].method, "tools/call");
}

#[tokio::test]
async fn test_tools_call_errors() {
    let server = server();

    let unknown = rpc(
        &server.router,
        "inst",
        json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": { "name": "nope" } }),
    )
    .await;
    assert_eq!(unknown["error"]["code"], -32602);
    assert_eq!(unknown["error"]["data"]["code"], "unknown_tool");
    assert_eq!(unknown["error"]["message"], "Unknown tool: nope");

    let disabled = rpc(
        &server.router,
        "inst",
        json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": { "name": "off" } }),
    )
    .await;
    assert_eq!(disabled["error"]["code"], -32000);
    assert_eq!(disabled["error"]["data"]["code"], "tool_disabled");

    let no_params = rpc(
        &server.router,
        "inst",
        json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/call" }),
    )
    .await;
    assert_eq!(no_params["error"]["code"], -32602);
    assert_eq!(no_params["error"]["data"]["code"], "invalid_params");

    let missing_instance = rpc(
        &server.router,
        "ghost",
        json!({ "jsonrpc": "2.0", "id": 4, "method": "tools/list" }),
    )
    .await;
    assert_eq!(missing_instance["error"]["code"], -32000);
    assert_eq!(missing_instance["error"]["data"]["code"], "not_found");
    assert!(server.backend.calls().is_empty());
}

#[tokio::test]
async fn test_protocol_errors() {
    let server = server();

    let (status, parse) = rpc_raw(&server.router, "inst", "{not json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse["error"]["code"], -32700);
    assert_eq!(parse["id"], Value::Null);

    let unknown = rpc(
        &server.router,
        "inst",
        json!({ "jsonrpc": "2.0", "id": 1, "method": "resources/list" }),
    )
    .await;
    assert_eq!(unknown["error"]["code"], -32601);

    let batch = rpc(
        &server.router,
        "inst",
        json!([{ "jsonrpc": "2.0", "id": 1, "method": "ping" }]),
    )
    .await;
    assert_eq!(batch["error"]["code"], -32600);

    let version = rpc(
        &server.router,
        "inst",
        json!({ "jsonrpc": "1.0", "id": 1, "method": "ping" }),
    )
    .await;
    assert_eq!(version["error"]["code"], -32600);

    let ping = rpc(
        &server.router,
        "inst",
        json!({ "jsonrpc": "2.0", "id": 9, "method": "ping" }),
    )
    .await;
    assert_eq!(ping["result"], json!({}));
}

#[tokio::test]
async fn test_notification_is_accepted_without_body() {
    let server = server();

    let (status, body) = rpc_raw(
        &server.router,
        "inst",
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_callback_provider_error() {
    let server = server();

    let (status, body) = get(
        &server.router,
        "/oauth/callback/a?error=access_denied&error_description=User%20declined&state=s",
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "access_denied");
    assert_eq!(body["error_description"], "User declined");
    assert_eq!(server.repos.oauth_sessions.lookups(), 0);
}

#[tokio::test]
async fn test_callback_unknown_state() {
    let server = server();

    let (status, body) = get(&server.router, "/oauth/callback/a?code=c&state=unknown").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_state");
}
