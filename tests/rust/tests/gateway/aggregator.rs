//! Tool aggregation and call routing

use std::sync::Arc;
use std::time::Duration;

use mcproxy_core::{InstanceRepository, ToolBinding};
use mcproxy_gateway::GatewayError;
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::{fixtures, MockBackend, MockTransportProvider};

use super::Harness;

fn two_backends() -> (Harness, Arc<MockBackend>, Arc<MockBackend>) {
    let a = Arc::new(MockBackend::with_tools(&["x", "unowned"]));
    let b = Arc::new(MockBackend::with_tools(&["y"]));
    let harness = Harness::new(
        vec![fixtures::backend("A", &["x"]), fixtures::backend("B", &["y"])],
        MockTransportProvider::new()
            .serve("A", a.clone())
            .serve("B", b.clone()),
    );
    (harness, a, b)
}

#[tokio::test]
async fn test_list_merges_owned_tools_in_registration_order() {
    let (harness, _, _) = two_backends();

    let list = harness.aggregator().list_tools("inst").await.unwrap();

    let names: Vec<_> = list.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["x", "y"]);
    assert_eq!(list.tools[0].description.as_deref(), Some("[A] Does x"));
    assert_eq!(list.tools[1].description.as_deref(), Some("[B] Does y"));
    assert!(!list.cache_hit);
}

#[tokio::test]
async fn test_call_routes_only_to_owner() {
    let (harness, a, b) = two_backends();

    let mut args = serde_json::Map::new();
    args.insert("q".to_string(), json!("hello"));
    let result = harness
        .aggregator()
        .call_tool("inst", "x", Some(args), Some(json!("progress-1")))
        .await
        .unwrap();

    assert_eq!(result["content"][0]["text"], "x ok");
    let calls = a.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "x");
    assert_eq!(calls[0].arguments.as_ref().unwrap()["q"], "hello");
    assert_eq!(calls[0].progress_token, Some(json!("progress-1")));
    assert!(b.calls().is_empty());
    assert_eq!(harness.provider.creates("B"), 0);
}

#[tokio::test]
async fn test_unknown_tool_is_hard_error() {
    let (harness, a, b) = two_backends();

    let err = harness
        .aggregator()
        .call_tool("inst", "unowned", None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::UnknownTool(ref name) if name == "unowned"));
    assert_eq!(err.code(), "unknown_tool");
    assert!(a.calls().is_empty());
    assert!(b.calls().is_empty());
}

#[tokio::test]
async fn test_overlapping_ownership_prefers_first_backend() {
    let a = Arc::new(MockBackend::with_tools(&["x"]));
    let b = Arc::new(MockBackend::with_tools(&["x"]));
    let harness = Harness::new(
        vec![fixtures::backend("A", &["x"]), fixtures::backend("B", &["x"])],
        MockTransportProvider::new()
            .serve("A", a.clone())
            .serve("B", b.clone()),
    );

    let list = harness.aggregator().list_tools("inst").await.unwrap();
    assert_eq!(list.tools.len(), 1);
    assert_eq!(list.tools[0].backend, "A");

    harness
        .aggregator()
        .call_tool("inst", "x", None, None)
        .await
        .unwrap();
    assert_eq!(a.calls().len(), 1);
    assert!(b.calls().is_empty());
}

#[tokio::test]
async fn test_disabled_tool_is_listed_but_not_callable() {
    let a = Arc::new(MockBackend::with_tools(&["x", "off"]));
    let harness = Harness::new(
        vec![fixtures::backend("A", &["x"]).with_tool_binding(ToolBinding::disabled("off"))],
        MockTransportProvider::new().serve("A", a.clone()),
    );

    let list = harness.aggregator().list_tools("inst").await.unwrap();
    let off = list.tools.iter().find(|t| t.name == "off").unwrap();
    assert!(!off.enabled);

    let err = harness
        .aggregator()
        .call_tool("inst", "off", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "tool_disabled");
    assert!(a.calls().is_empty());
}

#[tokio::test]
async fn test_failing_backend_contributes_no_tools() {
    let a = Arc::new(MockBackend::with_tools(&["x"]));
    let c = Arc::new(MockBackend::with_tools(&["z"]).failing_list());
    let harness = Harness::new(
        vec![
            fixtures::backend("A", &["x"]),
            fixtures::backend("B", &["y"]),
            fixtures::backend("C", &["z"]),
        ],
        MockTransportProvider::new()
            .serve("A", a)
            .refuse("B")
            .serve("C", c),
    );

    let list = harness.aggregator().list_tools("inst").await.unwrap();

    let names: Vec<_> = list.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["x"]);
    // Three attempts, each torn down
    assert_eq!(harness.provider.creates("B"), 3);
    assert_eq!(harness.provider.closes(), 3);
}

#[tokio::test]
async fn test_second_list_is_cache_hit() {
    let (harness, _, _) = two_backends();

    harness.aggregator().list_tools("inst").await.unwrap();
    let second = harness.aggregator().list_tools("inst").await.unwrap();

    assert!(second.cache_hit);
    assert_eq!(second.tools.len(), 2);
    assert_eq!(harness.provider.creates("A"), 1);
}

#[tokio::test]
async fn test_config_change_misses_tools_cache() {
    let (harness, _, _) = two_backends();
    let c = Arc::new(MockBackend::with_tools(&["z"]));
    harness.provider.set("C", tests::BackendScript::Serve(c));

    let first = harness.aggregator().list_tools("inst").await.unwrap();
    assert_eq!(first.tools.len(), 2);

    harness
        .repos
        .instances
        .save_backend("inst", 2, &fixtures::backend("C", &["z"]))
        .await
        .unwrap();
    harness.aggregator().resolver().invalidate("inst");

    let second = harness.aggregator().list_tools("inst").await.unwrap();
    assert!(!second.cache_hit);
    let names: Vec<_> = second.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["x", "y", "z"]);
}

#[tokio::test]
async fn test_unknown_instance() {
    let (harness, _, _) = two_backends();

    let err = harness.aggregator().list_tools("nope").await.unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_releases_lease() {
    let a = Arc::new(MockBackend::with_tools(&["x"]).slow_calls(Duration::from_secs(60)));
    let mut settings = fixtures::settings();
    settings.request_timeout = Duration::from_millis(200);
    let harness = Harness::with_settings(
        vec![fixtures::backend("A", &["x"])],
        MockTransportProvider::new().serve("A", a.clone()),
        settings,
    );

    let err = harness
        .aggregator()
        .call_tool("inst", "x", None, None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "timeout");
    // The lease was dropped with the cancelled future and parked the connection
    assert_eq!(harness.aggregator().pool().stats().idle, 1);
    assert_eq!(a.close_count(), 0);
}

#[tokio::test]
async fn test_operations_emit_request_records() {
    let (harness, _, _) = two_backends();

    harness.aggregator().list_tools("inst").await.unwrap();
    harness
        .aggregator()
        .call_tool("inst", "y", None, None)
        .await
        .unwrap();
    let _ = harness
        .aggregator()
        .call_tool("inst", "missing", None, None)
        .await;

    let records = harness.repos.request_logs.wait_for(3).await;
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].method, "tools/list");
    assert_eq!(records[0].organization_id.as_deref(), Some(fixtures::ORG));
    assert_eq!(records[1].tool_name.as_deref(), Some("y"));
    assert!(records[1].error_code.is_none());
    assert!(records[1].response_bytes > 0);
    assert_eq!(records[2].error_code.as_deref(), Some("unknown_tool"));
}

#[tokio::test]
async fn test_auth_required_without_oauth_metadata_surfaces_auth_error() {
    let harness = Harness::new(
        vec![fixtures::backend("A", &["x"]).with_oauth()],
        MockTransportProvider::new().require_auth("A", Some("Basic realm=\"a\"")),
    );

    let err = harness
        .aggregator()
        .call_tool("inst", "x", None, None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "auth_required");
    // Not retried
    assert_eq!(harness.provider.creates("A"), 1);
}

#[tokio::test]
async fn test_invalidate_instance_evicts_idle_connections() {
    let (harness, a, _) = two_backends();

    harness.aggregator().list_tools("inst").await.unwrap();
    assert_eq!(harness.aggregator().pool().stats().idle, 2);

    harness.aggregator().invalidate_instance("inst").await;

    assert_eq!(harness.aggregator().pool().stats().idle, 0);
    assert_eq!(a.close_count(), 1);
}

#[tokio::test]
async fn test_auth_required_returns_authorization_url() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let auth = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(fixtures::auth_server_metadata(&auth.uri())),
        )
        .mount(&auth)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "client_id": "registered-client",
        })))
        .expect(1)
        .mount(&auth)
        .await;

    let challenge = format!("Bearer as_uri=\"{}\"", auth.uri());
    let harness = Harness::new(
        vec![fixtures::backend("A", &["x"]).with_oauth()],
        MockTransportProvider::new().require_auth("A", Some(&challenge)),
    );

    let err = harness
        .aggregator()
        .call_tool("inst", "x", None, None)
        .await
        .unwrap_err();

    match err {
        GatewayError::AuthorizationRequired {
            authorization_url: Some(url),
            ..
        } => {
            assert!(url.starts_with(&format!("{}/authorize?", auth.uri())));
            assert!(url.contains("client_id=registered-client"));
            assert!(url.contains("code_challenge_method=S256"));
        }
        other => panic!("unexpected: {:?}", other),
    }

    let sessions = harness.repos.oauth_sessions.all();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].backend_id, "a");
    assert_eq!(sessions[0].user_id, fixtures::OWNER);
}
