//! Token validity, refresh and revocation

use std::time::Duration;

use chrono::Utc;
use mcproxy_core::{OAuthTokenRecord, RetryPolicy, TokenKey, TokenStatus};
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::fixtures;
use tests::mocks::{MockOAuthClientRepository, MockOAuthTokenRepository};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::OAuthHarness;

fn key() -> TokenKey {
    TokenKey::new("b1", "u1")
}

fn refreshable(access: &str) -> OAuthTokenRecord {
    let mut token = OAuthTokenRecord::new(key(), "client-123", access);
    token.refresh_token = Some("rt-1".to_string());
    token.expires_at = Some(Utc::now() - chrono::Duration::minutes(5));
    token
}

fn harness_with(server: &MockServer, token: OAuthTokenRecord) -> OAuthHarness {
    OAuthHarness::with(
        MockOAuthClientRepository::new().with_client(fixtures::oauth_client("b1", &server.uri())),
        MockOAuthTokenRepository::new().with_token(token),
        Duration::from_secs(600),
    )
}

#[tokio::test]
async fn test_expired_token_is_never_returned() {
    let server = MockServer::start().await;
    let harness = harness_with(&server, refreshable("expired"));

    assert!(harness.token_manager.get_valid_token(&key()).await.unwrap().is_none());
    assert!(harness.token_manager.get_valid_record(&key()).await.unwrap().is_none());
    // Still a refresh candidate
    assert!(harness
        .token_manager
        .find_refreshable(&key())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_token_without_expiry_stays_valid() {
    let server = MockServer::start().await;
    let harness = harness_with(
        &server,
        OAuthTokenRecord::new(key(), "client-123", "forever"),
    );

    assert_eq!(
        harness.token_manager.get_valid_token(&key()).await.unwrap().as_deref(),
        Some("forever")
    );
}

#[tokio::test]
async fn test_refresh_retries_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "refresh_token": "rt-2",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let old = refreshable("stale");
    let old_id = old.id;
    let harness = harness_with(&server, old);

    let refreshed = harness
        .token_manager
        .refresh_token(&old_id, Some(RetryPolicy::new(3, Duration::ZERO)))
        .await
        .unwrap();

    assert_eq!(refreshed.access_token, "fresh");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("rt-2"));
    assert!(refreshed.expires_at.unwrap() > Utc::now());

    let tokens = harness.tokens.all();
    assert_eq!(tokens.len(), 2);
    let old = tokens.iter().find(|t| t.id == old_id).unwrap();
    assert_eq!(old.status, TokenStatus::Superseded);
    assert_eq!(
        harness.token_manager.get_valid_token(&key()).await.unwrap().as_deref(),
        Some("fresh")
    );
}

#[tokio::test]
async fn test_refresh_gives_up_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let old = refreshable("stale");
    let old_id = old.id;
    let harness = harness_with(&server, old);

    let err = harness.manager.refresh(&old_id).await.unwrap_err();

    assert_eq!(err.code(), "temporarily_unavailable");
    assert_eq!(harness.tokens.all()[0].status, TokenStatus::Active);
}

#[tokio::test]
async fn test_invalid_grant_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let old = refreshable("stale");
    let old_id = old.id;
    let harness = harness_with(&server, old);

    let err = harness
        .token_manager
        .refresh_token(&old_id, Some(RetryPolicy::new(5, Duration::ZERO)))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "invalid_grant");
    assert_eq!(harness.tokens.all().len(), 1);
}

#[tokio::test]
async fn test_refresh_without_refresh_token_fails_locally() {
    let server = MockServer::start().await;
    let token = OAuthTokenRecord::new(key(), "client-123", "at");
    let id = token.id;
    let harness = harness_with(&server, token);

    let err = harness.token_manager.refresh_token(&id, None).await.unwrap_err();

    assert_eq!(err.code(), "invalid_grant");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_revoke_marks_revoked_even_when_provider_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .and(body_string_contains("token=rt-1"))
        .and(body_string_contains("token_type_hint=refresh_token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let token = refreshable("at");
    let id = token.id;
    let harness = harness_with(&server, token);

    harness.manager.revoke(&id).await.unwrap();

    assert_eq!(harness.tokens.all()[0].status, TokenStatus::Revoked);
    assert!(harness
        .token_manager
        .find_refreshable(&key())
        .await
        .unwrap()
        .is_none());

    let err = harness.token_manager.refresh_token(&id, None).await.unwrap_err();
    assert_eq!(err.code(), "invalid_grant");
}

#[tokio::test]
async fn test_save_supersedes_previous_token() {
    let server = MockServer::start().await;
    let first = OAuthTokenRecord::new(key(), "client-123", "one");
    let first_id = first.id;
    let harness = harness_with(&server, first);

    let second = OAuthTokenRecord::new(key(), "client-123", "two");
    harness.token_manager.save_token(&second).await.unwrap();

    let tokens = harness.tokens.all();
    let active: Vec<_> = tokens
        .iter()
        .filter(|t| t.status == TokenStatus::Active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].access_token, "two");
    assert_eq!(
        tokens.iter().find(|t| t.id == first_id).unwrap().status,
        TokenStatus::Superseded
    );
}

#[tokio::test]
async fn test_superseded_token_cannot_be_refreshed() {
    let server = MockServer::start().await;
    let old = refreshable("old");
    let old_id = old.id;
    let harness = harness_with(&server, old);
    harness
        .token_manager
        .save_token(&OAuthTokenRecord::new(key(), "client-123", "current"))
        .await
        .unwrap();

    let err = harness
        .token_manager
        .refresh_token(&old_id, None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "invalid_grant");
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(
        harness.token_manager.get_valid_token(&key()).await.unwrap().as_deref(),
        Some("current")
    );
}

#[tokio::test]
async fn test_refresh_with_huge_expires_in_is_stored_without_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "long-lived",
            "expires_in": i64::MAX,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let old = refreshable("stale");
    let old_id = old.id;
    let harness = harness_with(&server, old);

    let refreshed = harness
        .token_manager
        .refresh_token(&old_id, None)
        .await
        .unwrap();

    assert!(refreshed.expires_at.is_none());
    assert_eq!(refreshed.refresh_token.as_deref(), Some("rt-1"));
    assert_eq!(
        harness.token_manager.get_valid_token(&key()).await.unwrap().as_deref(),
        Some("long-lived")
    );
}
