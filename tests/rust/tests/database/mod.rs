//! SQLite-backed flows across the storage repositories

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mcproxy_core::{
    InstanceRepository, MembershipRepository, OAuthSession, OAuthSessionRepository,
    OAuthTokenRecord, OAuthTokenRepository, RequestLogRepository, RequestRecord, RetryPolicy,
    ServerConfig, SessionStatus, TokenKey, TokenStatus, ToolBinding,
};
use mcproxy_gateway::oauth::TokenManager;
use mcproxy_gateway::ConfigResolver;
use mcproxy_storage::{
    Database, SqliteInstanceRepository, SqliteOAuthClientRepository,
    SqliteOAuthSessionRepository, SqliteOAuthTokenRepository, SqliteRequestLogRepository,
};
use pretty_assertions::assert_eq;
use tests::db::TestDatabase;
use tests::fixtures;
use tokio::sync::Mutex;
use uuid::Uuid;

fn record(instance_id: &str, tool: &str) -> RequestRecord {
    RequestRecord {
        organization_id: Some(fixtures::ORG.to_string()),
        instance_id: instance_id.to_string(),
        method: "tools/call".to_string(),
        tool_name: Some(tool.to_string()),
        duration_ms: 5,
        request_bytes: 10,
        response_bytes: 20,
        cache_hit: false,
        error_code: None,
        created_at: Utc::now(),
    }
}

fn pending_session(state: &str) -> OAuthSession {
    let now = Utc::now();
    OAuthSession {
        id: Uuid::new_v4(),
        user_id: fixtures::OWNER.to_string(),
        backend_id: "A".to_string(),
        state: state.to_string(),
        code_verifier: "v".repeat(64),
        code_challenge: "c".repeat(43),
        redirect_uri: "http://localhost:45818/oauth/callback/A".to_string(),
        scopes: vec!["mcp".to_string()],
        status: SessionStatus::Pending,
        expires_at: now + chrono::Duration::minutes(10),
        error_code: None,
        error_description: None,
        created_at: now,
    }
}

#[tokio::test]
async fn test_resolver_reads_backends_from_sqlite() {
    let test_db = TestDatabase::in_memory();
    let repo = Arc::new(SqliteInstanceRepository::new(
        test_db.db.clone(),
        test_db.encryptor.clone(),
    ));
    repo.save(&fixtures::instance("inst")).await.unwrap();

    let files = fixtures::backend("Files", &["read"])
        .with_tool_binding(ToolBinding::disabled("delete"))
        .with_credentials(r#"{"env":{"TOKEN":"t-1"}}"#);
    let docs = ServerConfig::http("docs", "Docs", "https://docs.example.com/mcp")
        .with_tools(["search"])
        .with_oauth();
    repo.save_backend("inst", 0, &files).await.unwrap();
    repo.save_backend("inst", 1, &docs).await.unwrap();

    let resolver = ConfigResolver::new(repo.clone(), Duration::from_secs(60));
    let resolved = resolver.resolve("inst").await.unwrap();

    assert_eq!(resolved.organization_id, fixtures::ORG);
    assert_eq!(resolved.owner_id, fixtures::OWNER);
    assert_eq!(resolved.backends, vec![files.clone(), docs.clone()]);
    assert_eq!(
        resolved.content_hash,
        mcproxy_gateway::content_hash(&[files, docs])
    );

    let (index, owner, _) = resolved.owner_of("search").unwrap();
    assert_eq!(index, 1);
    assert!(owner.requires_oauth);
}

#[tokio::test]
async fn test_deleting_a_backend_changes_the_hash() {
    let test_db = TestDatabase::in_memory();
    let repo = Arc::new(SqliteInstanceRepository::new(
        test_db.db.clone(),
        test_db.encryptor.clone(),
    ));
    repo.save(&fixtures::instance("inst")).await.unwrap();
    repo.save_backend("inst", 0, &fixtures::backend("A", &["x"]))
        .await
        .unwrap();
    repo.save_backend("inst", 1, &fixtures::backend("B", &["y"]))
        .await
        .unwrap();

    let resolver = ConfigResolver::new(repo.clone(), Duration::from_secs(60));
    let before = resolver.resolve("inst").await.unwrap();

    let b_id = before.backends[1].id.clone();
    repo.delete_backend("inst", &b_id).await.unwrap();
    resolver.invalidate("inst");
    let after = resolver.resolve("inst").await.unwrap();

    assert_eq!(after.backends.len(), 1);
    assert_ne!(before.content_hash, after.content_hash);
    assert!(after.owner_of("y").is_none());
}

#[tokio::test]
async fn test_membership_upserts_role() {
    let test_db = TestDatabase::in_memory();
    let repo = SqliteInstanceRepository::new(test_db.db.clone(), test_db.encryptor.clone());

    assert!(!repo.is_member("alice", "org-9").await.unwrap());

    repo.add_member("org-9", "alice", "member").await.unwrap();
    repo.add_member("org-9", "alice", "admin").await.unwrap();

    assert!(repo.is_member("alice", "org-9").await.unwrap());
    assert!(!repo.is_member("bob", "org-9").await.unwrap());

    let role: String = test_db
        .db
        .lock()
        .await
        .connection()
        .query_row(
            "SELECT role FROM organization_members WHERE organization_id = 'org-9' AND user_id = 'alice'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(role, "admin");
}

#[tokio::test]
async fn test_token_manager_supersedes_in_sqlite() {
    let test_db = TestDatabase::in_memory();
    let tokens = Arc::new(SqliteOAuthTokenRepository::new(
        test_db.db.clone(),
        test_db.encryptor.clone(),
    ));
    let clients = Arc::new(SqliteOAuthClientRepository::new(
        test_db.db.clone(),
        test_db.encryptor.clone(),
    ));
    let manager = TokenManager::new(
        tokens.clone(),
        clients,
        reqwest::Client::new(),
        RetryPolicy::no_retry(),
    );
    let key = TokenKey::new("A", fixtures::OWNER);

    let first = OAuthTokenRecord::new(key.clone(), "client-123", "first-token");
    manager.save_token(&first).await.unwrap();
    let second = OAuthTokenRecord::new(key.clone(), "client-123", "second-token");
    manager.save_token(&second).await.unwrap();

    assert_eq!(
        manager.get_valid_token(&key).await.unwrap().as_deref(),
        Some("second-token")
    );
    assert_eq!(
        tokens.get(&first.id).await.unwrap().unwrap().status,
        TokenStatus::Superseded
    );

    let raw: i64 = test_db
        .db
        .lock()
        .await
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM oauth_tokens WHERE status = 'active'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(raw, 1);

    // Other users are unaffected
    let other = TokenKey::new("A", "someone-else");
    assert!(manager.get_valid_token(&other).await.unwrap().is_none());
}

#[tokio::test]
async fn test_tokens_are_encrypted_at_rest() {
    let test_db = TestDatabase::in_memory();
    let tokens =
        SqliteOAuthTokenRepository::new(test_db.db.clone(), test_db.encryptor.clone());
    let mut token = OAuthTokenRecord::new(TokenKey::new("A", "u"), "c", "plain-access");
    token.refresh_token = Some("plain-refresh".to_string());
    tokens.insert_superseding(&token).await.unwrap();

    let (access, refresh): (String, String) = test_db
        .db
        .lock()
        .await
        .connection()
        .query_row(
            "SELECT access_token_enc, refresh_token_enc FROM oauth_tokens",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert!(!access.contains("plain-access"));
    assert!(!refresh.contains("plain-refresh"));

    let loaded = tokens.get(&token.id).await.unwrap().unwrap();
    assert_eq!(loaded.access_token, "plain-access");
    assert_eq!(loaded.refresh_token.as_deref(), Some("plain-refresh"));
}

#[tokio::test]
async fn test_session_completes_only_once() {
    let test_db = TestDatabase::in_memory();
    let sessions =
        SqliteOAuthSessionRepository::new(test_db.db.clone(), test_db.encryptor.clone());
    let session = pending_session("state-xyz");
    sessions.create(&session).await.unwrap();

    let first = sessions
        .transition(&session.id, SessionStatus::Completed, None, None)
        .await
        .unwrap();
    let second = sessions
        .transition(&session.id, SessionStatus::Completed, None, None)
        .await
        .unwrap();

    assert!(first);
    assert!(!second);
    let stored = sessions.find_by_state("state-xyz").await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_duplicate_state_is_rejected() {
    let test_db = TestDatabase::in_memory();
    let sessions =
        SqliteOAuthSessionRepository::new(test_db.db.clone(), test_db.encryptor.clone());
    sessions.create(&pending_session("dup")).await.unwrap();

    assert!(sessions.create(&pending_session("dup")).await.is_err());
}

#[tokio::test]
async fn test_request_log_lists_newest_first() {
    let test_db = TestDatabase::in_memory();
    let log = SqliteRequestLogRepository::new(test_db.db.clone());

    for tool in ["one", "two", "three"] {
        log.append(&record("inst", tool)).await.unwrap();
    }
    log.append(&record("other", "elsewhere")).await.unwrap();

    let recent = log.list_recent("inst", 2).await.unwrap();
    let names: Vec<_> = recent
        .iter()
        .map(|r| r.tool_name.as_deref().unwrap_or_default())
        .collect();
    assert_eq!(names, vec!["three", "two"]);
    assert!(recent.iter().all(|r| r.instance_id == "inst"));
}

#[tokio::test]
async fn test_file_database_survives_reopen() {
    let test_db = TestDatabase::new();
    let repo = SqliteInstanceRepository::new(test_db.db.clone(), test_db.encryptor.clone());
    repo.save(&fixtures::instance("inst")).await.unwrap();
    let backend = fixtures::backend("A", &["x"]).with_credentials(r#"{"env":{"K":"v"}}"#);
    repo.save_backend("inst", 0, &backend).await.unwrap();

    let reopened = Arc::new(Mutex::new(Database::open(test_db.path()).unwrap()));
    let repo = SqliteInstanceRepository::new(reopened, test_db.encryptor.clone());

    let instance = repo.get("inst").await.unwrap().unwrap();
    assert_eq!(instance.owner_id, fixtures::OWNER);
    assert_eq!(repo.list_backends("inst").await.unwrap(), vec![backend]);
}
