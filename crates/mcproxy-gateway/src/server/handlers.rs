//! HTTP handlers for the gateway server

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::AppState;
use crate::oauth::{CallbackParams, OAuthError};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    debug!("[Gateway] Health check");
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// OAuth Authorization Server Metadata (RFC 8414)
#[derive(Debug, Serialize)]
pub struct AuthorizationServerDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
}

/// OAuth Protected Resource Metadata (RFC 9728)
#[derive(Debug, Serialize)]
pub struct ProtectedResourceDocument {
    pub resource: String,
    pub authorization_servers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    pub bearer_methods_supported: Vec<String>,
}

/// Issuer of the documents, after checking `instance_id` is OAuth-enabled
async fn oauth_issuer(state: &AppState, instance_id: Option<&str>) -> Result<String, OAuthError> {
    let issuer = state
        .settings
        .issuer_url
        .clone()
        .filter(|url| !url.is_empty())
        .ok_or_else(|| {
            OAuthError::ServerMisconfiguration("Issuer URL is not configured".to_string())
        })?;

    if let Some(instance_id) = instance_id {
        let instance = state
            .instances
            .get(instance_id)
            .await?
            .ok_or_else(|| {
                OAuthError::NotFound(format!("Unknown server instance {}", instance_id))
            })?;
        if !instance.oauth_enabled {
            return Err(OAuthError::OAuthNotSupported(format!(
                "Server instance {} is not configured for OAuth",
                instance_id
            )));
        }
    }

    Ok(issuer.trim_end_matches('/').to_string())
}

fn scopes(state: &AppState) -> Option<Vec<String>> {
    Some(state.settings.oauth_scopes.clone()).filter(|s| !s.is_empty())
}

async fn authorization_server_document(
    state: &AppState,
    instance_id: Option<&str>,
) -> Result<Json<AuthorizationServerDocument>, OAuthError> {
    let issuer = oauth_issuer(state, instance_id).await?;
    info!(
        instance_id = instance_id.unwrap_or("-"),
        "[Gateway] Authorization server metadata request"
    );

    Ok(Json(AuthorizationServerDocument {
        authorization_endpoint: format!("{}/authorize", issuer),
        token_endpoint: format!("{}/token", issuer),
        registration_endpoint: format!("{}/register", issuer),
        jwks_uri: format!("{}/.well-known/jwks.json", issuer),
        issuer,
        response_types_supported: vec!["code".to_string()],
        grant_types_supported: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
        ],
        code_challenge_methods_supported: vec!["S256".to_string()],
        token_endpoint_auth_methods_supported: vec![
            "none".to_string(),
            "client_secret_post".to_string(),
        ],
        scopes_supported: scopes(state),
    }))
}

async fn protected_resource_document(
    state: &AppState,
    instance_id: Option<&str>,
) -> Result<Json<ProtectedResourceDocument>, OAuthError> {
    let issuer = oauth_issuer(state, instance_id).await?;
    info!(
        instance_id = instance_id.unwrap_or("-"),
        "[Gateway] Protected resource metadata request"
    );

    Ok(Json(ProtectedResourceDocument {
        resource: state.settings.resource_for(instance_id),
        authorization_servers: vec![issuer],
        scopes_supported: scopes(state),
        bearer_methods_supported: vec!["header".to_string()],
    }))
}

/// `GET /.well-known/oauth-authorization-server`
pub async fn oauth_metadata(
    State(state): State<AppState>,
) -> Result<Json<AuthorizationServerDocument>, OAuthError> {
    authorization_server_document(&state, None).await
}

/// `GET /.well-known/oauth-authorization-server/mcp/{instance_id}`
pub async fn oauth_metadata_for_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<AuthorizationServerDocument>, OAuthError> {
    authorization_server_document(&state, Some(&instance_id)).await
}

/// `GET /.well-known/oauth-protected-resource`
pub async fn resource_metadata(
    State(state): State<AppState>,
) -> Result<Json<ProtectedResourceDocument>, OAuthError> {
    protected_resource_document(&state, None).await
}

/// `GET /.well-known/oauth-protected-resource/mcp/{instance_id}`
pub async fn resource_metadata_for_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<ProtectedResourceDocument>, OAuthError> {
    protected_resource_document(&state, Some(&instance_id)).await
}

/// Result of a completed backend authorization. Tokens stay server-side.
#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub status: &'static str,
    pub backend_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// `GET /oauth/callback/{backend_id}`
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(backend_id): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<CallbackResponse>, OAuthError> {
    let outcome = state.oauth.handle_callback(&params).await?;
    if outcome.backend_id != backend_id {
        warn!(
            path_backend = %backend_id,
            session_backend = %outcome.backend_id,
            "[Gateway] Callback path does not match the session's backend"
        );
    }

    state.aggregator.clear_tools_cache();
    info!(backend_id = %outcome.backend_id, "[Gateway] Backend authorized");

    Ok(Json(CallbackResponse {
        status: "authorized",
        backend_id: outcome.backend_id,
        expires_at: outcome.expires_at,
    }))
}
