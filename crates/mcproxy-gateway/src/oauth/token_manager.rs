//! Token Manager
//!
//! Persistence, validity checks, refresh-with-retry and revocation of
//! outbound OAuth tokens. Tokens are never refreshed implicitly: callers
//! decide when to call [`TokenManager::refresh_token`].

use std::sync::Arc;

use chrono::Utc;
use mcproxy_core::{
    OAuthClient, OAuthClientRepository, OAuthTokenRecord, OAuthTokenRepository, RetryPolicy,
    TokenKey, TokenStatus,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::token::{post_token_form, TokenResponse};
use super::OAuthError;

pub struct TokenManager {
    tokens: Arc<dyn OAuthTokenRepository>,
    clients: Arc<dyn OAuthClientRepository>,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl TokenManager {
    pub fn new(
        tokens: Arc<dyn OAuthTokenRepository>,
        clients: Arc<dyn OAuthClientRepository>,
        http: reqwest::Client,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tokens,
            clients,
            http,
            retry,
        }
    }

    /// Active, unexpired token record for `key`
    pub async fn get_valid_record(
        &self,
        key: &TokenKey,
    ) -> Result<Option<OAuthTokenRecord>, OAuthError> {
        let record = self.tokens.find_active(key).await?;
        Ok(record.filter(|t| t.is_usable_at(Utc::now())))
    }

    /// Access token for `key` if one is active and unexpired
    pub async fn get_valid_token(&self, key: &TokenKey) -> Result<Option<String>, OAuthError> {
        Ok(self.get_valid_record(key).await?.map(|t| t.access_token))
    }

    /// Active token for `key` that carries a refresh token, expired or not
    pub async fn find_refreshable(
        &self,
        key: &TokenKey,
    ) -> Result<Option<OAuthTokenRecord>, OAuthError> {
        let record = self.tokens.find_active(key).await?;
        Ok(record.filter(|t| t.can_refresh()))
    }

    /// Store `record` as the active token for its key
    pub async fn save_token(&self, record: &OAuthTokenRecord) -> Result<(), OAuthError> {
        self.tokens.insert_superseding(record).await?;
        debug!(
            backend_id = %record.key.backend_id,
            token_id = %record.id,
            "[TokenManager] Saved token"
        );
        Ok(())
    }

    /// Exchange an authorization code. Codes are single-use, so this is not retried.
    pub async fn exchange_code(
        &self,
        client: &OAuthClient,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
        user_id: &str,
    ) -> Result<OAuthTokenRecord, OAuthError> {
        info!(backend_id = %client.backend_id, "[TokenManager] Exchanging authorization code");

        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        if let Some(secret) = &client.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let response = post_token_form(&self.http, &client.token_endpoint, &params).await?;
        let record = build_record(
            TokenKey::new(client.backend_id.clone(), user_id),
            client,
            response,
            None,
        );
        self.save_token(&record).await?;
        Ok(record)
    }

    /// Refresh using the stored refresh token.
    ///
    /// Only the active token of a key can be refreshed. Transient failures are
    /// retried with `policy` (or the manager's default).
    pub async fn refresh_token(
        &self,
        token_id: &Uuid,
        policy: Option<RetryPolicy>,
    ) -> Result<OAuthTokenRecord, OAuthError> {
        let current = self
            .tokens
            .get(token_id)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant(format!("Unknown token {}", token_id)))?;

        match current.status {
            TokenStatus::Active => {}
            TokenStatus::Revoked => {
                return Err(OAuthError::InvalidGrant("Token was revoked".to_string()));
            }
            TokenStatus::Superseded => {
                return Err(OAuthError::InvalidGrant(
                    "Token was superseded by a newer token".to_string(),
                ));
            }
        }
        let refresh_token = match current.refresh_token.as_deref() {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => return Err(OAuthError::InvalidGrant("No refresh token".to_string())),
        };

        let client = self
            .clients
            .get(&current.key.backend_id)
            .await?
            .ok_or_else(|| {
                OAuthError::InvalidGrant(format!(
                    "No client registration for backend {}",
                    current.key.backend_id
                ))
            })?;

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", client.client_id.as_str()),
        ];
        if let Some(secret) = &client.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let policy = policy.unwrap_or(self.retry);
        info!(
            backend_id = %current.key.backend_id,
            max_attempts = policy.max_attempts,
            "[TokenManager] Refreshing token"
        );

        let http = &self.http;
        let endpoint = client.token_endpoint.as_str();
        let form = params.as_slice();
        let response = policy
            .run(move |attempt| {
                debug!(attempt, "[TokenManager] Refresh attempt");
                post_token_form(http, endpoint, form)
            })
            .await
            .map_err(|e| {
                warn!(backend_id = %current.key.backend_id, "[TokenManager] Refresh failed: {}", e);
                OAuthError::from(e)
            })?;

        let record = build_record(current.key.clone(), &client, response, Some(&current));
        self.save_token(&record).await?;
        Ok(record)
    }

    /// Revoke at the provider (best effort), then mark revoked locally
    pub async fn revoke_token(&self, token_id: &Uuid) -> Result<(), OAuthError> {
        let record = self
            .tokens
            .get(token_id)
            .await?
            .ok_or_else(|| OAuthError::InvalidRequest(format!("Unknown token {}", token_id)))?;

        let client = self.clients.get(&record.key.backend_id).await?;
        if let Some(endpoint) = client.as_ref().and_then(|c| c.revocation_endpoint.as_deref()) {
            let (token, hint) = match record.refresh_token.as_deref() {
                Some(rt) if !rt.is_empty() => (rt, "refresh_token"),
                _ => (record.access_token.as_str(), "access_token"),
            };
            let mut params = vec![("token", token), ("token_type_hint", hint)];
            if let Some(client) = &client {
                params.push(("client_id", client.client_id.as_str()));
                if let Some(secret) = &client.client_secret {
                    params.push(("client_secret", secret.as_str()));
                }
            }

            match self.http.post(endpoint).form(&params).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(token_id = %token_id, "[TokenManager] Revoked at provider");
                }
                Ok(response) => warn!(
                    token_id = %token_id,
                    status = %response.status(),
                    "[TokenManager] Provider revocation failed"
                ),
                Err(e) => warn!(
                    token_id = %token_id,
                    "[TokenManager] Provider revocation failed: {}",
                    e
                ),
            }
        }

        self.tokens.mark_revoked(token_id).await?;
        info!(token_id = %token_id, "[TokenManager] Token revoked");
        Ok(())
    }
}

fn build_record(
    key: TokenKey,
    client: &OAuthClient,
    response: TokenResponse,
    previous: Option<&OAuthTokenRecord>,
) -> OAuthTokenRecord {
    let now = Utc::now();
    let expires_at = response.expires_at(now);
    let mut record = OAuthTokenRecord::new(key, client.client_id.clone(), response.access_token);
    record.token_type = response.token_type;
    record.expires_at = expires_at;
    record.created_at = now;
    record.refresh_token = response
        .refresh_token
        .or_else(|| previous.and_then(|p| p.refresh_token.clone()));
    record.scope = response
        .scope
        .or_else(|| previous.and_then(|p| p.scope.clone()));
    record
}
