//! Connection Factory
//!
//! Builds one [`ConnectedClient`] per backend, independent of pooling policy.
//! Each attempt gets a fresh transport and a fresh credential file; both are
//! torn down before the next attempt starts.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use mcproxy_core::{CredentialBlob, RetryPolicy, Retryable, ServerConfig, TokenKey};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::connection::ConnectedClient;
use super::transport::{
    CredentialFile, TransportConnectResult, TransportContext, TransportProvider,
};
use crate::config::backend_fingerprint;
use crate::oauth::TokenManager;

/// Why a backend could not be connected
#[derive(Debug, Clone, Error)]
pub enum ConnectFailure {
    /// Bad configuration; retrying cannot help
    #[error("{0}")]
    Config(String),

    /// Network, spawn or handshake failure
    #[error("{0}")]
    Transient(String),

    /// Backend rejected the connection as unauthorized
    #[error("authorization required by {server_url}")]
    AuthRequired {
        server_url: String,
        /// Raw `WWW-Authenticate` header value
        challenge: Option<String>,
    },
}

impl ConnectFailure {
    pub fn code(&self) -> &'static str {
        match self {
            ConnectFailure::Config(_) => "config_error",
            ConnectFailure::Transient(_) => "backend_unavailable",
            ConnectFailure::AuthRequired { .. } => "auth_required",
        }
    }
}

impl Retryable for ConnectFailure {
    fn is_retryable(&self) -> bool {
        matches!(self, ConnectFailure::Transient(_))
    }
}

/// Creates backend connections with bounded retry
pub struct ConnectionFactory {
    provider: Arc<dyn TransportProvider>,
    token_manager: Option<Arc<TokenManager>>,
    retry: RetryPolicy,
    connect_timeout: Duration,
}

impl ConnectionFactory {
    pub fn new(
        provider: Arc<dyn TransportProvider>,
        retry: RetryPolicy,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            token_manager: None,
            retry,
            connect_timeout,
        }
    }

    /// Inject stored OAuth tokens into protected HTTP backends
    pub fn with_token_manager(mut self, token_manager: Arc<TokenManager>) -> Self {
        self.token_manager = Some(token_manager);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Connect to one backend on behalf of `user_id`
    pub async fn connect(
        &self,
        config: &ServerConfig,
        user_id: &str,
    ) -> Result<ConnectedClient, ConnectFailure> {
        let blob = match config.credentials.as_deref() {
            Some(raw) => CredentialBlob::parse(raw).map_err(|e| {
                ConnectFailure::Config(format!(
                    "Malformed credential blob for backend '{}': {}",
                    config.name, e
                ))
            })?,
            None => CredentialBlob::default(),
        };

        let bearer = self.bearer_for(config, user_id).await?;
        let fingerprint = backend_fingerprint(config);

        let blob_ref = &blob;
        let bearer_ref = bearer.as_deref();
        let fingerprint_ref = fingerprint.as_str();
        let result = self
            .retry
            .run(move |attempt| {
                self.attempt(config, blob_ref, bearer_ref, fingerprint_ref, attempt)
            })
            .await;

        match &result {
            Ok(_) => info!(backend = %config.name, "[ConnectionFactory] Connected"),
            Err(ConnectFailure::AuthRequired { .. }) => {
                info!(backend = %config.name, "[ConnectionFactory] Authorization required")
            }
            Err(e) => warn!(backend = %config.name, "[ConnectionFactory] Giving up: {}", e),
        }
        result
    }

    /// Connect to every backend in parallel; all attempts settle before returning
    pub async fn connect_all(
        &self,
        configs: &[ServerConfig],
        user_id: &str,
    ) -> Vec<(String, Result<ConnectedClient, ConnectFailure>)> {
        let futures = configs.iter().map(|config| async move {
            (config.name.clone(), self.connect(config, user_id).await)
        });
        join_all(futures).await
    }

    async fn bearer_for(
        &self,
        config: &ServerConfig,
        user_id: &str,
    ) -> Result<Option<String>, ConnectFailure> {
        if !config.requires_oauth {
            return Ok(None);
        }
        let Some(token_manager) = &self.token_manager else {
            return Ok(None);
        };

        let key = TokenKey::new(config.id.clone(), user_id);
        match token_manager.get_valid_token(&key).await {
            Ok(token) => {
                debug!(
                    backend = %config.name,
                    has_token = token.is_some(),
                    "[ConnectionFactory] Looked up OAuth token"
                );
                Ok(token)
            }
            Err(e) => Err(ConnectFailure::Transient(format!(
                "Token lookup failed for backend '{}': {}",
                config.name, e
            ))),
        }
    }

    async fn attempt(
        &self,
        config: &ServerConfig,
        blob: &CredentialBlob,
        bearer: Option<&str>,
        fingerprint: &str,
        attempt: u32,
    ) -> Result<ConnectedClient, ConnectFailure> {
        debug!(
            backend = %config.name,
            attempt,
            max_attempts = self.retry.max_attempts,
            "[ConnectionFactory] Connect attempt"
        );

        let mut env = blob.env.clone();
        let credential_file = match &blob.file {
            Some(file_spec) => {
                let file = CredentialFile::write(&file_spec.contents).map_err(|e| {
                    ConnectFailure::Transient(format!("Failed to write credential file: {}", e))
                })?;
                env.insert(file_spec.env_var.clone(), file.path().display().to_string());
                Some(file)
            }
            None => None,
        };

        let ctx = TransportContext {
            env,
            bearer_token: bearer.map(str::to_string),
            connect_timeout: self.connect_timeout,
        };
        let transport = match self.provider.create(config, ctx) {
            Ok(t) => t,
            Err(e) => {
                if let Some(file) = &credential_file {
                    file.close();
                }
                return Err(e);
            }
        };

        let failure = match transport.connect().await {
            TransportConnectResult::Connected(client) => {
                return Ok(ConnectedClient::new(
                    config.id.clone(),
                    config.name.clone(),
                    config.owned_tool_names(),
                    client,
                )
                .with_fingerprint(fingerprint)
                .with_credential_file(credential_file));
            }
            TransportConnectResult::OAuthRequired {
                server_url,
                challenge,
            } => ConnectFailure::AuthRequired {
                server_url,
                challenge,
            },
            TransportConnectResult::Failed(e) => ConnectFailure::Transient(e),
        };

        transport.close().await;
        if let Some(file) = &credential_file {
            file.close();
        }
        debug!(
            backend = %config.name,
            transport = %transport.description(),
            "[ConnectionFactory] Attempt {} torn down",
            attempt
        );
        Err(failure)
    }
}
