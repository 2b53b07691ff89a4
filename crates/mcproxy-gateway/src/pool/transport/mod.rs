//! Transport abstraction for backend connections
//!
//! A [`TransportProvider`] turns a resolved [`ServerConfig`] plus the
//! per-attempt [`TransportContext`] into a [`Transport`]. One transport is
//! built per connect attempt and closed before the next attempt starts.

mod credentials;
mod headers;
mod http;
mod stdio;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcproxy_core::{ServerConfig, TransportDescriptor, TransportType};

pub use credentials::CredentialFile;
pub use headers::{bearer, header_for_env, headers_from_env};
pub use http::{build_header_map, probe_auth_challenge, requires_oauth, HttpTransport};
pub use stdio::StdioTransport;

use super::connection::BackendClient;
use super::factory::ConnectFailure;

/// Result of a transport connection attempt
pub enum TransportConnectResult {
    /// Successfully connected
    Connected(Arc<dyn BackendClient>),
    /// Backend rejected us; carries the raw `WWW-Authenticate` value if seen
    OAuthRequired {
        server_url: String,
        challenge: Option<String>,
    },
    /// Connection failed
    Failed(String),
}

impl std::fmt::Debug for TransportConnectResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportConnectResult::Connected(_) => f.write_str("Connected"),
            TransportConnectResult::OAuthRequired {
                server_url,
                challenge,
            } => f
                .debug_struct("OAuthRequired")
                .field("server_url", server_url)
                .field("challenge", challenge)
                .finish(),
            TransportConnectResult::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

/// Transport trait for MCP connections
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attempt to connect to the MCP server
    async fn connect(&self) -> TransportConnectResult;

    /// Release anything a failed attempt left behind
    async fn close(&self);

    fn transport_type(&self) -> TransportType;

    /// Get a description for logging
    fn description(&self) -> String;
}

/// Material injected into one connect attempt
#[derive(Clone, Default)]
pub struct TransportContext {
    /// Credential environment (merged over the descriptor's env for stdio,
    /// mapped through header conventions for HTTP)
    pub env: BTreeMap<String, String>,
    /// OAuth access token for protected HTTP backends
    pub bearer_token: Option<String>,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportContext")
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("has_bearer", &self.bearer_token.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Builds transports for a backend
pub trait TransportProvider: Send + Sync {
    fn create(
        &self,
        config: &ServerConfig,
        ctx: TransportContext,
    ) -> Result<Box<dyn Transport>, ConnectFailure>;
}

/// Default provider: rmcp child-process and streamable-HTTP transports
#[derive(Debug, Default, Clone)]
pub struct RmcpTransportProvider {
    http: reqwest::Client,
}

impl RmcpTransportProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client used to probe for `WWW-Authenticate` challenges
    pub fn with_probe_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl TransportProvider for RmcpTransportProvider {
    fn create(
        &self,
        config: &ServerConfig,
        ctx: TransportContext,
    ) -> Result<Box<dyn Transport>, ConnectFailure> {
        match &config.transport {
            TransportDescriptor::Stdio { command, args, env } => {
                if command.trim().is_empty() {
                    return Err(ConnectFailure::Config(format!(
                        "Backend '{}' has an empty command",
                        config.name
                    )));
                }
                let mut merged = env.clone();
                merged.extend(ctx.env);
                Ok(Box::new(StdioTransport::new(
                    config.name.clone(),
                    command.clone(),
                    args.clone(),
                    merged,
                    ctx.connect_timeout,
                )))
            }
            TransportDescriptor::Http { url, headers } => {
                url::Url::parse(url).map_err(|e| {
                    ConnectFailure::Config(format!(
                        "Backend '{}' has an invalid URL '{}': {}",
                        config.name, url, e
                    ))
                })?;

                let mut merged = headers.clone();
                merged.extend(headers_from_env(&ctx.env));
                if let Some(token) = &ctx.bearer_token {
                    merged.retain(|k, _| !k.eq_ignore_ascii_case("authorization"));
                    merged.insert("Authorization".to_string(), bearer(token));
                }
                let header_map = build_header_map(&merged).map_err(|e| {
                    ConnectFailure::Config(format!("Backend '{}': {}", config.name, e))
                })?;
                Ok(Box::new(HttpTransport::new(
                    config.name.clone(),
                    url.clone(),
                    header_map,
                    ctx.connect_timeout,
                    self.http.clone(),
                )))
            }
        }
    }
}
