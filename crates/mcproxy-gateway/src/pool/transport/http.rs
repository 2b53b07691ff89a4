//! HTTP transport for MCP servers
//!
//! Handles connecting to MCP servers over Streamable HTTP. Headers (static,
//! credential-derived and the OAuth bearer) are validated once by
//! [`build_header_map`] and baked into the reqwest client as default headers.
//! A failed handshake is probed with a plain GET so an auth rejection can be
//! told apart from an unreachable server.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcproxy_core::TransportType;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::ServiceExt;
use tracing::{debug, error, info};

use super::{Transport, TransportConnectResult};
use crate::pool::connection::{McpClientHandler, RmcpBackendClient};

const AUTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP transport for Streamable HTTP MCP servers
pub struct HttpTransport {
    backend_name: String,
    url: String,
    headers: HeaderMap,
    connect_timeout: Duration,
    probe_client: reqwest::Client,
}

/// Validate header names and values into a `HeaderMap`
pub fn build_header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, String> {
    let mut header_map = HeaderMap::new();
    for (key, value) in headers {
        let header_name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| format!("Invalid header name '{}': {}", key, e))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| format!("Invalid header value for '{}': {}", key, e))?;
        header_map.insert(header_name, header_value);
    }
    Ok(header_map)
}

impl HttpTransport {
    pub fn new(
        backend_name: String,
        url: String,
        headers: HeaderMap,
        connect_timeout: Duration,
        probe_client: reqwest::Client,
    ) -> Self {
        Self {
            backend_name,
            url,
            headers,
            connect_timeout,
            probe_client,
        }
    }

    fn build_http_client(&self, header_map: HeaderMap) -> Result<reqwest::Client, String> {
        reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))
    }

    /// Turn a handshake error into OAuthRequired or Failed
    async fn classify_failure(&self, err: String) -> TransportConnectResult {
        let probe = probe_auth_challenge(&self.probe_client, &self.url, &self.headers).await;
        if let Some(probe) = probe {
            info!(
                backend = %self.backend_name,
                status = probe.status,
                "[HttpTransport] Backend requires authorization"
            );
            return TransportConnectResult::OAuthRequired {
                server_url: self.url.clone(),
                challenge: probe.challenge,
            };
        }

        if requires_oauth(&err) {
            info!(
                backend = %self.backend_name,
                "[HttpTransport] Handshake rejected as unauthorized"
            );
            return TransportConnectResult::OAuthRequired {
                server_url: self.url.clone(),
                challenge: None,
            };
        }

        error!(backend = %self.backend_name, "[HttpTransport] {}", err);
        TransportConnectResult::Failed(err)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> TransportConnectResult {
        debug!(
            backend = %self.backend_name,
            url = %self.url,
            header_count = self.headers.len(),
            "[HttpTransport] Connecting"
        );

        let client = match self.build_http_client(self.headers.clone()) {
            Ok(c) => c,
            Err(err) => return TransportConnectResult::Failed(err),
        };

        let transport_config = StreamableHttpClientTransportConfig::with_uri(self.url.as_str());
        let transport = StreamableHttpClientTransport::with_client(client, transport_config);
        let handler = McpClientHandler::new(&self.backend_name);

        match tokio::time::timeout(self.connect_timeout, handler.serve(transport)).await {
            Ok(Ok(client)) => {
                info!(backend = %self.backend_name, "[HttpTransport] Connected");
                TransportConnectResult::Connected(Arc::new(RmcpBackendClient::new(
                    self.backend_name.clone(),
                    client,
                )))
            }
            Ok(Err(e)) => {
                let err = format!("MCP handshake failed: {:#}", e);
                self.classify_failure(err).await
            }
            Err(_) => {
                let err = format!("Connection timeout ({:?})", self.connect_timeout);
                error!(backend = %self.backend_name, "[HttpTransport] {}", err);
                TransportConnectResult::Failed(err)
            }
        }
    }

    async fn close(&self) {
        debug!(backend = %self.backend_name, "[HttpTransport] Closed");
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Http
    }

    fn description(&self) -> String {
        format!("http:{}", self.url)
    }
}

/// Check if an error message indicates the backend wants authorization
pub fn requires_oauth(error_str: &str) -> bool {
    let error_lower = error_str.to_lowercase();
    let oauth_indicators = [
        "401",
        "unauthorized",
        "authrequired",
        "auth required",
        "invalid_token",
        "www-authenticate",
        "access token",
        "missing or invalid",
        "bearer",
    ];
    oauth_indicators.iter().any(|s| error_lower.contains(s))
}

/// What an auth probe observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthProbe {
    pub status: u16,
    pub challenge: Option<String>,
}

/// GET `url` with the connection's headers and report an auth rejection.
///
/// `None` means the response does not look like an auth failure (or the
/// request itself failed).
pub async fn probe_auth_challenge(
    http: &reqwest::Client,
    url: &str,
    headers: &HeaderMap,
) -> Option<AuthProbe> {
    let request = http
        .get(url)
        .timeout(AUTH_PROBE_TIMEOUT)
        .headers(headers.clone())
        .header(
            reqwest::header::ACCEPT,
            "application/json, text/event-stream;q=0.9, */*;q=0.1",
        );

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            debug!(url = %url, error = %err, "[HttpTransport] Auth probe request failed");
            return None;
        }
    };

    let status = response.status().as_u16();
    let challenge = response
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let challenge_implies_auth = challenge
        .as_deref()
        .map(|value| {
            let lower = value.to_ascii_lowercase();
            lower.contains("bearer")
                || lower.contains("invalid_token")
                || lower.contains("insufficient_scope")
                || lower.contains("error=")
        })
        .unwrap_or(false);

    if status != 401 && status != 403 && !challenge_implies_auth {
        return None;
    }

    Some(AuthProbe { status, challenge })
}
