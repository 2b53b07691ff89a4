//! Dependency Injection Container
//!
//! Every repository and the transport seam are injected, so the gateway runs
//! the same against SQLite, in-memory mocks, or fake backends.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use mcproxy_core::{
    InstanceRepository, OAuthClientRepository, OAuthSessionRepository, OAuthTokenRepository,
    RequestLogRepository,
};

use crate::pool::{RmcpTransportProvider, TransportProvider};

#[derive(Clone)]
pub struct GatewayDependencies {
    pub instances: Arc<dyn InstanceRepository>,
    pub oauth_clients: Arc<dyn OAuthClientRepository>,
    pub oauth_sessions: Arc<dyn OAuthSessionRepository>,
    pub oauth_tokens: Arc<dyn OAuthTokenRepository>,
    /// When absent, request records go to the tracing log only
    pub request_logs: Option<Arc<dyn RequestLogRepository>>,
    pub transport_provider: Arc<dyn TransportProvider>,
    /// Client for discovery, registration and token requests
    pub http_client: reqwest::Client,
}

/// Builder for GatewayDependencies
#[derive(Default)]
pub struct DependenciesBuilder {
    instances: Option<Arc<dyn InstanceRepository>>,
    oauth_clients: Option<Arc<dyn OAuthClientRepository>>,
    oauth_sessions: Option<Arc<dyn OAuthSessionRepository>>,
    oauth_tokens: Option<Arc<dyn OAuthTokenRepository>>,
    request_logs: Option<Arc<dyn RequestLogRepository>>,
    transport_provider: Option<Arc<dyn TransportProvider>>,
    http_client: Option<reqwest::Client>,
}

impl DependenciesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instances(mut self, repo: Arc<dyn InstanceRepository>) -> Self {
        self.instances = Some(repo);
        self
    }

    pub fn with_oauth_clients(mut self, repo: Arc<dyn OAuthClientRepository>) -> Self {
        self.oauth_clients = Some(repo);
        self
    }

    pub fn with_oauth_sessions(mut self, repo: Arc<dyn OAuthSessionRepository>) -> Self {
        self.oauth_sessions = Some(repo);
        self
    }

    pub fn with_oauth_tokens(mut self, repo: Arc<dyn OAuthTokenRepository>) -> Self {
        self.oauth_tokens = Some(repo);
        self
    }

    pub fn with_request_logs(mut self, repo: Arc<dyn RequestLogRepository>) -> Self {
        self.request_logs = Some(repo);
        self
    }

    pub fn with_transport_provider(mut self, provider: Arc<dyn TransportProvider>) -> Self {
        self.transport_provider = Some(provider);
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn build(self) -> Result<GatewayDependencies> {
        let http_client = self.http_client.unwrap_or_default();
        let transport_provider = self.transport_provider.unwrap_or_else(|| {
            Arc::new(RmcpTransportProvider::with_probe_client(http_client.clone()))
        });

        Ok(GatewayDependencies {
            instances: self.instances.ok_or_else(|| anyhow!("instances is required"))?,
            oauth_clients: self
                .oauth_clients
                .ok_or_else(|| anyhow!("oauth_clients is required"))?,
            oauth_sessions: self
                .oauth_sessions
                .ok_or_else(|| anyhow!("oauth_sessions is required"))?,
            oauth_tokens: self
                .oauth_tokens
                .ok_or_else(|| anyhow!("oauth_tokens is required"))?,
            request_logs: self.request_logs,
            transport_provider,
            http_client,
        })
    }
}
