//! Gateway integration tests
//!
//! Config resolution, connection pooling, tool aggregation and call routing
//! against scripted backends.

mod aggregator;
mod resolver;
mod transport;

use std::sync::Arc;

use mcproxy_core::ServerConfig;
use mcproxy_gateway::{GatewayServer, GatewaySettings};
use tests::fixtures;
use tests::{MockInstanceRepository, MockRepositories, MockTransportProvider};

/// A gateway wired to mocks with a single instance `inst`
pub struct Harness {
    pub server: GatewayServer,
    pub repos: MockRepositories,
    pub provider: Arc<MockTransportProvider>,
}

impl Harness {
    pub fn new(backends: Vec<ServerConfig>, provider: MockTransportProvider) -> Self {
        Self::with_settings(backends, provider, fixtures::settings())
    }

    pub fn with_settings(
        backends: Vec<ServerConfig>,
        provider: MockTransportProvider,
        settings: GatewaySettings,
    ) -> Self {
        let repos = MockRepositories::new(
            MockInstanceRepository::new()
                .with_instance(fixtures::instance("inst"))
                .with_backends("inst", backends),
        );
        let provider = Arc::new(provider);
        let server = GatewayServer::new(settings, repos.dependencies(provider.clone()));
        Self {
            server,
            repos,
            provider,
        }
    }

    pub fn aggregator(&self) -> &mcproxy_gateway::ToolsAggregator {
        &self.server.services().aggregator
    }
}
