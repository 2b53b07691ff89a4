//! Service Container - holds all initialized services
//!
//! Services are created once from [`GatewayDependencies`] and shared through
//! `Arc`. Nothing here is global.

use std::sync::Arc;

use crate::config::ConfigResolver;
use crate::oauth::{DcrClient, OAuthManager, OAuthSettings, TokenManager};
use crate::pool::{ConnectionFactory, ConnectionPool};
use crate::settings::GatewaySettings;
use crate::tools::{RequestRecorder, ToolsAggregator, RECORDER_CAPACITY};

use super::dependencies::GatewayDependencies;

#[derive(Clone)]
pub struct ServiceContainer {
    pub resolver: Arc<ConfigResolver>,
    pub pool: Arc<ConnectionPool>,
    pub token_manager: Arc<TokenManager>,
    pub oauth: Arc<OAuthManager>,
    pub aggregator: Arc<ToolsAggregator>,
    pub recorder: RequestRecorder,
    pub dependencies: GatewayDependencies,
}

impl ServiceContainer {
    /// Wire services together. Must run inside a Tokio runtime: the request
    /// log writer is spawned here.
    pub fn initialize(deps: &GatewayDependencies, settings: &GatewaySettings) -> Self {
        let token_manager = Arc::new(TokenManager::new(
            deps.oauth_tokens.clone(),
            deps.oauth_clients.clone(),
            deps.http_client.clone(),
            settings.retry,
        ));

        let oauth = Arc::new(OAuthManager::new(
            DcrClient::new(deps.http_client.clone()),
            deps.oauth_clients.clone(),
            deps.oauth_sessions.clone(),
            token_manager.clone(),
            OAuthSettings {
                public_url: settings.public_url.clone(),
                session_ttl: settings.oauth_session_ttl,
                scopes: settings.oauth_scopes.clone(),
                refresh_retry: settings.retry,
                ..OAuthSettings::default()
            },
        ));

        let factory = Arc::new(
            ConnectionFactory::new(
                deps.transport_provider.clone(),
                settings.retry,
                settings.connect_timeout,
            )
            .with_token_manager(token_manager.clone()),
        );
        let pool = Arc::new(ConnectionPool::new(factory, settings.pool_max_idle));
        let resolver = Arc::new(ConfigResolver::new(
            deps.instances.clone(),
            settings.config_cache_ttl,
        ));

        // The writer task ends when the last recorder clone is dropped
        let (recorder, _writer) =
            RequestRecorder::spawn(deps.request_logs.clone(), RECORDER_CAPACITY);

        let aggregator = Arc::new(
            ToolsAggregator::new(
                resolver.clone(),
                pool.clone(),
                settings.tools_cache_ttl,
                settings.request_timeout,
            )
            .with_recorder(recorder.clone())
            .with_oauth(oauth.clone()),
        );

        Self {
            resolver,
            pool,
            token_manager,
            oauth,
            aggregator,
            recorder,
            dependencies: deps.clone(),
        }
    }
}
