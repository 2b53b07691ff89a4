//! Shared handler state

use std::sync::Arc;

use mcproxy_core::InstanceRepository;

use super::ServiceContainer;
use crate::oauth::OAuthManager;
use crate::settings::GatewaySettings;
use crate::tools::ToolsAggregator;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<ToolsAggregator>,
    pub oauth: Arc<OAuthManager>,
    pub instances: Arc<dyn InstanceRepository>,
    pub settings: Arc<GatewaySettings>,
}

impl AppState {
    pub fn new(services: &ServiceContainer, settings: Arc<GatewaySettings>) -> Self {
        Self {
            aggregator: services.aggregator.clone(),
            oauth: services.oauth.clone(),
            instances: services.dependencies.instances.clone(),
            settings,
        }
    }
}
