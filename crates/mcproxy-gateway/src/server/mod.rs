//! Gateway Server
//!
//! Axum server exposing the JSON-RPC endpoint, the OAuth well-known
//! documents, and the backend authorization callback.

mod dependencies;
mod handlers;
pub mod jsonrpc;
mod service_container;
mod state;

pub use dependencies::{DependenciesBuilder, GatewayDependencies};
pub use handlers::{AuthorizationServerDocument, CallbackResponse, ProtectedResourceDocument};
pub use service_container::ServiceContainer;
pub use state::AppState;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::settings::GatewaySettings;

/// MCP Proxy Gateway server
pub struct GatewayServer {
    settings: Arc<GatewaySettings>,
    services: ServiceContainer,
}

impl GatewayServer {
    /// Wire the gateway from its dependencies. Must run inside a Tokio runtime.
    pub fn new(settings: GatewaySettings, dependencies: GatewayDependencies) -> Self {
        info!("[Gateway] Initializing services");
        let services = ServiceContainer::initialize(&dependencies, &settings);
        Self {
            settings: Arc::new(settings),
            services,
        }
    }

    pub fn services(&self) -> &ServiceContainer {
        &self.services
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Build the Axum router
    pub fn build_router(&self) -> Router {
        let app_state = AppState::new(&self.services, self.settings.clone());

        let mut router = Router::new()
            .route("/health", get(handlers::health))
            .route(
                "/.well-known/oauth-authorization-server",
                get(handlers::oauth_metadata),
            )
            .route(
                "/.well-known/oauth-authorization-server/mcp/{instance_id}",
                get(handlers::oauth_metadata_for_instance),
            )
            .route(
                "/.well-known/oauth-protected-resource",
                get(handlers::resource_metadata),
            )
            // RFC 9728: resource-specific metadata
            .route(
                "/.well-known/oauth-protected-resource/mcp/{instance_id}",
                get(handlers::resource_metadata_for_instance),
            )
            .route(
                "/oauth/callback/{backend_id}",
                get(handlers::oauth_callback),
            )
            .route("/mcp/{instance_id}", post(jsonrpc::mcp_endpoint))
            .with_state(app_state)
            .layer(TraceLayer::new_for_http());

        if self.settings.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router
    }

    /// Serve until Ctrl-C, then close every pooled connection
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.settings.addr()?;
        info!("[Gateway] Starting on {}", addr);
        info!(
            "[Gateway] CORS: {}",
            if self.settings.enable_cors {
                "enabled"
            } else {
                "disabled"
            }
        );
        match &self.settings.issuer_url {
            Some(issuer) => info!("[Gateway] OAuth issuer: {}", issuer),
            None => info!("[Gateway] OAuth issuer not configured, well-known documents disabled"),
        }

        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("[Gateway] Ready to accept connections");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("[Gateway] Shutting down connection pool");
        self.services.pool.shutdown().await;
        Ok(())
    }

    /// Start the server in the background
    pub fn spawn(self) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("[Gateway] Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("[Gateway] Shutdown signal received");
}
