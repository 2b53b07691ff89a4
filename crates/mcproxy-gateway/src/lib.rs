//! McProxy Gateway
//!
//! MCP proxy that provides:
//! - Per-instance backend resolution with content-hash caching
//! - Pooled stdio / streamable-HTTP backend connections with bounded retry
//! - Tool aggregation and call routing across backends
//! - Outbound OAuth 2.1 (discovery, dynamic registration, PKCE, refresh)
//! - JSON-RPC and OAuth well-known HTTP surface

pub mod cache;
pub mod config;
pub mod error;
pub mod oauth;
pub mod pool;
pub mod server;
pub mod settings;
pub mod tools;

pub use cache::TtlCache;
pub use config::{backend_fingerprint, content_hash, ConfigResolver};
pub use error::{GatewayError, GatewayResult};
pub use oauth::{OAuthError, OAuthManager, OAuthSettings, TokenManager};
pub use pool::{
    BackendClient, ConnectFailure, ConnectedClient, ConnectionFactory, ConnectionPool, Lease,
    PoolKey, PoolStats, TransportProvider,
};
pub use server::{
    AppState, DependenciesBuilder, GatewayDependencies, GatewayServer, ServiceContainer,
};
pub use settings::GatewaySettings;
pub use tools::{RequestRecorder, ToolsAggregator, ToolsList};
