//! Backend connection pool
//!
//! - `transport` - stdio / streamable-HTTP transports and credential injection
//! - `factory` - builds connections with bounded retry
//! - `connection_pool` - idle connections keyed by (instance, backend) with leases
//! - `connection` - the `BackendClient` seam and `ConnectedClient`

mod connection;
mod connection_pool;
mod factory;
pub mod transport;

pub use connection::{
    BackendClient, ConnectedClient, McpClient, McpClientHandler, RmcpBackendClient,
};
pub use connection_pool::{ConnectionPool, Lease, PoolKey, PoolStats};
pub use factory::{ConnectFailure, ConnectionFactory};
pub use transport::{
    CredentialFile, RmcpTransportProvider, Transport, TransportConnectResult, TransportContext,
    TransportProvider,
};
