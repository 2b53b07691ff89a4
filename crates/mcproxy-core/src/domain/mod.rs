//! Domain entities and value objects
//!
//! - Backend configuration (ServerConfig, TransportDescriptor, CredentialBlob)
//! - Server instances and their resolved snapshots
//! - Merged tool records
//! - Outbound OAuth records (clients, sessions, tokens)
//! - Request observability records

mod backend;
mod instance;
mod oauth;
mod request_log;
mod tool;

pub use backend::*;
pub use instance::*;
pub use oauth::*;
pub use request_log::*;
pub use tool::*;
