//! # McProxy Core Library
//!
//! Domain entities, repository traits, and the shared retry policy for the
//! MCP proxy gateway.
//!
//! ## Modules
//!
//! - `domain` - Core entities (ServerConfig, ServerInstance, OAuth records)
//! - `repository` - Data access traits
//! - `retry` - Fixed-delay retry policy used by connect and token refresh

pub mod domain;
pub mod repository;
pub mod retry;

// Re-export commonly used types
pub use domain::*;
pub use repository::*;
pub use retry::{RetryPolicy, Retryable};
