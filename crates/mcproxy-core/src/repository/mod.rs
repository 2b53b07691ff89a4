//! Repository traits for data access
//!
//! These traits define the interface for data storage without specifying
//! the implementation (SQLite, in-memory, etc.)

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    OAuthClient, OAuthSession, OAuthTokenRecord, RequestRecord, ServerConfig, ServerInstance,
    SessionStatus, TokenKey,
};

/// Result type for repository operations
pub type RepoResult<T> = anyhow::Result<T>;

/// Server instance and backend configuration
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Get an instance by ID
    async fn get(&self, instance_id: &str) -> RepoResult<Option<ServerInstance>>;

    /// Backends of an instance in registration order, with owned tools
    /// and decrypted credential blobs
    async fn list_backends(&self, instance_id: &str) -> RepoResult<Vec<ServerConfig>>;

    /// Create or update an instance
    async fn save(&self, instance: &ServerInstance) -> RepoResult<()>;

    /// Create or update a backend at the given registration index
    async fn save_backend(
        &self,
        instance_id: &str,
        position: u32,
        backend: &ServerConfig,
    ) -> RepoResult<()>;

    /// Remove a backend from an instance
    async fn delete_backend(&self, instance_id: &str, backend_id: &str) -> RepoResult<()>;
}

/// Organization membership (consumed by upstream authorization)
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn is_member(&self, user_id: &str, organization_id: &str) -> RepoResult<bool>;
}

/// OAuth client registrations, one per backend
#[async_trait]
pub trait OAuthClientRepository: Send + Sync {
    async fn get(&self, backend_id: &str) -> RepoResult<Option<OAuthClient>>;

    /// Create or replace the registration for `client.backend_id`
    async fn save(&self, client: &OAuthClient) -> RepoResult<()>;

    async fn delete(&self, backend_id: &str) -> RepoResult<()>;
}

/// Authorization attempts
#[async_trait]
pub trait OAuthSessionRepository: Send + Sync {
    async fn create(&self, session: &OAuthSession) -> RepoResult<()>;

    async fn find_by_state(&self, state: &str) -> RepoResult<Option<OAuthSession>>;

    /// Transition a session out of `pending`.
    ///
    /// Returns `false` (and changes nothing) if the session is no longer pending.
    async fn transition(
        &self,
        id: &Uuid,
        status: SessionStatus,
        error_code: Option<&str>,
        error_description: Option<&str>,
    ) -> RepoResult<bool>;
}

/// Issued tokens
#[async_trait]
pub trait OAuthTokenRepository: Send + Sync {
    async fn get(&self, id: &Uuid) -> RepoResult<Option<OAuthTokenRecord>>;

    /// Latest active token for a key (expiry is not checked here)
    async fn find_active(&self, key: &TokenKey) -> RepoResult<Option<OAuthTokenRecord>>;

    /// Insert `token` as the active token for its key, marking any previously
    /// active token for the same key as superseded
    async fn insert_superseding(&self, token: &OAuthTokenRecord) -> RepoResult<()>;

    /// Mark a token revoked
    async fn mark_revoked(&self, id: &Uuid) -> RepoResult<()>;
}

/// Request observability sink
#[async_trait]
pub trait RequestLogRepository: Send + Sync {
    async fn append(&self, record: &RequestRecord) -> RepoResult<()>;

    /// Most recent records for an instance, newest first
    async fn list_recent(&self, instance_id: &str, limit: usize) -> RepoResult<Vec<RequestRecord>>;
}
