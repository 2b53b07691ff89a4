//! Server instance - a logical grouping of backends presented as one tool surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ServerConfig;

/// A server instance as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInstance {
    pub id: String,
    pub organization_id: String,
    /// User the instance's OAuth tokens are issued to
    pub owner_id: String,
    pub name: String,
    /// Whether the instance is advertised as an OAuth protected resource
    pub oauth_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServerInstance {
    pub fn new(
        id: impl Into<String>,
        organization_id: impl Into<String>,
        owner_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            owner_id: owner_id.into(),
            name: name.into(),
            oauth_enabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_oauth(mut self, enabled: bool) -> Self {
        self.oauth_enabled = enabled;
        self
    }
}

/// One resolution cycle's view of an instance
#[derive(Debug, Clone)]
pub struct ResolvedInstance {
    pub instance_id: String,
    pub organization_id: String,
    pub owner_id: String,
    /// Backends in registration order
    pub backends: Vec<ServerConfig>,
    /// Content hash of `backends`
    pub content_hash: String,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedInstance {
    /// Index and config of the backend owning `tool_name`, lowest index first.
    ///
    /// Also returns the names of any other backends claiming the same tool.
    pub fn owner_of(&self, tool_name: &str) -> Option<(usize, &ServerConfig, Vec<&str>)> {
        let mut claimants = self
            .backends
            .iter()
            .enumerate()
            .filter(|(_, b)| b.owns(tool_name));

        let (index, owner) = claimants.next()?;
        let others = claimants.map(|(_, b)| b.name.as_str()).collect();
        Some((index, owner, others))
    }
}
