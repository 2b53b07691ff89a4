//! Outbound OAuth records
//!
//! OUTBOUND: the gateway acting as OAuth CLIENT of protected backend servers.
//!
//! - `OAuthClient`: registration obtained via DCR, one per backend
//! - `OAuthSession`: one per authorization attempt (pending until callback)
//! - `OAuthTokenRecord`: issued tokens; refresh inserts a new row and
//!   supersedes the previous one

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dynamic client registration for one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthClient {
    pub backend_id: String,
    pub client_id: String,
    /// Absent for public clients
    #[serde(default)]
    pub client_secret: Option<String>,
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthClient {
    /// Check if the registration was made for this redirect URI
    pub fn matches_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == redirect_uri)
    }
}

/// Authorization attempt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Completed,
    Expired,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
            SessionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionStatus::Pending),
            "completed" => Some(SessionStatus::Completed),
            "expired" => Some(SessionStatus::Expired),
            "error" => Some(SessionStatus::Error),
            _ => None,
        }
    }

    /// Only `pending` has outgoing transitions
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Pending, SessionStatus::Completed)
                | (SessionStatus::Pending, SessionStatus::Expired)
                | (SessionStatus::Pending, SessionStatus::Error)
        )
    }
}

/// One authorization attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthSession {
    pub id: Uuid,
    pub user_id: String,
    pub backend_id: String,
    /// CSRF state parameter
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub status: SessionStatus,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OAuthSession {
    /// Expiry dominates the stored status
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Status as observed at `now`
    pub fn effective_status(&self, now: DateTime<Utc>) -> SessionStatus {
        if self.is_expired_at(now) {
            SessionStatus::Expired
        } else {
            self.status
        }
    }
}

/// Token lookup key: one logical token per (backend, user)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenKey {
    pub backend_id: String,
    pub user_id: String,
}

impl TokenKey {
    pub fn new(backend_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Token row status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Active,
    Superseded,
    Revoked,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Superseded => "superseded",
            TokenStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TokenStatus::Active),
            "superseded" => Some(TokenStatus::Superseded),
            "revoked" => Some(TokenStatus::Revoked),
            _ => None,
        }
    }
}

/// A stored OAuth token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokenRecord {
    pub id: Uuid,
    pub key: TokenKey,
    /// OAuth client the token was issued to
    pub client_id: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
    /// `None` means the provider did not state an expiry
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub status: TokenStatus,
    pub created_at: DateTime<Utc>,
}

impl OAuthTokenRecord {
    pub fn new(
        key: TokenKey,
        client_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            client_id: client_id.into(),
            access_token: access_token.into(),
            refresh_token: None,
            token_type: "Bearer".to_string(),
            scope: None,
            expires_at: None,
            status: TokenStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// Active and not expired at `now`
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TokenStatus::Active && !self.is_expired_at(now)
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Get the authorization header value
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}
