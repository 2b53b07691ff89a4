//! OAuth errors
//!
//! Serialized as `{ "error": <code>, "error_description": <text> }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mcproxy_core::Retryable;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum OAuthError {
    #[error("Unknown or already used state")]
    InvalidState,

    #[error("Authorization session expired")]
    SessionExpired,

    /// Error reported by the authorization server (passed through)
    #[error("{error}: {}", .description.as_deref().unwrap_or("no description"))]
    Provider {
        error: String,
        description: Option<String>,
    },

    #[error("Unsupported authentication scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Server misconfiguration: {0}")]
    ServerMisconfiguration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("OAuth not supported: {0}")]
    OAuthNotSupported(String),

    #[error("Temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

impl OAuthError {
    pub fn code(&self) -> &str {
        match self {
            OAuthError::InvalidState => "invalid_state",
            OAuthError::SessionExpired => "session_expired",
            OAuthError::Provider { error, .. } => error,
            OAuthError::UnsupportedScheme(_) => "unsupported_response_type",
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::ServerMisconfiguration(_) => "server_misconfiguration",
            OAuthError::NotFound(_) => "not_found",
            OAuthError::OAuthNotSupported(_) => "oauth_not_supported",
            OAuthError::TemporarilyUnavailable(_) => "temporarily_unavailable",
            OAuthError::ServerError(_) => "server_error",
        }
    }

    pub fn description(&self) -> String {
        match self {
            OAuthError::Provider { description, .. } => {
                description.clone().unwrap_or_else(|| self.code().to_string())
            }
            other => other.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OAuthError::ServerMisconfiguration(_) | OAuthError::ServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            OAuthError::NotFound(_) | OAuthError::OAuthNotSupported(_) => StatusCode::NOT_FOUND,
            OAuthError::TemporarilyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn provider(error: impl Into<String>, description: Option<String>) -> Self {
        OAuthError::Provider {
            error: error.into(),
            description,
        }
    }
}

impl From<anyhow::Error> for OAuthError {
    fn from(err: anyhow::Error) -> Self {
        OAuthError::ServerError(format!("{:#}", err))
    }
}

impl Retryable for OAuthError {
    fn is_retryable(&self) -> bool {
        matches!(self, OAuthError::TemporarilyUnavailable(_))
    }
}

/// Wire form of an OAuth error
#[derive(Debug, Serialize)]
pub struct OAuthErrorBody {
    pub error: String,
    pub error_description: String,
}

impl From<&OAuthError> for OAuthErrorBody {
    fn from(err: &OAuthError) -> Self {
        Self {
            error: err.code().to_string(),
            error_description: err.description(),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(OAuthErrorBody::from(&self))).into_response()
    }
}
