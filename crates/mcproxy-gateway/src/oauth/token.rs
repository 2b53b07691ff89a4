//! Token endpoint wire types

use chrono::{DateTime, Duration, Utc};
use mcproxy_core::Retryable;
use serde::Deserialize;
use thiserror::Error;

use super::dcr::ErrorResponse;
use super::OAuthError;

/// Token response from OAuth server
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Lifetimes longer than this (100 years) are stored as "no expiry"
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 100 * 365 * 24 * 60 * 60;

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// Absolute expiry relative to `now`.
    ///
    /// A zero or negative `expires_in` means already expired.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let secs = self.expires_in?;
        if secs <= 0 {
            return Some(now);
        }
        if secs > MAX_TOKEN_LIFETIME_SECS {
            return None;
        }
        Duration::try_seconds(secs).and_then(|lifetime| now.checked_add_signed(lifetime))
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Outcome of one token endpoint request
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token endpoint unreachable: {0}")]
    Transport(String),

    #[error("Token endpoint returned HTTP {status}")]
    Status { status: u16, body: String },

    #[error("Token request rejected: {error}")]
    Rejected {
        error: String,
        description: Option<String>,
    },

    #[error("Malformed token response: {0}")]
    Malformed(String),
}

impl Retryable for TokenError {
    fn is_retryable(&self) -> bool {
        match self {
            TokenError::Transport(_) => true,
            TokenError::Status { status, .. } => *status >= 500 || *status == 429,
            TokenError::Rejected { .. } | TokenError::Malformed(_) => false,
        }
    }
}

impl From<TokenError> for OAuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Transport(msg) => OAuthError::TemporarilyUnavailable(msg),
            TokenError::Status { status, .. } if status >= 500 || status == 429 => {
                OAuthError::TemporarilyUnavailable(format!(
                    "Token endpoint returned HTTP {}",
                    status
                ))
            }
            TokenError::Status { status, .. } => {
                OAuthError::InvalidGrant(format!("Token endpoint returned HTTP {}", status))
            }
            TokenError::Rejected { error, description } => {
                if error == "invalid_grant" {
                    OAuthError::InvalidGrant(description.unwrap_or(error))
                } else {
                    OAuthError::provider(error, description)
                }
            }
            TokenError::Malformed(msg) => OAuthError::ServerError(msg),
        }
    }
}

/// POST a form to a token endpoint and decode the response
pub(crate) async fn post_token_form(
    http: &reqwest::Client,
    token_endpoint: &str,
    params: &[(&str, &str)],
) -> Result<TokenResponse, TokenError> {
    let response = http
        .post(token_endpoint)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(params)
        .send()
        .await
        .map_err(|e| TokenError::Transport(e.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| TokenError::Transport(e.to_string()))?;

    if !status.is_success() {
        if status.is_client_error() && status.as_u16() != 429 {
            if let Ok(err) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(TokenError::Rejected {
                    error: err.error,
                    description: err.error_description,
                });
            }
        }
        return Err(TokenError::Status {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| TokenError::Malformed(e.to_string()))
}
