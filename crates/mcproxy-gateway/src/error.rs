//! Gateway errors
//!
//! Every variant maps to a coarse, stable error code surfaced in JSON-RPC
//! `error.data.code`. The message is the triggering error verbatim.

use std::time::Duration;

use thiserror::Error;

use crate::pool::ConnectFailure;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Server instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool is disabled: {0}")]
    ToolDisabled(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend '{backend}' unavailable: {source}")]
    Connect {
        backend: String,
        #[source]
        source: ConnectFailure,
    },

    #[error("Backend '{backend}' requires authorization")]
    AuthorizationRequired {
        backend: String,
        authorization_url: Option<String>,
    },

    #[error("Backend '{backend}' error: {message}")]
    Backend { backend: String, message: String },

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl GatewayError {
    /// Coarse error code
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InstanceNotFound(_) => "not_found",
            GatewayError::UnknownTool(_) => "unknown_tool",
            GatewayError::ToolDisabled(_) => "tool_disabled",
            GatewayError::InvalidParams(_) => "invalid_params",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Connect { source, .. } => source.code(),
            GatewayError::AuthorizationRequired { .. } => "auth_required",
            GatewayError::Backend { .. } => "backend_error",
            GatewayError::Storage(_) => "internal_error",
        }
    }

    /// Whether the request itself was at fault (never retried)
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            GatewayError::UnknownTool(_)
                | GatewayError::ToolDisabled(_)
                | GatewayError::InvalidParams(_)
        )
    }
}
