//! Repository implementations using SQLite.

mod instance_repository;
mod oauth_client_repository;
mod oauth_session_repository;
mod oauth_token_repository;
mod request_log_repository;

pub use instance_repository::SqliteInstanceRepository;
pub use oauth_client_repository::SqliteOAuthClientRepository;
pub use oauth_session_repository::SqliteOAuthSessionRepository;
pub use oauth_token_repository::SqliteOAuthTokenRepository;
pub use request_log_repository::SqliteRequestLogRepository;

use chrono::{DateTime, Utc};

/// Parse a stored timestamp (RFC 3339, or SQLite's `datetime('now')` format).
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return dt.and_utc();
    }
    Utc::now()
}

/// Decode a JSON string list column, treating corrupt values as empty.
pub(crate) fn parse_string_list(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_else(|e| {
        tracing::warn!("[Storage] Failed to parse stored list: {}", e);
        Vec::new()
    })
}
