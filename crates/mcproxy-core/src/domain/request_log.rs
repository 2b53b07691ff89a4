//! Request observability record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed or failed `tools/list` / `tools/call` operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub organization_id: Option<String>,
    pub instance_id: String,
    /// `tools/list` or `tools/call`
    pub method: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    pub duration_ms: u64,
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub cache_hit: bool,
    /// `None` on success, else the coarse error code
    #[serde(default)]
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RequestRecord {
    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
    }
}
