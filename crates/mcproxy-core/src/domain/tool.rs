//! Merged tool record

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool as exposed through the merged `tools/list` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRecord {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_schema")]
    pub input_schema: Value,
    /// Remaining backend-provided fields (annotations, title, output schema)
    #[serde(flatten, default)]
    pub extra: Map<String, Value>,
    /// Not part of the wire format
    #[serde(skip, default = "default_enabled")]
    pub enabled: bool,
    /// Origin backend name
    #[serde(skip)]
    pub backend: String,
}

fn empty_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

fn default_enabled() -> bool {
    true
}

impl ToolRecord {
    pub fn new(name: impl Into<String>, description: Option<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description,
            input_schema,
            extra: Map::new(),
            enabled: true,
            backend: String::new(),
        }
    }

    /// Attribute this tool to `backend`, prefixing the description with `[backend] `
    pub fn attributed_to(mut self, backend: &str, enabled: bool) -> Self {
        let description = self.description.take().unwrap_or_default();
        self.description = Some(format!("[{}] {}", backend, description));
        self.backend = backend.to_string();
        self.enabled = enabled;
        self
    }
}
