//! Backend server configuration
//!
//! A `ServerConfig` is the immutable snapshot of one backend produced by a
//! resolution cycle. Its position in the instance's backend list is its
//! registration index (lowest index wins tool-name conflicts).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Transport type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Stdio,
    Http,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Stdio => "stdio",
            TransportType::Http => "http",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stdio" => Some(TransportType::Stdio),
            "http" => Some(TransportType::Http),
            _ => None,
        }
    }
}

/// How to reach a backend.
///
/// Maps are `BTreeMap` so that serialization (and therefore the content hash)
/// is independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportDescriptor {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl TransportDescriptor {
    pub fn transport_type(&self) -> TransportType {
        match self {
            TransportDescriptor::Stdio { .. } => TransportType::Stdio,
            TransportDescriptor::Http { .. } => TransportType::Http,
        }
    }

    /// URL for HTTP transports
    pub fn url(&self) -> Option<&str> {
        match self {
            TransportDescriptor::Http { url, .. } => Some(url),
            TransportDescriptor::Stdio { .. } => None,
        }
    }
}

/// Decrypted credential material attached to a backend.
///
/// `env` entries are merged into the transport environment (and, for HTTP
/// backends, pass through the header naming conventions). `file` is written
/// to a private temp file whose path is exported in `file.env_var`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialBlob {
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub file: Option<CredentialFileSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialFileSpec {
    /// Environment variable that receives the temp file path
    pub env_var: String,
    /// File contents
    pub contents: String,
}

impl CredentialBlob {
    /// Parse a stored blob. Malformed blobs are a permanent config error.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn is_empty(&self) -> bool {
        self.env.is_empty() && self.file.is_none()
    }
}

/// A tool name a backend is configured to expose
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ToolBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }

    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: false,
        }
    }
}

/// Resolved configuration for one backend server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Stable backend id (used for OAuth records and redirect URIs)
    pub id: String,
    /// Display name, also the `[name] ` description prefix
    pub name: String,
    /// Owned tools in configured order
    pub tools: Vec<ToolBinding>,
    pub transport: TransportDescriptor,
    /// Raw credential blob (decrypted JSON); parsed at connect time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    /// Backend is an OAuth-protected resource
    #[serde(default)]
    pub requires_oauth: bool,
}

impl ServerConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        transport: TransportDescriptor,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tools: Vec::new(),
            transport,
            credentials: None,
            requires_oauth: false,
        }
    }

    pub fn stdio(
        id: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            name,
            TransportDescriptor::Stdio {
                command: command.into(),
                args: Vec::new(),
                env: BTreeMap::new(),
            },
        )
    }

    pub fn http(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            id,
            name,
            TransportDescriptor::Http {
                url: url.into(),
                headers: BTreeMap::new(),
            },
        )
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(ToolBinding::new).collect();
        self
    }

    pub fn with_tool_binding(mut self, binding: ToolBinding) -> Self {
        self.tools.push(binding);
        self
    }

    pub fn with_credentials(mut self, raw: impl Into<String>) -> Self {
        self.credentials = Some(raw.into());
        self
    }

    pub fn with_oauth(mut self) -> Self {
        self.requires_oauth = true;
        self
    }

    /// Whether this backend is configured to own `tool_name`
    pub fn owns(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|t| t.name == tool_name)
    }

    pub fn binding(&self, tool_name: &str) -> Option<&ToolBinding> {
        self.tools.iter().find(|t| t.name == tool_name)
    }

    pub fn owned_tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }
}
