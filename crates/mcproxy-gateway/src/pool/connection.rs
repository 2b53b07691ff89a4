//! Live backend connections
//!
//! [`BackendClient`] is the seam between the pool and the MCP SDK: the rmcp
//! implementation lives here, tests substitute their own. A
//! [`ConnectedClient`] wraps one client together with the resources that
//! must be released with it (credential temp file), and closes exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mcproxy_core::ToolRecord;
use parking_lot::Mutex as SyncMutex;
use rmcp::model::{
    CallToolRequestParams, ClientCapabilities, ClientInfo, Implementation, JsonObject, Meta,
};
use rmcp::service::{Peer, RunningService};
use rmcp::RoleClient;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::transport::CredentialFile;

/// Type alias for the MCP client service
pub type McpClient = RunningService<RoleClient, McpClientHandler>;

/// Operations the gateway needs from one backend
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Full tool list advertised by the backend
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolRecord>>;

    /// Invoke a tool; the result is returned as the backend produced it
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        progress_token: Option<Value>,
    ) -> anyhow::Result<Value>;

    /// Tear down the underlying transport
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Client handler for MCP connections
#[derive(Debug, Clone)]
pub struct McpClientHandler {
    info: ClientInfo,
}

impl McpClientHandler {
    pub fn new(backend_name: &str) -> Self {
        Self {
            info: ClientInfo {
                protocol_version: Default::default(),
                capabilities: ClientCapabilities::default(),
                client_info: Implementation {
                    name: format!("mcproxy-{}", backend_name),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    title: Some("McProxy Gateway".to_string()),
                    icons: None,
                    website_url: None,
                    ..Default::default()
                },
                meta: None,
            },
        }
    }
}

impl rmcp::ClientHandler for McpClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }
}

/// [`BackendClient`] over an rmcp client session
pub struct RmcpBackendClient {
    backend_name: String,
    peer: Peer<RoleClient>,
    running: Mutex<Option<McpClient>>,
}

impl RmcpBackendClient {
    pub fn new(backend_name: impl Into<String>, client: McpClient) -> Self {
        Self {
            backend_name: backend_name.into(),
            peer: client.peer().clone(),
            running: Mutex::new(Some(client)),
        }
    }
}

#[async_trait]
impl BackendClient for RmcpBackendClient {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolRecord>> {
        let tools = self.peer.list_all_tools().await?;
        tools
            .into_iter()
            .map(|tool| {
                let value = serde_json::to_value(&tool)?;
                Ok(serde_json::from_value::<ToolRecord>(value)?)
            })
            .collect()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        progress_token: Option<Value>,
    ) -> anyhow::Result<Value> {
        let meta = match progress_token {
            Some(token) => Some(serde_json::from_value::<Meta>(
                serde_json::json!({ "progressToken": token }),
            )?),
            None => None,
        };
        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments,
            task: None,
            meta,
        };

        let result = self.peer.call_tool(params).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn close(&self) {
        if let Some(client) = self.running.lock().await.take() {
            debug!(backend = %self.backend_name, "[RmcpBackendClient] Cancelling session");
            if let Err(e) = client.cancel().await {
                warn!(backend = %self.backend_name, "[RmcpBackendClient] Cancel failed: {}", e);
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.peer.is_transport_closed()
    }
}

/// A live handle to one backend
pub struct ConnectedClient {
    backend_id: String,
    backend_name: String,
    tool_names: Vec<String>,
    fingerprint: String,
    client: Arc<dyn BackendClient>,
    credential_file: SyncMutex<Option<CredentialFile>>,
    closed: AtomicBool,
}

impl ConnectedClient {
    pub fn new(
        backend_id: impl Into<String>,
        backend_name: impl Into<String>,
        tool_names: Vec<String>,
        client: Arc<dyn BackendClient>,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            backend_name: backend_name.into(),
            tool_names,
            fingerprint: String::new(),
            client,
            credential_file: SyncMutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Fingerprint of the configuration this connection was built from
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    /// Tie a credential temp file's lifetime to this connection
    pub fn with_credential_file(self, file: Option<CredentialFile>) -> Self {
        *self.credential_file.lock() = file;
        self
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn tool_names(&self) -> &[String] {
        &self.tool_names
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn client(&self) -> &Arc<dyn BackendClient> {
        &self.client
    }

    pub fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.client.is_closed()
    }

    /// Close the transport and delete the credential file.
    ///
    /// Returns `true` only for the call that actually performed the close.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        debug!(backend = %self.backend_name, "[ConnectedClient] Closing");
        self.client.close().await;
        let file = self.credential_file.lock().take();
        if let Some(file) = file {
            file.close();
        }
        true
    }
}

impl std::fmt::Debug for ConnectedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedClient")
            .field("backend_id", &self.backend_id)
            .field("backend_name", &self.backend_name)
            .field("tool_names", &self.tool_names)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
