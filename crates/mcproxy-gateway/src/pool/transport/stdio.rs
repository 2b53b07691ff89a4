//! STDIO transport for MCP servers
//!
//! Handles connecting to MCP servers that run as child processes
//! communicating over stdin/stdout.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcproxy_core::TransportType;
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use rmcp::ServiceExt;
use tokio::process::Command;
use tracing::{debug, error, info};

use super::{Transport, TransportConnectResult};
use crate::pool::connection::{McpClientHandler, RmcpBackendClient};

/// STDIO transport for child process MCP servers
pub struct StdioTransport {
    backend_name: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    connect_timeout: Duration,
    attempted: AtomicBool,
}

impl StdioTransport {
    pub fn new(
        backend_name: String,
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            backend_name,
            command,
            args,
            env,
            connect_timeout,
            attempted: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> TransportConnectResult {
        self.attempted.store(true, Ordering::Release);
        info!(
            backend = %self.backend_name,
            command = %self.command,
            "[StdioTransport] Connecting"
        );

        let command_path = match which::which(&self.command)
            .or_else(|_| which::which(format!("{}.exe", &self.command)))
        {
            Ok(path) => path,
            Err(_) => {
                let err = format!(
                    "Command not found: {}. Ensure it's installed and in PATH.",
                    self.command
                );
                error!(backend = %self.backend_name, "[StdioTransport] {}", err);
                return TransportConnectResult::Failed(err);
            }
        };

        debug!(
            backend = %self.backend_name,
            path = ?command_path,
            "[StdioTransport] Found command"
        );

        let args = self.args.clone();
        let env = self.env.clone();

        // The child is killed when the transport (or the running service) drops
        let transport =
            match TokioChildProcess::new(Command::new(&command_path).configure(move |cmd| {
                cmd.args(&args)
                    .envs(&env)
                    .stderr(Stdio::null())
                    .kill_on_drop(true);
            })) {
                Ok(t) => t,
                Err(e) => {
                    let err = format!("Failed to spawn process: {}", e);
                    error!(backend = %self.backend_name, "[StdioTransport] {}", err);
                    return TransportConnectResult::Failed(err);
                }
            };

        let handler = McpClientHandler::new(&self.backend_name);
        let handshake = tokio::time::timeout(self.connect_timeout, handler.serve(transport)).await;
        let client = match handshake {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                let err = format!("MCP handshake failed: {}", e);
                error!(backend = %self.backend_name, "[StdioTransport] {}", err);
                return TransportConnectResult::Failed(err);
            }
            Err(_) => {
                let err = format!("Connection timeout ({:?})", self.connect_timeout);
                error!(backend = %self.backend_name, "[StdioTransport] {}", err);
                return TransportConnectResult::Failed(err);
            }
        };

        info!(backend = %self.backend_name, "[StdioTransport] Connected");
        TransportConnectResult::Connected(Arc::new(RmcpBackendClient::new(
            self.backend_name.clone(),
            client,
        )))
    }

    async fn close(&self) {
        // A failed handshake drops the child process inside `serve`
        if self.attempted.swap(false, Ordering::AcqRel) {
            debug!(backend = %self.backend_name, "[StdioTransport] Closed");
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Stdio
    }

    fn description(&self) -> String {
        format!("stdio:{}", self.command)
    }
}
