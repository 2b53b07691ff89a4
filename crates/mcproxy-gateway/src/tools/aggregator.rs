//! Tools Aggregator and Call Router
//!
//! Merges the tool lists of an instance's backends and routes calls to the
//! backend that owns the tool. Every operation runs under the request timeout
//! and emits a [`RequestRecord`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use mcproxy_core::{RequestRecord, ResolvedInstance, ServerConfig, ToolRecord};
use rmcp::model::JsonObject;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::RequestRecorder;
use crate::cache::TtlCache;
use crate::config::ConfigResolver;
use crate::error::{GatewayError, GatewayResult};
use crate::oauth::{AuthenticateOutcome, OAuthManager};
use crate::pool::{ConnectFailure, ConnectionPool, Lease};

/// Merged tool list of one instance
#[derive(Debug, Clone)]
pub struct ToolsList {
    pub tools: Arc<Vec<ToolRecord>>,
    pub cache_hit: bool,
}

pub struct ToolsAggregator {
    resolver: Arc<ConfigResolver>,
    pool: Arc<ConnectionPool>,
    tools_cache: TtlCache<Arc<Vec<ToolRecord>>>,
    recorder: RequestRecorder,
    oauth: Option<Arc<OAuthManager>>,
    request_timeout: Duration,
}

impl ToolsAggregator {
    pub fn new(
        resolver: Arc<ConfigResolver>,
        pool: Arc<ConnectionPool>,
        tools_cache_ttl: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            pool,
            tools_cache: TtlCache::new("tools", tools_cache_ttl),
            recorder: RequestRecorder::disabled(),
            oauth: None,
            request_timeout,
        }
    }

    pub fn with_recorder(mut self, recorder: RequestRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    /// Start authorizations through `oauth` when a backend demands it
    pub fn with_oauth(mut self, oauth: Arc<OAuthManager>) -> Self {
        self.oauth = Some(oauth);
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    /// List the merged tools of `instance_id`
    pub async fn list_tools(&self, instance_id: &str) -> GatewayResult<ToolsList> {
        let started = Instant::now();
        let mut organization_id = None;

        let result = match tokio::time::timeout(
            self.request_timeout,
            self.list_tools_inner(instance_id, &mut organization_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.request_timeout)),
        };

        let (response_bytes, cache_hit) = match &result {
            Ok(list) => (json_len(list.tools.as_ref()), list.cache_hit),
            Err(_) => (0, false),
        };
        self.recorder.record(RequestRecord {
            organization_id,
            instance_id: instance_id.to_string(),
            method: "tools/list".to_string(),
            tool_name: None,
            duration_ms: elapsed_ms(started),
            request_bytes: 0,
            response_bytes,
            cache_hit,
            error_code: result.as_ref().err().map(|e| e.code().to_string()),
            created_at: Utc::now(),
        });

        result
    }

    async fn list_tools_inner(
        &self,
        instance_id: &str,
        organization_id: &mut Option<String>,
    ) -> GatewayResult<ToolsList> {
        let resolved = self.resolver.resolve(instance_id).await?;
        *organization_id = Some(resolved.organization_id.clone());

        if let Some(tools) = self.tools_cache.get(instance_id, &resolved.content_hash) {
            return Ok(ToolsList {
                tools,
                cache_hit: true,
            });
        }

        let _guard = self.tools_cache.lock(instance_id).await;
        if let Some(tools) = self.tools_cache.get(instance_id, &resolved.content_hash) {
            return Ok(ToolsList {
                tools,
                cache_hit: true,
            });
        }

        let per_backend = join_all(
            resolved
                .backends
                .iter()
                .map(|backend| self.list_backend(&resolved, backend)),
        )
        .await;

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for tool in per_backend.into_iter().flatten() {
            if seen.insert(tool.name.clone()) {
                merged.push(tool);
            } else {
                warn!(
                    instance_id = %instance_id,
                    tool = %tool.name,
                    backend = %tool.backend,
                    "[ToolsAggregator] Duplicate tool name, keeping the earlier backend"
                );
            }
        }

        info!(
            instance_id = %instance_id,
            backends = resolved.backends.len(),
            tools = merged.len(),
            "[ToolsAggregator] Merged tool list"
        );

        let tools = Arc::new(merged);
        self.tools_cache
            .insert(instance_id, &resolved.content_hash, tools.clone());
        Ok(ToolsList {
            tools,
            cache_hit: false,
        })
    }

    /// One backend's owned tools. Any failure contributes nothing.
    async fn list_backend(
        &self,
        resolved: &ResolvedInstance,
        backend: &ServerConfig,
    ) -> Vec<ToolRecord> {
        let lease = match self
            .pool
            .acquire(&resolved.instance_id, backend, &resolved.owner_id)
            .await
        {
            Ok(lease) => lease,
            Err(e) => {
                warn!(
                    instance_id = %resolved.instance_id,
                    backend = %backend.name,
                    "[ToolsAggregator] Skipping backend: {}",
                    e
                );
                return Vec::new();
            }
        };

        match lease.client().client().list_tools().await {
            Ok(tools) => {
                settle(lease).await;
                tools
                    .into_iter()
                    .filter_map(|tool| {
                        let enabled = backend.binding(&tool.name)?.enabled;
                        Some(tool.attributed_to(&backend.name, enabled))
                    })
                    .collect()
            }
            Err(e) => {
                warn!(
                    instance_id = %resolved.instance_id,
                    backend = %backend.name,
                    "[ToolsAggregator] tools/list failed: {:#}",
                    e
                );
                settle(lease).await;
                Vec::new()
            }
        }
    }

    /// Route `tool_name` to its owner and return the backend's result verbatim
    pub async fn call_tool(
        &self,
        instance_id: &str,
        tool_name: &str,
        arguments: Option<JsonObject>,
        progress_token: Option<Value>,
    ) -> GatewayResult<Value> {
        let started = Instant::now();
        let request_bytes = arguments.as_ref().map(json_len).unwrap_or(0);
        let mut organization_id = None;

        let result = match tokio::time::timeout(
            self.request_timeout,
            self.call_tool_inner(
                instance_id,
                tool_name,
                arguments,
                progress_token,
                &mut organization_id,
            ),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.request_timeout)),
        };

        self.recorder.record(RequestRecord {
            organization_id,
            instance_id: instance_id.to_string(),
            method: "tools/call".to_string(),
            tool_name: Some(tool_name.to_string()),
            duration_ms: elapsed_ms(started),
            request_bytes,
            response_bytes: result.as_ref().map(json_len).unwrap_or(0),
            cache_hit: false,
            error_code: result.as_ref().err().map(|e| e.code().to_string()),
            created_at: Utc::now(),
        });

        result
    }

    async fn call_tool_inner(
        &self,
        instance_id: &str,
        tool_name: &str,
        arguments: Option<JsonObject>,
        progress_token: Option<Value>,
        organization_id: &mut Option<String>,
    ) -> GatewayResult<Value> {
        let resolved = self.resolver.resolve(instance_id).await?;
        *organization_id = Some(resolved.organization_id.clone());

        let (index, owner, others) = resolved
            .owner_of(tool_name)
            .ok_or_else(|| GatewayError::UnknownTool(tool_name.to_string()))?;
        if !others.is_empty() {
            warn!(
                instance_id = %instance_id,
                tool = %tool_name,
                backend = %owner.name,
                index,
                others = ?others,
                "[ToolsAggregator] Tool claimed by several backends, using the first"
            );
        }
        if owner.binding(tool_name).is_some_and(|b| !b.enabled) {
            return Err(GatewayError::ToolDisabled(tool_name.to_string()));
        }

        let lease = self.acquire_authorized(&resolved, owner).await?;
        debug!(
            instance_id = %instance_id,
            tool = %tool_name,
            backend = %owner.name,
            "[ToolsAggregator] Routing call"
        );

        match lease
            .client()
            .client()
            .call_tool(tool_name, arguments, progress_token)
            .await
        {
            Ok(result) => {
                settle(lease).await;
                Ok(result)
            }
            Err(e) => {
                settle(lease).await;
                Err(GatewayError::Backend {
                    backend: owner.name.clone(),
                    message: format!("{:#}", e),
                })
            }
        }
    }

    /// Acquire the owner's connection. On an auth demand, let the OAuth
    /// Manager react, and retry once if it produced a usable token.
    async fn acquire_authorized(
        &self,
        resolved: &ResolvedInstance,
        backend: &ServerConfig,
    ) -> GatewayResult<Lease> {
        let mut reauthenticated = false;
        loop {
            let (server_url, challenge) = match self
                .pool
                .acquire(&resolved.instance_id, backend, &resolved.owner_id)
                .await
            {
                Ok(lease) => return Ok(lease),
                Err(ConnectFailure::AuthRequired {
                    server_url,
                    challenge,
                }) => (server_url, challenge),
                Err(failure) => {
                    return Err(GatewayError::Connect {
                        backend: backend.name.clone(),
                        source: failure,
                    })
                }
            };

            let Some(oauth) = self.oauth.as_ref().filter(|_| !reauthenticated) else {
                return Err(GatewayError::AuthorizationRequired {
                    backend: backend.name.clone(),
                    authorization_url: None,
                });
            };

            let outcome = match challenge.as_deref() {
                Some(header) => {
                    oauth
                        .handle_www_authenticate_challenge(
                            header,
                            &backend.id,
                            &resolved.owner_id,
                            &server_url,
                        )
                        .await
                }
                None => {
                    oauth
                        .authenticate(&backend.id, &resolved.owner_id, &server_url, None)
                        .await
                }
            };

            match outcome {
                Ok(AuthenticateOutcome::Authenticated { .. }) => {
                    debug!(
                        backend = %backend.name,
                        "[ToolsAggregator] Token available, reconnecting"
                    );
                    reauthenticated = true;
                }
                Ok(AuthenticateOutcome::AuthorizationRequired {
                    authorization_url, ..
                }) => {
                    info!(
                        backend = %backend.name,
                        "[ToolsAggregator] Backend requires user authorization"
                    );
                    return Err(GatewayError::AuthorizationRequired {
                        backend: backend.name.clone(),
                        authorization_url: Some(authorization_url),
                    });
                }
                Err(e) => {
                    warn!(
                        backend = %backend.name,
                        "[ToolsAggregator] Could not start authorization: {}",
                        e
                    );
                    return Err(GatewayError::AuthorizationRequired {
                        backend: backend.name.clone(),
                        authorization_url: None,
                    });
                }
            }
        }
    }

    /// Forget everything derived from `instance_id`'s configuration
    pub async fn invalidate_instance(&self, instance_id: &str) {
        self.resolver.invalidate(instance_id);
        self.tools_cache.invalidate(instance_id);
        let closed = self.pool.evict_instance(instance_id).await;
        debug!(instance_id = %instance_id, closed, "[ToolsAggregator] Instance invalidated");
    }

    /// Drop every merged tool list. Lists cached while a backend was
    /// unauthorized are missing its tools.
    pub fn clear_tools_cache(&self) {
        self.tools_cache.clear();
    }
}

/// Healthy connections go back to the pool, broken ones are closed
async fn settle(lease: Lease) {
    if lease.client().is_healthy() {
        lease.release().await;
    } else {
        lease.discard().await;
    }
}

fn json_len<T: serde::Serialize + ?Sized>(value: &T) -> u64 {
    serde_json::to_vec(value).map(|v| v.len() as u64).unwrap_or(0)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
