//! JSON-RPC surface: `POST /mcp/{instance_id}`
//!
//! Serves `initialize`, `ping`, `tools/list` and `tools/call` against the
//! instance's aggregated backends. Failures carry the gateway error code in
//! `error.data.code`.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use rmcp::model::{JsonObject, ProtocolVersion};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::AppState;
use crate::error::GatewayError;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const GATEWAY_ERROR: i64 = -32000;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    fn gateway_error(id: Value, err: &GatewayError) -> Self {
        let code = match err {
            GatewayError::InvalidParams(_) | GatewayError::UnknownTool(_) => INVALID_PARAMS,
            _ => GATEWAY_ERROR,
        };
        let mut data = json!({ "code": err.code() });
        if let GatewayError::AuthorizationRequired {
            authorization_url: Some(url),
            ..
        } = err
        {
            data["authorization_url"] = Value::String(url.clone());
        }
        Self::error(id, code, err.to_string(), Some(data))
    }
}

/// `{ name, arguments?, _meta?: { progressToken? } }`
#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<JsonObject>,
    #[serde(default, rename = "_meta")]
    meta: Option<RequestMeta>,
}

#[derive(Debug, Default, Deserialize)]
struct RequestMeta {
    #[serde(default, rename = "progressToken")]
    progress_token: Option<Value>,
}

/// `POST /mcp/{instance_id}`
pub async fn mcp_endpoint(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    body: Bytes,
) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!(instance_id = %instance_id, "[Gateway] Unparseable JSON-RPC body: {}", e);
            return Json(JsonRpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                format!("Parse error: {}", e),
                None,
            ))
            .into_response();
        }
    };

    if value.is_array() {
        return Json(JsonRpcResponse::error(
            Value::Null,
            INVALID_REQUEST,
            "Batch requests are not supported",
            None,
        ))
        .into_response();
    }

    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                Value::Null,
                INVALID_REQUEST,
                format!("Invalid request: {}", e),
                None,
            ))
            .into_response();
        }
    };

    let Some(id) = request.id.clone() else {
        debug!(instance_id = %instance_id, method = %request.method, "[Gateway] Notification");
        return StatusCode::ACCEPTED.into_response();
    };

    if request.jsonrpc != "2.0" {
        return Json(JsonRpcResponse::error(
            id,
            INVALID_REQUEST,
            "jsonrpc must be \"2.0\"",
            None,
        ))
        .into_response();
    }

    Json(dispatch(&state, &instance_id, id, request).await).into_response()
}

async fn dispatch(
    state: &AppState,
    instance_id: &str,
    id: Value,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    debug!(instance_id = %instance_id, method = %request.method, "[Gateway] JSON-RPC request");

    match request.method.as_str() {
        "initialize" => JsonRpcResponse::result(id, initialize_result(request.params.as_ref())),
        "ping" => JsonRpcResponse::result(id, json!({})),
        "tools/list" => match state.aggregator.list_tools(instance_id).await {
            Ok(list) => {
                let tools: Vec<_> = list.tools.iter().filter(|t| t.enabled).collect();
                JsonRpcResponse::result(id, json!({ "tools": tools }))
            }
            Err(e) => {
                warn!(instance_id = %instance_id, "[Gateway] tools/list failed: {}", e);
                JsonRpcResponse::gateway_error(id, &e)
            }
        },
        "tools/call" => {
            let params: CallToolParams = match request
                .params
                .map(serde_json::from_value)
                .transpose()
            {
                Ok(Some(params)) => params,
                Ok(None) => {
                    let err = GatewayError::InvalidParams("tools/call requires params".to_string());
                    return JsonRpcResponse::gateway_error(id, &err);
                }
                Err(e) => {
                    let err = GatewayError::InvalidParams(e.to_string());
                    return JsonRpcResponse::gateway_error(id, &err);
                }
            };

            let progress_token = params.meta.unwrap_or_default().progress_token;
            match state
                .aggregator
                .call_tool(instance_id, &params.name, params.arguments, progress_token)
                .await
            {
                Ok(result) => JsonRpcResponse::result(id, result),
                Err(e) => {
                    warn!(
                        instance_id = %instance_id,
                        tool = %params.name,
                        "[Gateway] tools/call failed: {}",
                        e
                    );
                    JsonRpcResponse::gateway_error(id, &e)
                }
            }
        }
        other => JsonRpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("Method not found: {}", other),
            None,
        ),
    }
}

fn initialize_result(params: Option<&Value>) -> Value {
    let protocol_version = params
        .and_then(|p| p.get("protocolVersion"))
        .cloned()
        .unwrap_or_else(|| serde_json::to_value(ProtocolVersion::LATEST).unwrap_or(Value::Null));

    json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": {
            "name": "mcproxy-gateway",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}
