//! MCP stdio server over a UTCP client
//!
//! TigerStyle: Line-delimited JSON-RPC, one response per request, tool
//! failures reported as `isError` results rather than protocol errors.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use utcp_client::UtcpClient;
use utcp_core::{CallTemplate, Error as UtcpError};

/// Protocol revision announced in `initialize`
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Default number of results for `search_tools`
pub const SEARCH_LIMIT_DEFAULT: usize = 10;

/// Upper bound on `search_tools` limit
pub const SEARCH_LIMIT_MAX: usize = 1000;

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

// =============================================================================
// Messages
// =============================================================================

/// Incoming JSON-RPC message; no `id` means notification
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeRpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BridgeRpcError>,
}

impl BridgeResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(BridgeRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Serves the client's manuals and tools as five MCP tools
pub struct BridgeServer {
    client: Arc<UtcpClient>,
}

impl BridgeServer {
    pub fn new(client: Arc<UtcpClient>) -> Self {
        Self { client }
    }

    /// Read requests line by line until EOF, answering each on `writer`
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("Bridge serving on stdio");
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await.context("Failed to read request")? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<BridgeRequest>(line) {
                Ok(request) => self.handle(request).await,
                Err(e) => {
                    warn!(error = %e, "Unparseable request");
                    Some(BridgeResponse::error(
                        Value::Null,
                        PARSE_ERROR,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            if let Some(response) = response {
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                writer.write_all(&out).await.context("Failed to write response")?;
                writer.flush().await?;
            }
        }
        info!("Bridge input closed");
        Ok(())
    }

    /// Dispatch one message; notifications get no response
    pub async fn handle(&self, request: BridgeRequest) -> Option<BridgeResponse> {
        debug!(method = %request.method, "Bridge request");
        let id = request.id?;

        let response = match request.method.as_str() {
            "initialize" => BridgeResponse::success(id, initialize_result()),
            "ping" => BridgeResponse::success(id, json!({})),
            "tools/list" => BridgeResponse::success(id, json!({ "tools": bridge_tools() })),
            "tools/call" => {
                let name = request.params.get("name").and_then(Value::as_str);
                let Some(name) = name else {
                    return Some(BridgeResponse::error(id, INVALID_PARAMS, "Missing tool name"));
                };
                let args = request
                    .params
                    .get("arguments")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();

                match self.call(name, args).await {
                    Some(outcome) => BridgeResponse::success(id, tool_result(outcome)),
                    None => BridgeResponse::error(
                        id,
                        INVALID_PARAMS,
                        format!("Unknown tool: {}", name),
                    ),
                }
            }
            other => BridgeResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", other)),
        };
        Some(response)
    }

    /// Run one bridge tool; `None` for names the bridge does not expose
    async fn call(&self, name: &str, args: Map<String, Value>) -> Option<utcp_core::Result<Value>> {
        let outcome = match name {
            "register_manual" => self.register_manual(args).await,
            "deregister_manual" => self.deregister_manual(args).await,
            "call_tool" => self.call_tool(args).await,
            "search_tools" => self.search_tools(args).await,
            "list_tools" => self.list_tools().await,
            _ => return None,
        };
        Some(outcome)
    }

    async fn register_manual(&self, args: Map<String, Value>) -> utcp_core::Result<Value> {
        let template = required(&args, "manual_call_template")?.clone();
        let template = CallTemplate::from_value(template)?;
        let result = self.client.register_manual(template).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn deregister_manual(&self, args: Map<String, Value>) -> utcp_core::Result<Value> {
        let name = required_str(&args, "manual_name")?;
        let removed = self.client.deregister_manual(name).await?;
        Ok(json!({ "success": removed }))
    }

    async fn call_tool(&self, args: Map<String, Value>) -> utcp_core::Result<Value> {
        let name = required_str(&args, "tool_name")?;
        let tool_args = match args.get("tool_args") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(UtcpError::validation("tool_args", "must be an object")),
        };
        self.client.call_tool(name, tool_args).await
    }

    async fn search_tools(&self, args: Map<String, Value>) -> utcp_core::Result<Value> {
        let query = required_str(&args, "query")?;
        let limit = match args.get("limit") {
            None | Some(Value::Null) => SEARCH_LIMIT_DEFAULT,
            Some(value) => value
                .as_u64()
                .map(|n| (n as usize).min(SEARCH_LIMIT_MAX))
                .ok_or_else(|| UtcpError::validation("limit", "must be a non-negative integer"))?,
        };
        let tags: Option<Vec<String>> = match args.get("any_of_tags_required") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value(value.clone())
                    .map_err(|e| UtcpError::validation("any_of_tags_required", e.to_string()))?,
            ),
        };

        let tools = self.client.search_tools(query, limit, tags.as_deref()).await?;
        Ok(json!({ "tools": tools }))
    }

    async fn list_tools(&self) -> utcp_core::Result<Value> {
        let tools = self.client.list_tools().await?;
        let names: Vec<String> = tools.into_iter().map(|t| t.name).collect();
        Ok(json!({ "tools": names }))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn required<'a>(args: &'a Map<String, Value>, field: &str) -> utcp_core::Result<&'a Value> {
    args.get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| UtcpError::validation(field, "is required"))
}

fn required_str<'a>(args: &'a Map<String, Value>, field: &str) -> utcp_core::Result<&'a str> {
    required(args, field)?
        .as_str()
        .ok_or_else(|| UtcpError::validation(field, "must be a string"))
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": "utcp-bridge",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// Wrap an outcome as an MCP tool result
fn tool_result(outcome: utcp_core::Result<Value>) -> Value {
    match outcome {
        Ok(value) => {
            let text = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            json!({
                "content": [{ "type": "text", "text": text }],
                "structuredContent": { "result": value },
                "isError": false
            })
        }
        Err(e) => json!({
            "content": [{ "type": "text", "text": e.to_string() }],
            "isError": true
        }),
    }
}

/// Definitions advertised by `tools/list`
fn bridge_tools() -> Value {
    json!([
        {
            "name": "register_manual",
            "description": "Register a manual from a call template and index its tools",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "manual_call_template": {
                        "type": "object",
                        "description": "Call template with call_template_type, name and protocol fields"
                    }
                },
                "required": ["manual_call_template"]
            }
        },
        {
            "name": "deregister_manual",
            "description": "Remove a registered manual and its tools",
            "inputSchema": {
                "type": "object",
                "properties": { "manual_name": { "type": "string" } },
                "required": ["manual_name"]
            }
        },
        {
            "name": "call_tool",
            "description": "Call a registered tool by its namespaced name",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_name": { "type": "string" },
                    "tool_args": { "type": "object" }
                },
                "required": ["tool_name"]
            }
        },
        {
            "name": "search_tools",
            "description": "Rank registered tools against a free-text query",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 0 },
                    "any_of_tags_required": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["query"]
            }
        },
        {
            "name": "list_tools",
            "description": "List the names of every registered tool",
            "inputSchema": { "type": "object", "properties": {} }
        }
    ])
}
