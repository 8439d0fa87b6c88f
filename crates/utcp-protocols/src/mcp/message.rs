//! JSON-RPC messages and transport errors
//!
//! TigerStyle: Explicit message types, structured error kinds.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// JSON-RPC version string
pub const JSONRPC_VERSION: &str = "2.0";

/// Substrings that mark an opaque protocol error as a connection problem
const CONNECTION_ERROR_MARKERS: [&str; 6] = [
    "closed",
    "disconnected",
    "reset",
    "timed out",
    "broken pipe",
    "econnreset",
];

// =============================================================================
// Messages
// =============================================================================

/// JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    pub fn new(id: u64, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Option<Value>) -> Self {
        self.params = params;
        self
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpRpcError>,
}

impl McpResponse {
    /// Result payload, or the remote error
    pub fn into_result(self) -> McpResult<Value> {
        match self.error {
            Some(error) => Err(McpError::new(
                McpErrorKind::Remote,
                format!("{} (code {})", error.message, error.code),
            )),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Tool advertised by a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
    #[serde(rename = "outputSchema", default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// One page of `tools/list`
#[derive(Debug, Deserialize)]
pub(crate) struct ToolsPage {
    #[serde(default)]
    pub tools: Vec<McpToolDefinition>,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

// =============================================================================
// Errors
// =============================================================================

/// Result type for MCP transport operations
pub type McpResult<T> = std::result::Result<T, McpError>;

/// What went wrong talking to a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpErrorKind {
    /// Peer went away (EOF, closed pipe, connection refused)
    ConnectionClosed,
    /// Connection reset or broken pipe
    ConnectionReset,
    /// Transport-level timeout reported by the connection
    TimedOut,
    /// Local per-operation deadline expired
    OperationTimedOut,
    /// Malformed or unexpected traffic
    Protocol,
    /// Server answered with a JSON-RPC error
    Remote,
    /// Server process could not be started
    Spawn,
}

impl fmt::Display for McpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionReset => "connection reset",
            Self::TimedOut => "timed out",
            Self::OperationTimedOut => "operation timed out",
            Self::Protocol => "protocol",
            Self::Remote => "remote",
            Self::Spawn => "spawn",
        };
        write!(f, "{}", s)
    }
}

/// MCP transport error
#[derive(Error, Debug, Clone)]
#[error("MCP {kind} error: {message}")]
pub struct McpError {
    pub kind: McpErrorKind,
    pub message: String,
}

impl McpError {
    pub fn new(kind: McpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::ConnectionClosed, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::Protocol, message)
    }

    /// Whether a fresh session might succeed where this one failed
    pub fn is_recoverable(&self) -> bool {
        match self.kind {
            McpErrorKind::ConnectionClosed
            | McpErrorKind::ConnectionReset
            | McpErrorKind::TimedOut => true,
            McpErrorKind::Protocol => {
                let message = self.message.to_lowercase();
                CONNECTION_ERROR_MARKERS
                    .iter()
                    .any(|marker| message.contains(marker))
            }
            McpErrorKind::OperationTimedOut | McpErrorKind::Remote | McpErrorKind::Spawn => false,
        }
    }

    pub fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                McpErrorKind::ConnectionReset
            }
            ErrorKind::UnexpectedEof | ErrorKind::NotConnected | ErrorKind::ConnectionRefused => {
                McpErrorKind::ConnectionClosed
            }
            ErrorKind::TimedOut => McpErrorKind::TimedOut,
            _ => McpErrorKind::Protocol,
        };
        Self::new(kind, err.to_string())
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            McpErrorKind::TimedOut
        } else if err.is_connect() {
            McpErrorKind::ConnectionClosed
        } else {
            McpErrorKind::Protocol
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = McpRequest::new(7, "tools/list").with_params(Some(json!({"cursor": "c"})));
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/list","params":{"cursor":"c"}}"#
        );

        let notification = McpNotification::new("notifications/initialized", None);
        assert_eq!(
            serde_json::to_value(&notification).unwrap(),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"})
        );
    }

    #[test]
    fn test_response_into_result() {
        let ok: McpResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}))
                .unwrap();
        assert_eq!(ok.into_result().unwrap(), json!({"tools": []}));

        let err: McpResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 2, "error": {"code": -32601, "message": "Method not found"}
        }))
        .unwrap();
        let err = err.into_result().unwrap_err();
        assert_eq!(err.kind, McpErrorKind::Remote);
        assert!(err.message.contains("-32601"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_recoverable_by_kind() {
        assert!(McpError::closed("eof").is_recoverable());
        assert!(McpError::new(McpErrorKind::ConnectionReset, "x").is_recoverable());
        assert!(McpError::new(McpErrorKind::TimedOut, "x").is_recoverable());
        assert!(!McpError::new(McpErrorKind::OperationTimedOut, "x").is_recoverable());
        assert!(!McpError::new(McpErrorKind::Spawn, "closed").is_recoverable());
        assert!(!McpError::new(McpErrorKind::Remote, "stream closed").is_recoverable());
    }

    #[test]
    fn test_recoverable_by_message_for_opaque_errors() {
        assert!(McpError::protocol("Stream Disconnected unexpectedly").is_recoverable());
        assert!(McpError::protocol("read ECONNRESET").is_recoverable());
        assert!(!McpError::protocol("invalid JSON").is_recoverable());
    }

    #[test]
    fn test_from_io_kinds() {
        use std::io::{Error, ErrorKind};
        assert_eq!(
            McpError::from_io(Error::new(ErrorKind::BrokenPipe, "pipe")).kind,
            McpErrorKind::ConnectionReset
        );
        assert_eq!(
            McpError::from_io(Error::new(ErrorKind::UnexpectedEof, "eof")).kind,
            McpErrorKind::ConnectionClosed
        );
        assert_eq!(
            McpError::from_io(Error::new(ErrorKind::Other, "odd")).kind,
            McpErrorKind::Protocol
        );
    }

    #[test]
    fn test_tool_definition_defaults() {
        let def: McpToolDefinition = serde_json::from_value(json!({"name": "ping"})).unwrap();
        assert_eq!(def.name, "ping");
        assert!(def.description.is_none());
        assert!(def.output_schema.is_none());
    }
}
