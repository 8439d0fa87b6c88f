//! Model Context Protocol transport
//!
//! TigerStyle: One cached session per server, rebuilt at most once per call.
//!
//! A manual names one or more MCP servers under `config.mcpServers`. Each is
//! reached over stdio (a spawned process) or HTTP. Discovered tools are named
//! `server.tool` and carry a call template holding only their own server.

mod message;
mod protocol;
mod session;
mod transport;

pub use message::{
    McpError, McpErrorKind, McpNotification, McpRequest, McpResponse, McpResult, McpRpcError,
    McpToolDefinition,
};
pub use protocol::{McpCommunicationProtocol, MCP_OPERATION_TIMEOUT_MS_DEFAULT};
pub use session::SessionCache;
pub use transport::{
    DefaultMcpTransportFactory, HttpTransport, McpTransport, McpTransportFactory, StdioTransport,
    MCP_PROTOCOL_VERSION,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use utcp_core::{Auth, CallTemplate, Error, Result};

/// Discriminator for MCP call templates
pub const CALL_TEMPLATE_TYPE: &str = "mcp";

/// Maximum number of servers in one manual
pub const MCP_SERVERS_COUNT_MAX: usize = 64;

fn default_call_template_type() -> String {
    CALL_TEMPLATE_TYPE.to_string()
}

/// How a server is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    /// Spawned child process speaking JSON-RPC over stdin/stdout
    #[default]
    Stdio,
    /// Streamable HTTP endpoint
    #[serde(alias = "streamable-http", alias = "streamable_http")]
    Http,
}

impl fmt::Display for McpTransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// One MCP server entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(default)]
    pub transport: McpTransportKind,
    /// Program to spawn (stdio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Working directory, relative paths resolved against the client root (stdio)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Endpoint (http)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra request headers (http)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl McpServerConfig {
    /// Server spawned as a child process
    pub fn stdio<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transport: McpTransportKind::Stdio,
            command: Some(command.into()),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Server reached over HTTP
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            transport: McpTransportKind::Http,
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self, server_name: &str) -> Result<()> {
        let field = format!("config.mcpServers.{}", server_name);
        match self.transport {
            McpTransportKind::Stdio => match self.command.as_deref() {
                Some(command) if !command.trim().is_empty() => Ok(()),
                _ => Err(Error::validation(field, "stdio server requires a command")),
            },
            McpTransportKind::Http => match self.url.as_deref() {
                Some(url) if !url.trim().is_empty() => Ok(()),
                _ => Err(Error::validation(field, "http server requires a url")),
            },
        }
    }
}

/// Named server table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: IndexMap<String, McpServerConfig>,
}

/// Call template for MCP manuals and tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpCallTemplate {
    #[serde(default = "default_call_template_type")]
    pub call_template_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub config: McpConfig,
    /// Applied to http servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

impl McpCallTemplate {
    pub fn new() -> Self {
        Self {
            call_template_type: default_call_template_type(),
            name: None,
            config: McpConfig::default(),
            auth: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_server(mut self, server_name: impl Into<String>, server: McpServerConfig) -> Self {
        self.config.mcp_servers.insert(server_name.into(), server);
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn to_call_template(&self) -> Result<CallTemplate> {
        CallTemplate::from_typed(self)
    }

    /// Copy of this template restricted to one server
    pub(crate) fn for_server(&self, server_name: &str, server: &McpServerConfig) -> Self {
        let mut servers = IndexMap::new();
        servers.insert(server_name.to_string(), server.clone());
        Self {
            call_template_type: self.call_template_type.clone(),
            name: self.name.clone(),
            config: McpConfig { mcp_servers: servers },
            auth: self.auth.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.config.mcp_servers.len() > MCP_SERVERS_COUNT_MAX {
            return Err(Error::validation(
                "config.mcpServers",
                format!(
                    "too many servers: {} (max {})",
                    self.config.mcp_servers.len(),
                    MCP_SERVERS_COUNT_MAX
                ),
            ));
        }
        for (server_name, server) in &self.config.mcp_servers {
            server.validate(server_name)?;
        }
        Ok(())
    }
}

impl Default for McpCallTemplate {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache key for a server's session
pub(crate) fn session_key(server_name: &str, server: &McpServerConfig) -> String {
    format!("{}:{}", server_name, server.transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_mcp_servers() {
        let template: McpCallTemplate = serde_json::from_value(json!({
            "call_template_type": "mcp",
            "name": "tools",
            "config": {
                "mcpServers": {
                    "fs": {"command": "npx", "args": ["server-fs", "/tmp"]},
                    "remote": {"transport": "streamable-http", "url": "https://mcp.example.com/mcp"}
                }
            }
        }))
        .unwrap();

        let servers: Vec<_> = template.config.mcp_servers.keys().cloned().collect();
        assert_eq!(servers, vec!["fs", "remote"]);
        assert_eq!(template.config.mcp_servers["fs"].transport, McpTransportKind::Stdio);
        assert_eq!(template.config.mcp_servers["remote"].transport, McpTransportKind::Http);
        assert!(template.validate().is_ok());

        let value = template.to_call_template().unwrap().to_value().unwrap();
        assert!(value["config"]["mcpServers"]["fs"].is_object());
    }

    #[test]
    fn test_validate_requires_endpoint() {
        let template = McpCallTemplate::new().with_server(
            "broken",
            McpServerConfig {
                transport: McpTransportKind::Http,
                ..McpServerConfig::default()
            },
        );
        assert!(matches!(template.validate(), Err(Error::Validation { .. })));

        let template = McpCallTemplate::new().with_server("empty", McpServerConfig::default());
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_session_key_and_single_server_copy() {
        let template = McpCallTemplate::new()
            .with_name("m")
            .with_server("a", McpServerConfig::stdio("a-server", ["--x"]))
            .with_server("b", McpServerConfig::http("http://localhost:1/mcp"));

        let b = &template.config.mcp_servers["b"];
        assert_eq!(session_key("b", b), "b:http");

        let only_b = template.for_server("b", b);
        assert_eq!(only_b.config.mcp_servers.len(), 1);
        assert_eq!(only_b.name.as_deref(), Some("m"));
    }
}
