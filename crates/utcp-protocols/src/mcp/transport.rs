//! MCP transports: stdio child processes and streamable HTTP
//!
//! TigerStyle: Transports own their connection; callers own the deadline.
//!
//! `McpTransportFactory::connect` returns a transport that has already
//! completed the `initialize` handshake.

use super::message::{
    McpError, McpErrorKind, McpNotification, McpRequest, McpResponse, McpResult,
};
use super::{McpServerConfig, McpTransportKind};
use crate::http::OAuth2TokenCache;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use utcp_core::{ApiKeyLocation, Auth};

/// Protocol revision sent in `initialize`
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Session header used by streamable HTTP servers
const MCP_SESSION_HEADER: &str = "mcp-session-id";

/// Client name reported to servers
const CLIENT_NAME: &str = "utcp-rs";

type PendingMap = HashMap<u64, oneshot::Sender<McpResult<Value>>>;

/// Never held across an await, so a std mutex is enough
fn lock_pending(pending: &StdMutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a request's waiter when its future finishes or is dropped
struct PendingRequest<'a> {
    pending: &'a StdMutex<PendingMap>,
    id: u64,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(&self.id);
    }
}

/// A live connection to one server
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for its result
    async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value>;

    /// Send a notification
    async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()>;

    /// Tear the connection down
    async fn close(&self);
}

/// Opens initialized transports
#[async_trait]
pub trait McpTransportFactory: Send + Sync {
    async fn connect(
        &self,
        server_name: &str,
        server: &McpServerConfig,
        auth: Option<&Auth>,
    ) -> McpResult<Arc<dyn McpTransport>>;

    /// Forget cached credentials
    async fn clear_credentials(&self) {}
}

/// Run the `initialize` handshake
pub(crate) async fn initialize(transport: &dyn McpTransport) -> McpResult<Value> {
    let result = transport
        .request(
            "initialize",
            Some(json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION")},
            })),
        )
        .await?;
    transport.notify("notifications/initialized", None).await?;
    Ok(result)
}

// =============================================================================
// Stdio
// =============================================================================

/// Newline-delimited JSON-RPC over a child's stdin/stdout
pub struct StdioTransport {
    server_name: String,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Option<Child>>,
    pending: Arc<StdMutex<PendingMap>>,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl StdioTransport {
    /// Spawn the server process; `cwd` must already be resolved
    pub fn spawn(server_name: &str, server: &McpServerConfig) -> McpResult<Self> {
        let program = server
            .command
            .as_deref()
            .ok_or_else(|| McpError::new(McpErrorKind::Spawn, "stdio server has no command"))?;

        let mut command = Command::new(program);
        command
            .args(&server.args)
            .envs(&server.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &server.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            McpError::new(McpErrorKind::Spawn, format!("failed to spawn {}: {}", program, e))
        })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => return Err(McpError::new(McpErrorKind::Spawn, "child pipes unavailable")),
        };

        if let Some(stderr) = child.stderr.take() {
            let name = server_name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %name, "{}", line);
                }
            });
        }

        let pending: Arc<StdMutex<PendingMap>> = Arc::new(StdMutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_responses(
            server_name.to_string(),
            stdout,
            pending.clone(),
            closed.clone(),
        ));

        info!(server = %server_name, command = %program, pid = ?child.id(), "Spawned MCP server");
        Ok(Self {
            server_name: server_name.to_string(),
            stdin: Mutex::new(stdin),
            child: Mutex::new(Some(child)),
            pending,
            closed,
            next_id: AtomicU64::new(1),
            reader,
        })
    }

    async fn write_line(&self, line: String) -> McpResult<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(McpError::from_io)?;
        stdin.write_all(b"\n").await.map_err(McpError::from_io)?;
        stdin.flush().await.map_err(McpError::from_io)
    }
}

/// Route responses to waiting requests until stdout ends
async fn read_responses(
    server_name: String,
    stdout: tokio::process::ChildStdout,
    pending: Arc<StdMutex<PendingMap>>,
    closed: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let message: Value = match serde_json::from_str(line) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(server = %server_name, error = %e, "Ignoring non-JSON output");
                        continue;
                    }
                };
                // Server-initiated requests and notifications are not routed
                if message.get("method").is_some() {
                    debug!(server = %server_name, method = ?message.get("method"), "Ignoring server message");
                    continue;
                }
                match serde_json::from_value::<McpResponse>(message) {
                    Ok(response) => {
                        let waiter = lock_pending(&pending).remove(&response.id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(response.into_result());
                            }
                            None => debug!(server = %server_name, id = response.id, "Response for unknown request"),
                        }
                    }
                    Err(e) => debug!(server = %server_name, error = %e, "Ignoring malformed response"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(server = %server_name, error = %e, "MCP server stdout failed");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    let waiters: Vec<_> = lock_pending(&pending).drain().collect();
    for (_, tx) in waiters {
        let _ = tx.send(Err(McpError::closed("server closed its output")));
    }
    debug!(server = %server_name, "MCP reader finished");
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            // Checked under the lock the reader drains with, so no waiter is stranded
            let mut pending = lock_pending(&self.pending);
            if self.closed.load(Ordering::SeqCst) {
                return Err(McpError::closed("connection closed"));
            }
            pending.insert(id, tx);
        }
        let _waiter = PendingRequest {
            pending: &self.pending,
            id,
        };

        let line = serde_json::to_string(&McpRequest::new(id, method).with_params(params))
            .map_err(|e| McpError::protocol(e.to_string()))?;
        self.write_line(line).await?;

        rx.await
            .map_err(|_| McpError::closed("response channel closed"))?
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::closed("connection closed"));
        }
        let line = serde_json::to_string(&McpNotification::new(method, params))
            .map_err(|e| McpError::protocol(e.to_string()))?;
        self.write_line(line).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.reader.abort();
        let waiters: Vec<_> = lock_pending(&self.pending).drain().collect();
        for (_, tx) in waiters {
            let _ = tx.send(Err(McpError::closed("session closed")));
        }
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!(server = %self.server_name, error = %e, "MCP server already exited");
            }
        }
        info!(server = %self.server_name, "Closed MCP stdio session");
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// JSON-RPC over HTTP POST, answered with JSON or an event stream
pub struct HttpTransport {
    server_name: String,
    url: String,
    client: reqwest::Client,
    headers: HeaderMap,
    basic_auth: Option<(String, String)>,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(
        server_name: &str,
        url: impl Into<String>,
        client: reqwest::Client,
        headers: HeaderMap,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            url: url.into(),
            client,
            headers,
            basic_auth: None,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }

    async fn post(&self, body: Value) -> McpResult<Option<Value>> {
        let session_id = self.session_id.lock().await.clone();
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(&body);
        if let Some(id) = &session_id {
            request = request.header(MCP_SESSION_HEADER, id.as_str());
        }
        if let Some((username, password)) = &self.basic_auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(McpError::from_reqwest)?;
        let status = response.status();

        if let Some(id) = response
            .headers()
            .get(MCP_SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(id.to_string());
        }

        if status == reqwest::StatusCode::NOT_FOUND && session_id.is_some() {
            return Err(McpError::closed("server ended the session"));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::protocol(format!(
                "HTTP {} from MCP server: {}",
                status.as_u16(),
                text
            )));
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);
        let text = response.text().await.map_err(McpError::from_reqwest)?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        if is_event_stream {
            Ok(first_event_response(&text))
        } else {
            serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| McpError::protocol(format!("invalid JSON from MCP server: {}", e)))
        }
    }
}

/// First `data:` payload that is a JSON-RPC response
fn first_event_response(stream: &str) -> Option<Value> {
    stream
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<Value>(data.trim()).ok())
        .find(|message| message.get("result").is_some() || message.get("error").is_some())
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::to_value(McpRequest::new(id, method).with_params(params))
            .map_err(|e| McpError::protocol(e.to_string()))?;

        let message = self
            .post(body)
            .await?
            .ok_or_else(|| McpError::protocol(format!("no response to {}", method)))?;
        let response: McpResponse = serde_json::from_value(message)
            .map_err(|e| McpError::protocol(format!("malformed response: {}", e)))?;
        response.into_result()
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        let body = serde_json::to_value(McpNotification::new(method, params))
            .map_err(|e| McpError::protocol(e.to_string()))?;
        self.post(body).await.map(|_| ())
    }

    async fn close(&self) {
        let Some(id) = self.session_id.lock().await.take() else {
            return;
        };
        let result = self
            .client
            .delete(&self.url)
            .headers(self.headers.clone())
            .header(MCP_SESSION_HEADER, id.as_str())
            .send()
            .await;
        if let Err(e) = result {
            debug!(server = %self.server_name, error = %e, "MCP session delete failed");
        }
        info!(server = %self.server_name, "Closed MCP http session");
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Opens real stdio and HTTP transports
#[derive(Debug, Default)]
pub struct DefaultMcpTransportFactory {
    client: reqwest::Client,
    tokens: OAuth2TokenCache,
}

impl DefaultMcpTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    async fn http_headers(
        &self,
        server: &McpServerConfig,
        auth: Option<&Auth>,
    ) -> McpResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in &server.headers {
            insert_header(&mut headers, name, value)?;
        }
        match auth {
            Some(Auth::ApiKey(key)) if key.location == ApiKeyLocation::Header => {
                insert_header(&mut headers, &key.var_name, &key.api_key)?;
            }
            Some(Auth::ApiKey(key)) => {
                warn!(location = ?key.location, "MCP http transport only sends header API keys");
            }
            // Applied per request by the transport
            Some(Auth::Basic(_)) => {}
            Some(Auth::OAuth2(oauth)) => {
                let token = self
                    .tokens
                    .get_token(&self.client, oauth)
                    .await
                    .map_err(|e| McpError::protocol(e.to_string()))?;
                insert_header(&mut headers, "authorization", &format!("Bearer {}", token))?;
            }
            None => {}
        }
        Ok(headers)
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> McpResult<()> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| McpError::protocol(format!("invalid header {}: {}", name, e)))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| McpError::protocol(format!("invalid value for header {}: {}", name, e)))?;
    headers.insert(header_name, header_value);
    Ok(())
}

#[async_trait]
impl McpTransportFactory for DefaultMcpTransportFactory {
    async fn connect(
        &self,
        server_name: &str,
        server: &McpServerConfig,
        auth: Option<&Auth>,
    ) -> McpResult<Arc<dyn McpTransport>> {
        let transport: Arc<dyn McpTransport> = match server.transport {
            McpTransportKind::Stdio => Arc::new(StdioTransport::spawn(server_name, server)?),
            McpTransportKind::Http => {
                let url = server
                    .url
                    .as_deref()
                    .ok_or_else(|| McpError::protocol("http server has no url"))?;
                let headers = self.http_headers(server, auth).await?;
                let mut transport =
                    HttpTransport::new(server_name, url, self.client.clone(), headers);
                if let Some(Auth::Basic(basic)) = auth {
                    transport = transport.with_basic_auth(&basic.username, &basic.password);
                }
                Arc::new(transport)
            }
        };

        match initialize(transport.as_ref()).await {
            Ok(info) => {
                info!(
                    server = %server_name,
                    transport = %server.transport,
                    server_info = ?info.get("serverInfo"),
                    "MCP session initialized"
                );
                Ok(transport)
            }
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    async fn clear_credentials(&self) {
        self.tokens.clear().await;
    }
}
