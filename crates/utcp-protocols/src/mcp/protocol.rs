//! MCP communication protocol
//!
//! TigerStyle: Every operation races a deadline; recoverable failures get
//! exactly one fresh session.

use super::message::{McpError, McpErrorKind, McpResult, McpToolDefinition, ToolsPage};
use super::session::SessionCache;
use super::transport::{DefaultMcpTransportFactory, McpTransport, McpTransportFactory};
use super::{session_key, McpCallTemplate, McpServerConfig, CALL_TEMPLATE_TYPE};
use async_trait::async_trait;
use serde_json::{json, Map, Number, Value};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use utcp_core::{
    Auth, CallTemplate, CommunicationProtocol, Error, ProtocolCaller, RegisterManualResult,
    Result, Tool, UtcpManual,
};

/// Deadline for one MCP operation, including connecting
pub const MCP_OPERATION_TIMEOUT_MS_DEFAULT: u64 = 15_000;

/// Maximum `tools/list` pages followed per server
const MCP_TOOLS_PAGES_COUNT_MAX: usize = 64;

/// Talks to MCP servers through cached sessions
pub struct McpCommunicationProtocol {
    factory: Arc<dyn McpTransportFactory>,
    sessions: SessionCache,
    operation_timeout_ms: u64,
}

impl Default for McpCommunicationProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl McpCommunicationProtocol {
    pub fn new() -> Self {
        Self::with_transport_factory(Arc::new(DefaultMcpTransportFactory::new()))
    }

    pub fn with_transport_factory(factory: Arc<dyn McpTransportFactory>) -> Self {
        Self {
            factory,
            sessions: SessionCache::new(),
            operation_timeout_ms: MCP_OPERATION_TIMEOUT_MS_DEFAULT,
        }
    }

    pub fn with_operation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        assert!(timeout_ms > 0, "operation timeout must be positive");
        self.operation_timeout_ms = timeout_ms;
        self
    }

    /// Number of cached sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    /// Run `op` against the server's session, rebuilding it once on a recoverable failure
    async fn run<T, F, Fut>(
        &self,
        server_name: &str,
        server: &McpServerConfig,
        auth: Option<&Auth>,
        op: F,
    ) -> McpResult<T>
    where
        F: Fn(Arc<dyn McpTransport>) -> Fut + Send + Sync,
        Fut: Future<Output = McpResult<T>> + Send,
        T: Send,
    {
        match self.run_once(server_name, server, auth, &op).await {
            Err(e) if e.is_recoverable() => {
                warn!(server = %server_name, error = %e, "MCP session failed, retrying with a new session");
                self.run_once(server_name, server, auth, &op).await
            }
            result => result,
        }
    }

    async fn run_once<T, F, Fut>(
        &self,
        server_name: &str,
        server: &McpServerConfig,
        auth: Option<&Auth>,
        op: &F,
    ) -> McpResult<T>
    where
        F: Fn(Arc<dyn McpTransport>) -> Fut + Send + Sync,
        Fut: Future<Output = McpResult<T>> + Send,
        T: Send,
    {
        let key = session_key(server_name, server);
        let deadline = Duration::from_millis(self.operation_timeout_ms);

        let attempt = async {
            let transport = self
                .sessions
                .get_or_connect(&key, || self.factory.connect(server_name, server, auth))
                .await?;
            let result = op(transport.clone()).await;
            if let Err(e) = &result {
                if e.is_recoverable() {
                    self.sessions.invalidate(&key, &transport).await;
                }
            }
            result
        };

        match tokio::time::timeout(deadline, attempt).await {
            Ok(result) => result,
            Err(_) => Err(McpError::new(
                McpErrorKind::OperationTimedOut,
                format!("no answer from {} within {}ms", server_name, self.operation_timeout_ms),
            )),
        }
    }

    fn to_error(&self, err: McpError) -> Error {
        match err.kind {
            McpErrorKind::OperationTimedOut => {
                Error::timeout(format!("mcp: {}", err.message), self.operation_timeout_ms)
            }
            _ => Error::transport(CALL_TEMPLATE_TYPE, err.to_string()),
        }
    }

    async fn list_server_tools(
        &self,
        server_name: &str,
        server: &McpServerConfig,
        auth: Option<&Auth>,
    ) -> McpResult<Vec<McpToolDefinition>> {
        self.run(server_name, server, auth, list_tools).await
    }

    async fn call_on_server(
        &self,
        server_name: &str,
        server: &McpServerConfig,
        auth: Option<&Auth>,
        tool_name: &str,
        args: &Map<String, Value>,
    ) -> Result<Value> {
        debug!(server = %server_name, tool = %tool_name, "Calling MCP tool");
        let params = json!({"name": tool_name, "arguments": args});
        let result = self
            .run(server_name, server, auth, |transport| {
                let params = params.clone();
                async move { transport.request("tools/call", Some(params)).await }
            })
            .await
            .map_err(|e| self.to_error(e))?;
        unwrap_tool_result(result)
    }
}

/// Resolve a relative `cwd` against the caller's root
fn resolve_server(caller: &dyn ProtocolCaller, server: &McpServerConfig) -> McpServerConfig {
    let mut resolved = server.clone();
    if let Some(cwd) = &server.cwd {
        resolved.cwd = Some(caller.resolve_path(Path::new(cwd)).display().to_string());
    }
    resolved
}

/// Every tool on one server, following `nextCursor`
async fn list_tools(transport: Arc<dyn McpTransport>) -> McpResult<Vec<McpToolDefinition>> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MCP_TOOLS_PAGES_COUNT_MAX {
        let params = cursor.as_ref().map(|c| json!({"cursor": c}));
        let result = transport.request("tools/list", params).await?;
        let page: ToolsPage = serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("invalid tools/list result: {}", e)))?;
        tools.extend(page.tools);

        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(tools),
        }
    }

    warn!(pages = MCP_TOOLS_PAGES_COUNT_MAX, "tools/list paging stopped at page limit");
    Ok(tools)
}

/// Split `manual.server.tool` into the server (if configured) and the server-local name
fn resolve_target<'a>(
    tool_name: &'a str,
    template: &McpCallTemplate,
) -> (Option<&'a str>, &'a str) {
    let rest = template
        .name
        .as_deref()
        .and_then(|manual| tool_name.strip_prefix(manual))
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(tool_name);

    match rest.split_once('.') {
        Some((server, local)) if template.config.mcp_servers.contains_key(server) => {
            (Some(server), local)
        }
        _ => (None, rest),
    }
}

/// Text content parsed as JSON, then as a number, else kept as a string
fn parse_text_content(text: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return value;
    }
    if let Some(number) = text
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
    {
        return Value::Number(number);
    }
    Value::String(text.to_string())
}

/// Turn a `tools/call` result into the tool's value
fn unwrap_tool_result(result: Value) -> Result<Value> {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let structured = result
        .get("structuredContent")
        .or_else(|| result.get("structured_output"))
        .filter(|v| !v.is_null())
        .cloned();

    let value = match (structured, result.get("content")) {
        (Some(structured), _) => structured,
        (None, Some(Value::Array(items))) => {
            let mut values: Vec<Value> = items
                .iter()
                .map(|item| match (item.get("type").and_then(Value::as_str), item.get("text")) {
                    (Some("text"), Some(Value::String(text))) => parse_text_content(text),
                    _ => item.clone(),
                })
                .collect();
            if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Array(values)
            }
        }
        _ => result,
    };

    if is_error {
        let reason = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(Error::transport(CALL_TEMPLATE_TYPE, format!("tool reported an error: {}", reason)));
    }
    Ok(value)
}

#[async_trait]
impl CommunicationProtocol for McpCommunicationProtocol {
    fn protocol_name(&self) -> &str {
        CALL_TEMPLATE_TYPE
    }

    async fn register_manual(
        &self,
        caller: &dyn ProtocolCaller,
        manual_call_template: &CallTemplate,
    ) -> Result<RegisterManualResult> {
        let template: McpCallTemplate = manual_call_template.parse_as()?;
        template.validate()?;
        let manual_name = template.name.clone().unwrap_or_default();
        let auth = template.auth.as_ref();

        let mut tools = Vec::new();
        let mut errors = Vec::new();
        for (server_name, server) in &template.config.mcp_servers {
            let resolved = resolve_server(caller, server);
            match self.list_server_tools(server_name, &resolved, auth).await {
                Ok(definitions) => {
                    let tool_template = template.for_server(server_name, server).to_call_template()?;
                    for definition in definitions {
                        let mut tool = Tool::new(
                            format!("{}.{}", server_name, definition.name),
                            tool_template.clone(),
                        )
                        .with_description(definition.description.unwrap_or_default());
                        if !definition.input_schema.is_null() {
                            tool = tool.with_inputs(definition.input_schema);
                        }
                        if let Some(outputs) = definition.output_schema {
                            tool = tool.with_outputs(outputs);
                        }
                        tools.push(tool);
                    }
                }
                Err(e) => {
                    warn!(manual = %manual_name, server = %server_name, error = %e, "MCP server discovery failed");
                    errors.push(format!("{}: {}", server_name, self.to_error(e)));
                }
            }
        }

        let servers = template.config.mcp_servers.len();
        info!(manual = %manual_name, servers, tools = tools.len(), failed = errors.len(), "MCP manual discovered");

        if servers > 0 && errors.len() == servers {
            return Ok(RegisterManualResult::failure(manual_call_template.clone(), errors));
        }
        let mut result =
            RegisterManualResult::success(manual_call_template.clone(), UtcpManual::new(tools));
        result.errors = errors;
        Ok(result)
    }

    async fn deregister_manual(
        &self,
        _caller: &dyn ProtocolCaller,
        manual_call_template: &CallTemplate,
    ) -> Result<()> {
        let template: McpCallTemplate = manual_call_template.parse_as()?;
        for (server_name, server) in &template.config.mcp_servers {
            if self.sessions.close(&session_key(server_name, server)).await {
                debug!(server = %server_name, "Closed MCP session on deregister");
            }
        }
        Ok(())
    }

    async fn call_tool(
        &self,
        caller: &dyn ProtocolCaller,
        tool_name: &str,
        args: &Map<String, Value>,
        tool_call_template: &CallTemplate,
    ) -> Result<Value> {
        let template: McpCallTemplate = tool_call_template.parse_as()?;
        template.validate()?;
        let auth = template.auth.as_ref();
        let (server_hint, local_name) = resolve_target(tool_name, &template);

        if let Some(server_name) = server_hint {
            if let Some(server) = template.config.mcp_servers.get(server_name) {
                let resolved = resolve_server(caller, server);
                return self
                    .call_on_server(server_name, &resolved, auth, local_name, args)
                    .await;
            }
        }

        // No server segment: find the first server advertising the tool
        for (server_name, server) in &template.config.mcp_servers {
            let resolved = resolve_server(caller, server);
            match self.list_server_tools(server_name, &resolved, auth).await {
                Ok(definitions) if definitions.iter().any(|d| d.name == local_name) => {
                    return self
                        .call_on_server(server_name, &resolved, auth, local_name, args)
                        .await;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(server = %server_name, error = %e, "Skipping MCP server during tool lookup")
                }
            }
        }

        Err(Error::ToolNotFound {
            name: tool_name.to_string(),
        })
    }

    async fn close(&self) -> Result<()> {
        let closed = self.sessions.close_all().await;
        self.factory.clear_credentials().await;
        info!(sessions = closed, "MCP protocol closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct Root(Option<PathBuf>);

    impl ProtocolCaller for Root {
        fn root_dir(&self) -> Option<&Path> {
            self.0.as_deref()
        }
    }

    /// Scripted server shared by every fake session
    #[derive(Default)]
    struct FakeServer {
        tools: Vec<Value>,
        failures: Mutex<VecDeque<McpError>>,
        delay_ms: u64,
        calls: AtomicUsize,
    }

    struct FakeTransport {
        server: Arc<FakeServer>,
    }

    #[async_trait]
    impl McpTransport for FakeTransport {
        async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
            if let Some(err) = self.server.failures.lock().await.pop_front() {
                return Err(err);
            }
            if self.server.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.server.delay_ms)).await;
            }
            let params = params.unwrap_or(Value::Null);
            match method {
                "tools/list" => {
                    // Two pages: first tool, then the rest
                    if params.get("cursor").is_some() {
                        Ok(json!({"tools": self.server.tools[1..]}))
                    } else {
                        Ok(json!({"tools": self.server.tools[..1], "nextCursor": "page-2"}))
                    }
                }
                "tools/call" => {
                    self.server.calls.fetch_add(1, Ordering::SeqCst);
                    let text = json!({"tool": params["name"], "args": params["arguments"]});
                    Ok(json!({"content": [{"type": "text", "text": text.to_string()}]}))
                }
                other => Err(McpError::new(McpErrorKind::Remote, format!("unknown method {}", other))),
            }
        }

        async fn notify(&self, _method: &str, _params: Option<Value>) -> McpResult<()> {
            Ok(())
        }

        async fn close(&self) {}
    }

    struct FakeFactory {
        server: Arc<FakeServer>,
        connects: AtomicUsize,
        /// Server whose connect takes two seconds
        slow_server: Option<&'static str>,
    }

    impl FakeFactory {
        fn new(server: FakeServer) -> Arc<Self> {
            Arc::new(Self {
                server: Arc::new(server),
                connects: AtomicUsize::new(0),
                slow_server: None,
            })
        }

        fn with_slow_server(server: FakeServer, slow_server: &'static str) -> Arc<Self> {
            Arc::new(Self {
                server: Arc::new(server),
                connects: AtomicUsize::new(0),
                slow_server: Some(slow_server),
            })
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl McpTransportFactory for FakeFactory {
        async fn connect(
            &self,
            server_name: &str,
            _server: &McpServerConfig,
            _auth: Option<&Auth>,
        ) -> McpResult<Arc<dyn McpTransport>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.slow_server == Some(server_name) {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Ok(Arc::new(FakeTransport {
                server: self.server.clone(),
            }))
        }
    }

    fn server_with_tools() -> FakeServer {
        FakeServer {
            tools: vec![
                json!({"name": "add", "description": "adds", "inputSchema": {"type": "object"}}),
                json!({"name": "echo", "outputSchema": {"type": "object"}}),
            ],
            ..FakeServer::default()
        }
    }

    fn manual() -> McpCallTemplate {
        McpCallTemplate::new()
            .with_name("m")
            .with_server("calc", McpServerConfig::stdio("calc-server", Vec::<String>::new()))
    }

    async fn call(
        protocol: &McpCommunicationProtocol,
        tool_name: &str,
        template: &McpCallTemplate,
    ) -> Result<Value> {
        let args = json!({"a": 1});
        protocol
            .call_tool(
                &Root(None),
                tool_name,
                args.as_object().unwrap(),
                &template.to_call_template().unwrap(),
            )
            .await
    }

    #[tokio::test]
    async fn test_register_names_tools_by_server() {
        let factory = FakeFactory::new(server_with_tools());
        let protocol = McpCommunicationProtocol::with_transport_factory(factory.clone());

        let result = protocol
            .register_manual(&Root(None), &manual().to_call_template().unwrap())
            .await
            .unwrap();

        assert!(result.success);
        let names: Vec<_> = result.manual.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["calc.add", "calc.echo"]);
        assert_eq!(result.manual.tools[0].description, "adds");
        assert_eq!(result.manual.tools[1].outputs, json!({"type": "object"}));

        let tool_template: McpCallTemplate =
            result.manual.tools[0].tool_call_template.parse_as().unwrap();
        assert_eq!(tool_template.config.mcp_servers.len(), 1);
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test]
    async fn test_slow_server_connect_does_not_delay_other_servers() {
        let factory = FakeFactory::with_slow_server(server_with_tools(), "slow");
        let protocol = Arc::new(McpCommunicationProtocol::with_transport_factory(factory.clone()));
        let template = McpCallTemplate::new()
            .with_name("m")
            .with_server("slow", McpServerConfig::stdio("slow-server", Vec::<String>::new()))
            .with_server("fast", McpServerConfig::stdio("fast-server", Vec::<String>::new()));

        let slow_protocol = protocol.clone();
        let slow_template = template.clone();
        let slow = tokio::spawn(async move {
            call(&slow_protocol, "m.slow.add", &slow_template).await.map(|_| ())
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        let result = call(&protocol, "m.fast.add", &template).await.unwrap();
        assert_eq!(result["tool"], "add");
        assert!(started.elapsed() < Duration::from_secs(1), "waited {:?}", started.elapsed());

        slow.await.unwrap().unwrap();
        assert_eq!(factory.connects(), 2);
    }

    #[tokio::test]
    async fn test_sequential_calls_reuse_session() {
        let factory = FakeFactory::new(server_with_tools());
        let protocol = McpCommunicationProtocol::with_transport_factory(factory.clone());

        let first = call(&protocol, "m.calc.add", &manual()).await.unwrap();
        let second = call(&protocol, "m.calc.add", &manual()).await.unwrap();

        assert_eq!(first, json!({"tool": "add", "args": {"a": 1}}));
        assert_eq!(first, second);
        assert_eq!(factory.connects(), 1);
        assert_eq!(protocol.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_recoverable_failure_rebuilds_once() {
        let server = server_with_tools();
        server
            .failures
            .lock()
            .await
            .push_back(McpError::closed("server went away"));
        let factory = FakeFactory::new(server);
        let protocol = McpCommunicationProtocol::with_transport_factory(factory.clone());

        let result = call(&protocol, "m.calc.add", &manual()).await.unwrap();
        assert_eq!(result["tool"], "add");
        assert_eq!(factory.connects(), 2);

        call(&protocol, "m.calc.add", &manual()).await.unwrap();
        assert_eq!(factory.connects(), 2);
    }

    #[tokio::test]
    async fn test_second_recoverable_failure_propagates() {
        let server = server_with_tools();
        {
            let mut failures = server.failures.lock().await;
            failures.push_back(McpError::protocol("stream disconnected"));
            failures.push_back(McpError::new(McpErrorKind::ConnectionReset, "reset again"));
        }
        let factory = FakeFactory::new(server);
        let protocol = McpCommunicationProtocol::with_transport_factory(factory.clone());

        let err = call(&protocol, "m.calc.add", &manual()).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert!(err.to_string().contains("reset again"));
        assert_eq!(factory.connects(), 2);
        assert_eq!(factory.server.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_terminal_failure_keeps_session() {
        let server = server_with_tools();
        server
            .failures
            .lock()
            .await
            .push_back(McpError::new(McpErrorKind::Remote, "Invalid params (code -32602)"));
        let factory = FakeFactory::new(server);
        let protocol = McpCommunicationProtocol::with_transport_factory(factory.clone());

        let err = call(&protocol, "m.calc.add", &manual()).await.unwrap_err();
        assert!(err.to_string().contains("-32602"));
        call(&protocol, "m.calc.add", &manual()).await.unwrap();
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test]
    async fn test_operation_timeout_fails_call_not_session() {
        let factory = FakeFactory::new(FakeServer {
            delay_ms: 500,
            ..server_with_tools()
        });
        let protocol =
            McpCommunicationProtocol::with_transport_factory(factory.clone()).with_operation_timeout_ms(50);

        let err = call(&protocol, "m.calc.add", &manual()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { timeout_ms: 50, .. }));
        assert_eq!(factory.connects(), 1);
        assert_eq!(protocol.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_tool_without_server_segment_is_looked_up() {
        let factory = FakeFactory::new(server_with_tools());
        let protocol = McpCommunicationProtocol::with_transport_factory(factory.clone());

        let result = call(&protocol, "m.echo", &manual()).await.unwrap();
        assert_eq!(result["tool"], "echo");

        let err = call(&protocol, "m.missing", &manual()).await.unwrap_err();
        assert!(matches!(err, Error::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_close_and_deregister_drop_sessions() {
        let factory = FakeFactory::new(server_with_tools());
        let protocol = McpCommunicationProtocol::with_transport_factory(factory.clone());
        let template = manual().to_call_template().unwrap();

        call(&protocol, "m.calc.add", &manual()).await.unwrap();
        protocol.deregister_manual(&Root(None), &template).await.unwrap();
        assert_eq!(protocol.session_count().await, 0);

        call(&protocol, "m.calc.add", &manual()).await.unwrap();
        protocol.close().await.unwrap();
        assert_eq!(protocol.session_count().await, 0);
        assert_eq!(factory.connects(), 2);
    }

    #[test]
    fn test_resolve_target() {
        let template = manual();
        assert_eq!(resolve_target("m.calc.add", &template), (Some("calc"), "add"));
        assert_eq!(resolve_target("calc.add", &template), (Some("calc"), "add"));
        assert_eq!(resolve_target("m.add", &template), (None, "add"));
        assert_eq!(resolve_target("m.other.add", &template), (None, "other.add"));
    }

    #[test]
    fn test_unwrap_tool_result() {
        let structured = json!({
            "content": [{"type": "text", "text": "ignored"}],
            "structuredContent": {"sum": 3}
        });
        assert_eq!(unwrap_tool_result(structured).unwrap(), json!({"sum": 3}));

        let legacy = json!({"structured_output": [1, 2]});
        assert_eq!(unwrap_tool_result(legacy).unwrap(), json!([1, 2]));

        let single = json!({"content": [{"type": "text", "text": " 2.5 "}]});
        assert_eq!(unwrap_tool_result(single).unwrap(), json!(2.5));

        let mixed = json!({"content": [
            {"type": "text", "text": "{\"a\": 1}"},
            {"type": "text", "text": "plain words"},
            {"type": "image", "data": "AAAA", "mimeType": "image/png"}
        ]});
        assert_eq!(
            unwrap_tool_result(mixed).unwrap(),
            json!([{"a": 1}, "plain words", {"type": "image", "data": "AAAA", "mimeType": "image/png"}])
        );

        let failed = json!({"isError": true, "content": [{"type": "text", "text": "division by zero"}]});
        let err = unwrap_tool_result(failed).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[tokio::test]
    async fn test_stdio_server_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("server.sh");
        std::fs::write(
            &script,
            r#"while IFS= read -r line; do
  if [[ $line =~ \"id\":([0-9]+) ]]; then
    id=${BASH_REMATCH[1]}
    case $line in
      *'"method":"initialize"'*)
        printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}\n' "$id" ;;
      *'"method":"tools/list"'*)
        printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"ping","description":"Ping","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
      *'"method":"tools/call"'*)
        printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
    esac
  fi
done
"#,
        )
        .unwrap();

        let template = McpCallTemplate::new().with_name("local").with_server(
            "fake",
            McpServerConfig::stdio("bash", ["server.sh"]).with_cwd("."),
        );
        let caller = Root(Some(dir.path().to_path_buf()));
        let protocol = McpCommunicationProtocol::new();

        let result = protocol
            .register_manual(&caller, &template.to_call_template().unwrap())
            .await
            .unwrap();
        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.manual.tools[0].name, "fake.ping");

        let value = protocol
            .call_tool(
                &caller,
                "local.fake.ping",
                &Map::new(),
                &result.manual.tools[0].tool_call_template,
            )
            .await
            .unwrap();
        assert_eq!(value, json!("pong"));
        assert_eq!(protocol.session_count().await, 1);

        protocol.close().await.unwrap();
        assert_eq!(protocol.session_count().await, 0);
    }
}
