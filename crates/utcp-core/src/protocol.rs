//! Communication protocol abstraction
//!
//! TigerStyle: One trait per transport, explicit lifecycle.
//!
//! Every transport implements discovery (`register_manual`), teardown
//! (`deregister_manual`), invocation (`call_tool`), optional streaming and
//! `close` for releasing sessions, processes and cached credentials.

use crate::call_template::CallTemplate;
use crate::error::Result;
use crate::tool::RegisterManualResult;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Lazy, finite sequence of result chunks
pub type ToolResultStream = BoxStream<'static, Result<Value>>;

/// Context handed to protocols by the orchestrator
pub trait ProtocolCaller: Send + Sync {
    /// Base directory for relative paths in call templates
    fn root_dir(&self) -> Option<&Path>;

    /// Resolve `path` against the root directory when relative
    fn resolve_path(&self, path: &Path) -> PathBuf {
        match self.root_dir() {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// A transport able to discover and invoke tools
#[async_trait]
pub trait CommunicationProtocol: Send + Sync {
    /// Discriminator this implementation serves, used in logs
    fn protocol_name(&self) -> &str;

    /// Discover the tools behind a manual call template
    ///
    /// Discovery failures are reported in the result, not as `Err`.
    async fn register_manual(
        &self,
        caller: &dyn ProtocolCaller,
        manual_call_template: &CallTemplate,
    ) -> Result<RegisterManualResult>;

    /// Release anything held for the manual
    async fn deregister_manual(
        &self,
        caller: &dyn ProtocolCaller,
        manual_call_template: &CallTemplate,
    ) -> Result<()>;

    /// Invoke a tool and return its raw result
    async fn call_tool(
        &self,
        caller: &dyn ProtocolCaller,
        tool_name: &str,
        args: &Map<String, Value>,
        tool_call_template: &CallTemplate,
    ) -> Result<Value>;

    /// Invoke a tool as a stream; the default yields one chunk
    async fn call_tool_streaming(
        &self,
        caller: &dyn ProtocolCaller,
        tool_name: &str,
        args: &Map<String, Value>,
        tool_call_template: &CallTemplate,
    ) -> Result<ToolResultStream> {
        let result = self
            .call_tool(caller, tool_name, args, tool_call_template)
            .await?;
        Ok(stream::once(async move { Ok(result) }).boxed())
    }

    /// Release every held resource
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
