//! Local file transport
//!
//! TigerStyle: Stateless reads, no side effects.
//!
//! Discovery reads a manual (or OpenAPI document) from disk. Calling a tool
//! returns the file content verbatim; arguments are ignored.

use crate::document::{manual_from_document, DocumentFormat};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use utcp_core::{
    Auth, CallTemplate, CommunicationProtocol, Error, ProtocolCaller, RegisterManualResult, Result,
    UtcpManual,
};

/// Discriminator for text call templates
pub const CALL_TEMPLATE_TYPE: &str = "text";

fn default_call_template_type() -> String {
    CALL_TEMPLATE_TYPE.to_string()
}

/// Call template pointing at a local file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCallTemplate {
    #[serde(default = "default_call_template_type")]
    pub call_template_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Path to the file, relative paths resolved against the client root
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

impl TextCallTemplate {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            call_template_type: default_call_template_type(),
            name: None,
            file_path: file_path.into(),
            auth: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn to_call_template(&self) -> Result<CallTemplate> {
        CallTemplate::from_typed(self)
    }
}

/// Reads manuals and tool results from files
#[derive(Debug, Default)]
pub struct TextCommunicationProtocol;

impl TextCommunicationProtocol {
    pub fn new() -> Self {
        Self
    }

    fn resolve(caller: &dyn ProtocolCaller, template: &TextCallTemplate) -> PathBuf {
        caller.resolve_path(Path::new(&template.file_path))
    }

    async fn load_manual(path: &Path, manual_name: &str) -> Result<UtcpManual> {
        let source = path.display().to_string();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::transport(CALL_TEMPLATE_TYPE, format!("cannot read {}: {}", source, e))
        })?;
        let document = DocumentFormat::detect(None, &source).parse(&content)?;
        manual_from_document(document, &source, manual_name)
    }
}

#[async_trait]
impl CommunicationProtocol for TextCommunicationProtocol {
    fn protocol_name(&self) -> &str {
        CALL_TEMPLATE_TYPE
    }

    async fn register_manual(
        &self,
        caller: &dyn ProtocolCaller,
        manual_call_template: &CallTemplate,
    ) -> Result<RegisterManualResult> {
        let template: TextCallTemplate = manual_call_template.parse_as()?;
        let path = Self::resolve(caller, &template);
        let manual_name = template.name.clone().unwrap_or_default();
        let source = path.display().to_string();

        match Self::load_manual(&path, &manual_name).await {
            Ok(manual) => {
                debug!(manual = %manual_name, path = %source, tools = manual.tools.len(), "Text manual loaded");
                Ok(RegisterManualResult::success(manual_call_template.clone(), manual))
            }
            Err(e) => {
                warn!(manual = %manual_name, path = %source, error = %e, "Text manual load failed");
                Ok(RegisterManualResult::failure(
                    manual_call_template.clone(),
                    vec![e.to_string()],
                ))
            }
        }
    }

    async fn deregister_manual(
        &self,
        _caller: &dyn ProtocolCaller,
        _manual_call_template: &CallTemplate,
    ) -> Result<()> {
        Ok(())
    }

    async fn call_tool(
        &self,
        caller: &dyn ProtocolCaller,
        tool_name: &str,
        _args: &Map<String, Value>,
        tool_call_template: &CallTemplate,
    ) -> Result<Value> {
        let template: TextCallTemplate = tool_call_template.parse_as()?;
        let path = Self::resolve(caller, &template);
        debug!(tool = %tool_name, path = %path.display(), "Reading text tool");

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            Error::transport(
                CALL_TEMPLATE_TYPE,
                format!("cannot read {}: {}", path.display(), e),
            )
        })?;
        Ok(Value::String(content))
    }
}
