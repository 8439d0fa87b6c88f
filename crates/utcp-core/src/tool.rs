//! Tools, manuals and registration results
//!
//! TigerStyle: Plain data with explicit defaults.

use crate::call_template::CallTemplate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Protocol version written into manuals produced by this crate
pub const UTCP_VERSION: &str = "1.0.1";

/// Default manual version
pub const MANUAL_VERSION_DEFAULT: &str = "1.0.0";

/// Separator between manual name and local tool name
pub const TOOL_NAME_SEPARATOR: char = '.';

fn default_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

// =============================================================================
// Tool
// =============================================================================

/// A callable tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name; `manual.local` once registered
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments
    #[serde(default = "default_schema")]
    pub inputs: Value,
    /// JSON Schema of the result
    #[serde(default = "default_schema")]
    pub outputs: Value,
    /// Free-form tags used by search
    #[serde(default)]
    pub tags: Vec<String>,
    /// Typical response size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_response_size: Option<u64>,
    /// Template used to invoke this tool
    pub tool_call_template: CallTemplate,
}

impl Tool {
    /// Create a tool with empty schemas
    pub fn new(name: impl Into<String>, tool_call_template: CallTemplate) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            inputs: default_schema(),
            outputs: default_schema(),
            tags: Vec::new(),
            average_response_size: None,
            tool_call_template,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the input schema
    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    /// Set the output schema
    pub fn with_outputs(mut self, outputs: Value) -> Self {
        self.outputs = outputs;
        self
    }

    /// Manual part of a namespaced name
    pub fn manual_name(&self) -> Option<&str> {
        manual_name_of(&self.name)
    }

    /// Prefix the name with `manual.` unless it already is
    pub fn namespace_under(&mut self, manual_name: &str) {
        self.name = namespaced_tool_name(manual_name, &self.name);
    }
}

/// Name of the manual owning a full tool name
pub fn manual_name_of(tool_name: &str) -> Option<&str> {
    tool_name
        .split_once(TOOL_NAME_SEPARATOR)
        .map(|(manual, _)| manual)
        .filter(|manual| !manual.is_empty())
}

/// Build `manual.local`, leaving already prefixed names untouched
pub fn namespaced_tool_name(manual_name: &str, tool_name: &str) -> String {
    assert!(!manual_name.is_empty(), "manual name cannot be empty");

    let prefix_len = manual_name.len() + TOOL_NAME_SEPARATOR.len_utf8();
    let already_prefixed = tool_name.len() > prefix_len
        && tool_name.starts_with(manual_name)
        && tool_name[manual_name.len()..].starts_with(TOOL_NAME_SEPARATOR);

    if already_prefixed {
        tool_name.to_string()
    } else {
        format!("{}{}{}", manual_name, TOOL_NAME_SEPARATOR, tool_name)
    }
}

// =============================================================================
// Manual
// =============================================================================

/// A named collection of tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtcpManual {
    #[serde(default = "default_utcp_version")]
    pub utcp_version: String,
    #[serde(default = "default_manual_version")]
    pub manual_version: String,
    #[serde(default)]
    pub tools: Vec<Tool>,
}

fn default_utcp_version() -> String {
    UTCP_VERSION.to_string()
}

fn default_manual_version() -> String {
    MANUAL_VERSION_DEFAULT.to_string()
}

impl UtcpManual {
    /// Create a manual holding the given tools
    pub fn new(tools: Vec<Tool>) -> Self {
        Self {
            utcp_version: default_utcp_version(),
            manual_version: default_manual_version(),
            tools,
        }
    }

    /// Create a manual with no tools
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Whether a discovery document has the native manual shape
    pub fn is_manual_document(document: &Value) -> bool {
        document.get("utcp_version").is_some() && document.get("tools").is_some()
    }
}

impl Default for UtcpManual {
    fn default() -> Self {
        Self::empty()
    }
}

// =============================================================================
// Registration Result
// =============================================================================

/// Outcome of registering one manual
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterManualResult {
    pub manual_call_template: CallTemplate,
    pub manual: UtcpManual,
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl RegisterManualResult {
    /// Successful registration
    pub fn success(manual_call_template: CallTemplate, manual: UtcpManual) -> Self {
        Self {
            manual_call_template,
            manual,
            success: true,
            errors: Vec::new(),
        }
    }

    /// Failed registration; the manual is empty
    pub fn failure(manual_call_template: CallTemplate, errors: Vec<String>) -> Self {
        debug_assert!(!errors.is_empty(), "failure without errors");
        Self {
            manual_call_template,
            manual: UtcpManual::empty(),
            success: false,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> CallTemplate {
        CallTemplate::new("text").with_field("file_path", "tools.json")
    }

    #[test]
    fn test_namespacing_is_idempotent() {
        assert_eq!(namespaced_tool_name("m", "t"), "m.t");
        assert_eq!(namespaced_tool_name("m", "m.t"), "m.t");
        assert_eq!(
            namespaced_tool_name("m", namespaced_tool_name("m", "t").as_str()),
            "m.t"
        );
    }

    #[test]
    fn test_namespacing_requires_separator() {
        // "mt" shares the prefix but is not under manual "m"
        assert_eq!(namespaced_tool_name("m", "mt"), "m.mt");
        assert_eq!(namespaced_tool_name("m", "m."), "m.m.");
        assert_eq!(namespaced_tool_name("weather", "srv.get"), "weather.srv.get");
    }

    #[test]
    fn test_manual_name_of() {
        assert_eq!(manual_name_of("weather.get"), Some("weather"));
        assert_eq!(manual_name_of("weather.srv.get"), Some("weather"));
        assert_eq!(manual_name_of("plain"), None);
        assert_eq!(manual_name_of(".x"), None);
    }

    #[test]
    fn test_tool_defaults_from_json() {
        let tool: Tool = serde_json::from_value(json!({
            "name": "echo",
            "tool_call_template": {"call_template_type": "http", "url": "http://localhost/echo"}
        }))
        .unwrap();

        assert_eq!(tool.description, "");
        assert!(tool.tags.is_empty());
        assert_eq!(tool.inputs["type"], "object");
        assert_eq!(tool.tool_call_template.call_template_type(), "http");
    }

    #[test]
    fn test_manual_document_detection() {
        assert!(UtcpManual::is_manual_document(
            &json!({"utcp_version": "1.0.1", "tools": []})
        ));
        assert!(!UtcpManual::is_manual_document(&json!({"openapi": "3.0.0"})));
    }

    #[test]
    fn test_tool_namespace_under() {
        let mut tool = Tool::new("get", template());
        tool.namespace_under("files");
        assert_eq!(tool.name, "files.get");
        assert_eq!(tool.manual_name(), Some("files"));
    }
}
