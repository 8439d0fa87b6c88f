//! UTCP Protocols - Transports behind the universal tool calling surface
//!
//! TigerStyle: One module per transport, each behind `CommunicationProtocol`.
//!
//! # Overview
//!
//! This crate provides:
//! - `http`: manual discovery over HTTP(S), OpenAPI conversion, auth injection
//! - `mcp`: Model Context Protocol servers over stdio or HTTP with session reuse
//! - `text`: manuals and tool results read from local files
//! - `cli`: multi-step shell workflows
//!
//! # Example
//!
//! ```rust,ignore
//! use utcp_core::PluginRegistry;
//!
//! let registry = PluginRegistry::new();
//! utcp_protocols::register_default_plugins(&registry).await;
//! ```

pub mod cli;
mod document;
pub mod http;
pub mod mcp;
pub mod text;

pub use cli::{CliCallTemplate, CliCommand, CliCommunicationProtocol};
pub use http::{HttpCallTemplate, HttpCommunicationProtocol, HttpMethod, OpenApiConverter};
pub use mcp::{McpCallTemplate, McpCommunicationProtocol, McpServerConfig};
pub use text::{TextCallTemplate, TextCommunicationProtocol};

use std::sync::Arc;
use utcp_core::{CallTemplateSchema, PluginRegistry};

/// Register the built-in call template schemas and protocols
///
/// Existing registrations are kept. Returns the number of new registrations.
pub async fn register_default_plugins(registry: &PluginRegistry) -> usize {
    let mut registered = 0;

    let schemas = [
        (http::CALL_TEMPLATE_TYPE, CallTemplateSchema::of::<HttpCallTemplate>()),
        (mcp::CALL_TEMPLATE_TYPE, CallTemplateSchema::of::<McpCallTemplate>()),
        (text::CALL_TEMPLATE_TYPE, CallTemplateSchema::of::<TextCallTemplate>()),
        (cli::CALL_TEMPLATE_TYPE, CallTemplateSchema::of::<CliCallTemplate>()),
    ];
    for (call_template_type, schema) in schemas {
        if registry
            .register_call_template_schema(call_template_type, schema, false)
            .await
        {
            registered += 1;
        }
    }

    let protocols: [(&str, Arc<dyn utcp_core::CommunicationProtocol>); 4] = [
        (http::CALL_TEMPLATE_TYPE, Arc::new(HttpCommunicationProtocol::new())),
        (mcp::CALL_TEMPLATE_TYPE, Arc::new(McpCommunicationProtocol::new())),
        (text::CALL_TEMPLATE_TYPE, Arc::new(TextCommunicationProtocol::new())),
        (cli::CALL_TEMPLATE_TYPE, Arc::new(CliCommunicationProtocol::new())),
    ];
    for (call_template_type, protocol) in protocols {
        if registry
            .register_comm_protocol(call_template_type, protocol, false)
            .await
        {
            registered += 1;
        }
    }

    registered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_default_plugins_is_idempotent() {
        let registry = PluginRegistry::new();
        assert_eq!(register_default_plugins(&registry).await, 8);
        assert_eq!(register_default_plugins(&registry).await, 0);

        for t in ["http", "mcp", "text", "cli"] {
            assert!(registry.get_comm_protocol(t).await.is_some());
        }
    }

    #[tokio::test]
    async fn test_union_schema_validates_builtin_templates() {
        let registry = PluginRegistry::new();
        register_default_plugins(&registry).await;
        let union = registry.get_call_template_union_schema().await;

        assert!(union
            .validate(json!({"call_template_type": "text", "name": "f", "file_path": "tools.json"}))
            .is_ok());
        assert!(union
            .validate(json!({"call_template_type": "http", "name": "w"}))
            .is_err());
        assert!(union
            .validate(json!({
                "call_template_type": "cli",
                "name": "c",
                "commands": [{"command": "echo hi"}]
            }))
            .is_ok());
    }
}
