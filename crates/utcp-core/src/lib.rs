//! UTCP Core - Data model and shared machinery for universal tool calling
//!
//! TigerStyle: Explicit types, explicit registries, no hidden global state.
//!
//! # Overview
//!
//! This crate provides:
//! - `CallTemplate`, `Tool`, `UtcpManual` and auth types
//! - Namespaced variable substitution over layered sources
//! - The `ToolRepository` store and `ToolSearchStrategy` ranking
//! - The `CommunicationProtocol` trait every transport implements
//! - `PluginRegistry` mapping template types to schemas and protocols
//! - Result post-processors and client configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use utcp_core::{PluginRegistry, UtcpClientConfig};
//!
//! let registry = PluginRegistry::new();
//! utcp_protocols::register_default_plugins(&registry).await;
//! let config = UtcpClientConfig::from_file("utcp.yaml")?;
//! ```

pub mod call_template;
pub mod config;
pub mod error;
pub mod plugin;
pub mod post_process;
pub mod protocol;
pub mod repository;
pub mod search;
pub mod telemetry;
pub mod tool;
pub mod variables;

pub use call_template::{ApiKeyAuth, ApiKeyLocation, Auth, BasicAuth, CallTemplate, OAuth2Auth};
pub use config::{UtcpClientConfig, VariableLoaderConfig};
pub use error::{Error, Result};
pub use plugin::{CallTemplateSchema, CallTemplateUnionSchema, PluginRegistry};
pub use post_process::{
    FilterDictConfig, FilterDictPostProcessor, LimitStringsConfig, LimitStringsPostProcessor,
    PostProcessorConfig, ToolPostProcessor, ToolSelector,
};
pub use protocol::{CommunicationProtocol, ProtocolCaller, ToolResultStream};
pub use repository::{InMemToolRepository, ToolRepository, ToolRepositoryConfig};
pub use search::{TagAndDescriptionWordMatchStrategy, ToolSearchStrategy, ToolSearchStrategyConfig};
pub use telemetry::{init_telemetry, LogTarget, TelemetryConfig};
pub use tool::{RegisterManualResult, Tool, UtcpManual, UTCP_VERSION};
pub use variables::{DotEnvVariableLoader, VariableLoader, VariableSubstitutor};
