//! UTCP Client - Register manuals, discover and call tools
//!
//! TigerStyle: One orchestrator, explicit registry, no global state.
//!
//! # Example
//!
//! ```rust,ignore
//! use utcp_client::UtcpClient;
//! use utcp_core::UtcpClientConfig;
//!
//! let config = UtcpClientConfig::from_file("utcp.yaml")?;
//! let client = UtcpClient::with_default_plugins(Some(".".into()), config).await?;
//! let tools = client.search_tools("weather", 5, None).await?;
//! let result = client.call_tool(&tools[0].name, args).await?;
//! client.close().await?;
//! ```

mod client;

pub use client::{sanitize_manual_name, UtcpClient};
