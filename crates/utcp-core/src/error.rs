//! Error types for UTCP
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for UTCP operations
pub type Result<T> = std::result::Result<T, Error>;

/// UTCP error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation failed: {field}, reason: {reason}")]
    Validation { field: String, reason: String },

    #[error("Invalid variable namespace '{namespace}': only [A-Za-z0-9_] is allowed")]
    InvalidNamespace { namespace: String },

    // =========================================================================
    // Variable Errors
    // =========================================================================
    #[error("Variable not found: {name}")]
    VariableNotFound { name: String },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    #[error(
        "Manual already registered: {name}, deregister it first or use a different name"
    )]
    DuplicateManual { name: String },

    #[error("Manual not found: {name}")]
    ManualNotFound { name: String },

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("No communication protocol registered for call template type '{call_template_type}'")]
    ProtocolNotRegistered { call_template_type: String },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("Transport error ({protocol}): {reason}")]
    Transport { protocol: String, reason: String },

    #[error("Operation timed out: {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Command failed with exit code {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    // =========================================================================
    // Discovery Errors
    // =========================================================================
    #[error("Discovery format error: {reason}")]
    DiscoveryFormat { reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl Error {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(protocol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            protocol: protocol.into(),
            reason: reason.into(),
        }
    }

    /// Create a discovery format error
    pub fn discovery_format(reason: impl Into<String>) -> Self {
        Self::DiscoveryFormat {
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::VariableNotFound {
            name: "API_KEY".into(),
        };
        assert_eq!(err.to_string(), "Variable not found: API_KEY");
    }

    #[test]
    fn test_duplicate_manual_display() {
        let err = Error::DuplicateManual {
            name: "weather".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("weather"));
        assert!(msg.contains("deregister"));
    }

    #[test]
    fn test_timeout_display() {
        let msg = Error::timeout("tools/call", 1000).to_string();
        assert!(msg.contains("tools/call"));
        assert!(msg.contains("1000"));
    }
}
