//! Manual documents shared by the HTTP and text transports
//!
//! A discovery document is either a native manual or an OpenAPI/Swagger
//! description that gets converted into one.

use crate::http::OpenApiConverter;
use serde_json::Value;
use utcp_core::{Error, Result, UtcpManual};

/// Serialization of a discovery document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Pick the format from a content type and/or a path or URL
    pub(crate) fn detect(content_type: Option<&str>, location: &str) -> Self {
        let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
        if content_type.contains("yaml") {
            return Self::Yaml;
        }
        let location = location
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if location.ends_with(".yaml") || location.ends_with(".yml") {
            Self::Yaml
        } else {
            Self::Json
        }
    }

    pub(crate) fn parse(self, text: &str) -> Result<Value> {
        match self {
            Self::Json => serde_json::from_str(text)
                .map_err(|e| Error::discovery_format(format!("invalid JSON document: {}", e))),
            Self::Yaml => serde_yaml::from_str(text)
                .map_err(|e| Error::discovery_format(format!("invalid YAML document: {}", e))),
        }
    }
}

/// Whether the document looks like an OpenAPI or Swagger description
pub(crate) fn is_openapi_document(document: &Value) -> bool {
    ["openapi", "swagger", "paths"]
        .iter()
        .any(|key| document.get(key).is_some())
}

/// Turn a discovery document into a manual
pub(crate) fn manual_from_document(
    document: Value,
    source: &str,
    manual_name: &str,
) -> Result<UtcpManual> {
    if UtcpManual::is_manual_document(&document) {
        return serde_json::from_value(document)
            .map_err(|e| Error::discovery_format(format!("invalid manual: {}", e)));
    }
    if is_openapi_document(&document) {
        return OpenApiConverter::new(document, Some(source), manual_name).convert();
    }
    Err(Error::discovery_format(format!(
        "document at {} is neither a UTCP manual nor an OpenAPI specification",
        source
    )))
}
