//! HTTP transport
//!
//! TigerStyle: Declarative HTTP templates, explicit limits.
//!
//! A manual is discovered by requesting its URL; the body is either a native
//! manual or an OpenAPI document. Tool calls map arguments onto headers,
//! body, `{param}` path segments and query parameters.

mod auth;
mod openapi;
mod protocol;

pub use auth::OAuth2TokenCache;
pub use openapi::OpenApiConverter;
pub use protocol::HttpCommunicationProtocol;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utcp_core::{Auth, CallTemplate, Result};

/// Discriminator for HTTP call templates
pub const CALL_TEMPLATE_TYPE: &str = "http";

/// Default HTTP timeout in milliseconds
pub const HTTP_TIMEOUT_MS_DEFAULT: u64 = 30_000;

/// Default request content type
pub const HTTP_CONTENT_TYPE_DEFAULT: &str = "application/json";

/// Default argument carried as the request body
pub const HTTP_BODY_FIELD_DEFAULT: &str = "body";

/// Maximum URL length in bytes
pub const HTTP_URL_BYTES_MAX: usize = 8192;

/// HTTP request method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub(crate) fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }

    /// Parse a lowercase OpenAPI operation key
    pub(crate) fn from_operation_key(key: &str) -> Option<Self> {
        match key {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "patch" => Some(Self::Patch),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Patch => write!(f, "PATCH"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

fn default_call_template_type() -> String {
    CALL_TEMPLATE_TYPE.to_string()
}

fn default_content_type() -> String {
    HTTP_CONTENT_TYPE_DEFAULT.to_string()
}

fn default_body_field() -> Option<String> {
    Some(HTTP_BODY_FIELD_DEFAULT.to_string())
}

fn default_timeout_ms() -> u64 {
    HTTP_TIMEOUT_MS_DEFAULT
}

/// Call template for HTTP manuals and tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCallTemplate {
    #[serde(default = "default_call_template_type")]
    pub call_template_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Target URL, may contain `{param}` placeholders
    pub url: String,
    #[serde(default)]
    pub http_method: HttpMethod,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Static headers sent on every request
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Argument sent as the request body
    #[serde(default = "default_body_field")]
    pub body_field: Option<String>,
    /// Arguments sent as headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl HttpCallTemplate {
    /// GET template for `url` with defaults
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            call_template_type: default_call_template_type(),
            name: None,
            url: url.into(),
            http_method: HttpMethod::Get,
            content_type: default_content_type(),
            headers: HashMap::new(),
            body_field: default_body_field(),
            header_fields: Vec::new(),
            auth: None,
            timeout_ms: HTTP_TIMEOUT_MS_DEFAULT,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.http_method = method;
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_header_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Convert to the generic template stored on tools
    pub fn to_call_template(&self) -> Result<CallTemplate> {
        CallTemplate::from_typed(self)
    }
}
