//! Call templates and authentication
//!
//! TigerStyle: One permissive base shape, discriminated by a single string.
//!
//! A `CallTemplate` carries the discriminator, the optional manual name and
//! auth, and every transport-specific field as a flat JSON map. Protocol
//! crates parse it into their own typed template with [`CallTemplate::parse_as`].

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default header name for API key authentication
pub const API_KEY_VAR_NAME_DEFAULT: &str = "X-Api-Key";

// =============================================================================
// Call Template
// =============================================================================

/// How to reach a manual or a single tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallTemplate {
    /// Transport discriminator (e.g. `http`, `mcp`, `text`, `cli`)
    call_template_type: String,
    /// Manual identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Credentials passed through to the transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    /// Transport-specific fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CallTemplate {
    /// Create an empty template of the given type
    pub fn new(call_template_type: impl Into<String>) -> Self {
        let call_template_type = call_template_type.into();
        assert!(
            !call_template_type.is_empty(),
            "call_template_type cannot be empty"
        );
        Self {
            call_template_type,
            name: None,
            auth: None,
            fields: Map::new(),
        }
    }

    /// Parse a template from arbitrary JSON
    pub fn from_value(value: Value) -> Result<Self> {
        let template: Self = serde_json::from_value(value)
            .map_err(|e| Error::validation("call_template", e.to_string()))?;
        if template.call_template_type.trim().is_empty() {
            return Err(Error::validation(
                "call_template_type",
                "discriminator cannot be empty",
            ));
        }
        Ok(template)
    }

    /// Build a base template from a typed protocol template
    pub fn from_typed<T: Serialize>(typed: &T) -> Result<Self> {
        let value = serde_json::to_value(typed)?;
        Self::from_value(value)
    }

    /// The discriminator selecting the protocol implementation
    pub fn call_template_type(&self) -> &str {
        &self.call_template_type
    }

    /// Set the manual name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set authentication
    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Set a transport-specific field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        debug_assert!(
            !matches!(key.as_str(), "call_template_type" | "name" | "auth"),
            "reserved key set through with_field"
        );
        self.fields.insert(key, value.into());
        self
    }

    /// Get a transport-specific field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Serialize into a JSON value
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse into a typed template, reporting failures as validation errors
    pub fn parse_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.to_value()?;
        serde_json::from_value(value).map_err(|e| {
            Error::validation(
                format!("call_template[{}]", self.call_template_type),
                e.to_string(),
            )
        })
    }
}

// =============================================================================
// Authentication
// =============================================================================

/// Credentials attached to a call template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "auth_type")]
pub enum Auth {
    /// API key sent in a header, query parameter or cookie
    #[serde(rename = "api_key")]
    ApiKey(ApiKeyAuth),
    /// HTTP Basic credentials
    #[serde(rename = "basic")]
    Basic(BasicAuth),
    /// OAuth2 client-credentials flow
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Auth),
}

/// Where an API key is placed on the request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
    Cookie,
}

/// API key authentication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyAuth {
    /// Key value, usually a `${VAR}` placeholder
    pub api_key: String,
    /// Header, query parameter or cookie name
    #[serde(default = "default_api_key_var_name")]
    pub var_name: String,
    /// Placement of the key
    #[serde(default)]
    pub location: ApiKeyLocation,
}

fn default_api_key_var_name() -> String {
    API_KEY_VAR_NAME_DEFAULT.to_string()
}

impl ApiKeyAuth {
    /// Create a header API key with the default header name
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            var_name: default_api_key_var_name(),
            location: ApiKeyLocation::Header,
        }
    }

    /// Set the variable name
    pub fn with_var_name(mut self, var_name: impl Into<String>) -> Self {
        self.var_name = var_name.into();
        self
    }

    /// Set the location
    pub fn with_location(mut self, location: ApiKeyLocation) -> Self {
        self.location = location;
        self
    }
}

/// HTTP Basic authentication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// OAuth2 client-credentials authentication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Auth {
    /// Token endpoint
    pub token_url: String,
    /// Client identifier, also the token cache key
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
    /// Space separated scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}
