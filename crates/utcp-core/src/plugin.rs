//! Plugin registry
//!
//! TigerStyle: Explicit registry object, no process-wide singleton.
//!
//! Maps a `call_template_type` discriminator to the schema that validates
//! templates of that type and to the protocol instance that serves them.

use crate::call_template::CallTemplate;
use crate::error::{Error, Result};
use crate::protocol::CommunicationProtocol;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Maximum number of registered call template types
pub const PLUGIN_TYPES_COUNT_MAX: usize = 256;

type Validator = Arc<dyn Fn(&CallTemplate) -> Result<()> + Send + Sync>;

/// Validates call templates of one type
#[derive(Clone)]
pub struct CallTemplateSchema {
    validator: Validator,
}

impl fmt::Debug for CallTemplateSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTemplateSchema").finish_non_exhaustive()
    }
}

impl CallTemplateSchema {
    /// A schema that accepts templates which deserialize into `T`
    pub fn of<T: DeserializeOwned + 'static>() -> Self {
        Self {
            validator: Arc::new(|template: &CallTemplate| template.parse_as::<T>().map(|_| ())),
        }
    }

    /// A schema backed by an arbitrary check
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&CallTemplate) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            validator: Arc::new(f),
        }
    }

    pub fn validate(&self, template: &CallTemplate) -> Result<()> {
        (self.validator)(template)
    }
}

/// Discriminated validator over every registered type at the time it was built
#[derive(Debug, Clone)]
pub struct CallTemplateUnionSchema {
    schemas: HashMap<String, CallTemplateSchema>,
}

impl CallTemplateUnionSchema {
    /// Parse and validate any call template
    ///
    /// With fewer than two registered types only the base fields are checked.
    pub fn validate(&self, value: Value) -> Result<CallTemplate> {
        let template = CallTemplate::from_value(value)?;
        self.validate_template(&template)?;
        Ok(template)
    }

    /// Validate an already parsed template
    pub fn validate_template(&self, template: &CallTemplate) -> Result<()> {
        if self.schemas.len() < 2 {
            return Ok(());
        }
        let call_template_type = template.call_template_type();
        match self.schemas.get(call_template_type) {
            Some(schema) => schema.validate(template),
            None => Err(Error::validation(
                "call_template_type",
                format!(
                    "unknown call template type '{}', expected one of: {}",
                    call_template_type,
                    self.type_names().join(", ")
                ),
            )),
        }
    }

    /// Registered discriminators, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.schemas.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Registry of call template schemas and protocol implementations
#[derive(Default)]
pub struct PluginRegistry {
    schemas: RwLock<HashMap<String, CallTemplateSchema>>,
    protocols: RwLock<HashMap<String, Arc<dyn CommunicationProtocol>>>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the schema for a call template type
    ///
    /// Returns false and leaves the registry untouched when the type is
    /// already registered and `override_existing` is not set.
    pub async fn register_call_template_schema(
        &self,
        call_template_type: &str,
        schema: CallTemplateSchema,
        override_existing: bool,
    ) -> bool {
        assert!(!call_template_type.is_empty(), "call_template_type cannot be empty");

        let mut schemas = self.schemas.write().await;
        if schemas.contains_key(call_template_type) && !override_existing {
            warn!(
                call_template_type = %call_template_type,
                "Call template schema already registered, ignoring"
            );
            return false;
        }
        if schemas.len() >= PLUGIN_TYPES_COUNT_MAX && !schemas.contains_key(call_template_type) {
            warn!(
                call_template_type = %call_template_type,
                max = PLUGIN_TYPES_COUNT_MAX,
                "Plugin registry full, ignoring schema"
            );
            return false;
        }

        schemas.insert(call_template_type.to_string(), schema);
        info!(call_template_type = %call_template_type, "Registered call template schema");
        true
    }

    /// Register the protocol serving a call template type
    pub async fn register_comm_protocol(
        &self,
        call_template_type: &str,
        protocol: Arc<dyn CommunicationProtocol>,
        override_existing: bool,
    ) -> bool {
        assert!(!call_template_type.is_empty(), "call_template_type cannot be empty");

        let mut protocols = self.protocols.write().await;
        if protocols.contains_key(call_template_type) && !override_existing {
            warn!(
                call_template_type = %call_template_type,
                "Communication protocol already registered, ignoring"
            );
            return false;
        }

        protocols.insert(call_template_type.to_string(), protocol);
        info!(call_template_type = %call_template_type, "Registered communication protocol");
        true
    }

    /// Protocol for a discriminator
    pub async fn get_comm_protocol(
        &self,
        call_template_type: &str,
    ) -> Option<Arc<dyn CommunicationProtocol>> {
        self.protocols.read().await.get(call_template_type).cloned()
    }

    /// Every registered protocol by discriminator
    pub async fn get_comm_protocols(&self) -> HashMap<String, Arc<dyn CommunicationProtocol>> {
        self.protocols.read().await.clone()
    }

    /// Snapshot a validator over all currently registered template types
    pub async fn get_call_template_union_schema(&self) -> CallTemplateUnionSchema {
        CallTemplateUnionSchema {
            schemas: self.schemas.read().await.clone(),
        }
    }

    /// Validate an arbitrary template against the current union
    pub async fn validate_call_template(&self, template: &CallTemplate) -> Result<()> {
        self.get_call_template_union_schema()
            .await
            .validate_template(template)
    }
}
