//! UTCP client orchestrator
//!
//! TigerStyle: Explicit lifecycle per manual, fail fast on calls, report
//! discovery failures as data.
//!
//! A manual moves from unregistered to registered only through a successful
//! `register_manual`, and back through `deregister_manual`. Tool names are
//! always `manual.tool`.

use futures::future::join_all;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use utcp_core::tool::manual_name_of;
use utcp_core::{
    CallTemplate, CommunicationProtocol, Error, PluginRegistry, ProtocolCaller,
    RegisterManualResult, Result, Tool, ToolPostProcessor, ToolRepository, ToolResultStream,
    ToolSearchStrategy, UtcpClientConfig, UtcpManual, VariableSubstitutor,
};

static MANUAL_NAME_INVALID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("manual name pattern is a valid regex"));

/// Replace every character outside `[A-Za-z0-9_]` with `_`
pub fn sanitize_manual_name(name: &str) -> String {
    MANUAL_NAME_INVALID_CHARS.replace_all(name, "_").into_owned()
}

fn apply_post_processors(
    post_processors: &[Arc<dyn ToolPostProcessor>],
    tool: &Tool,
    manual_call_template: &CallTemplate,
    result: Value,
) -> Value {
    post_processors.iter().fold(result, |value, processor| {
        debug!(tool = %tool.name, post_processor = processor.name(), "Post-processing result");
        processor.post_process(tool, manual_call_template, value)
    })
}

/// Entry point for registering manuals and calling their tools
pub struct UtcpClient {
    root_dir: Option<PathBuf>,
    config: UtcpClientConfig,
    registry: Arc<PluginRegistry>,
    repository: Arc<dyn ToolRepository>,
    search_strategy: Arc<dyn ToolSearchStrategy>,
    post_processors: Vec<Arc<dyn ToolPostProcessor>>,
    substitutor: VariableSubstitutor,
    /// Names with a registration in flight
    registering: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for UtcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtcpClient")
            .field("root_dir", &self.root_dir)
            .field("post_processors", &self.post_processors.len())
            .finish()
    }
}

impl ProtocolCaller for UtcpClient {
    fn root_dir(&self) -> Option<&Path> {
        self.root_dir.as_deref()
    }
}

impl UtcpClient {
    /// Build a client and register the configured manuals
    ///
    /// Startup manuals that fail discovery are logged, not fatal.
    pub async fn create(
        root_dir: Option<PathBuf>,
        config: UtcpClientConfig,
        registry: Arc<PluginRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        for template in &config.manual_call_templates {
            registry.validate_call_template(template).await?;
        }

        let client = Self {
            repository: config.tool_repository.build(),
            search_strategy: config.tool_search_strategy.build(),
            post_processors: config.post_processing.iter().map(|p| p.build()).collect(),
            substitutor: config.variable_substitutor(root_dir.as_deref()),
            root_dir,
            config,
            registry,
            registering: Mutex::new(HashSet::new()),
        };

        if !client.config.manual_call_templates.is_empty() {
            let templates = client.config.manual_call_templates.clone();
            let results = client.register_manuals(templates).await;
            let failed = results.iter().filter(|r| !r.success).count();
            for result in results.iter().filter(|r| !r.success) {
                warn!(
                    manual = ?result.manual_call_template.name,
                    errors = ?result.errors,
                    "Startup manual registration failed"
                );
            }
            info!(manuals = results.len(), failed, "Registered startup manuals");
        }

        Ok(client)
    }

    /// Build a client over a fresh registry holding the built-in protocols
    pub async fn with_default_plugins(
        root_dir: Option<PathBuf>,
        config: UtcpClientConfig,
    ) -> Result<Self> {
        let registry = Arc::new(PluginRegistry::new());
        utcp_protocols::register_default_plugins(&registry).await;
        Self::create(root_dir, config, registry).await
    }

    pub fn config(&self) -> &UtcpClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    async fn protocol_for(&self, template: &CallTemplate) -> Result<Arc<dyn CommunicationProtocol>> {
        self.registry
            .get_comm_protocol(template.call_template_type())
            .await
            .ok_or_else(|| Error::ProtocolNotRegistered {
                call_template_type: template.call_template_type().to_string(),
            })
    }

    /// Substitute variables under `namespace` and re-validate
    async fn substitute_call_template(
        &self,
        template: &CallTemplate,
        namespace: &str,
    ) -> Result<CallTemplate> {
        let substituted = self
            .substitutor
            .substitute(&template.to_value()?, Some(namespace))
            .await?;
        let substituted = CallTemplate::from_value(substituted)?;
        self.registry.validate_call_template(&substituted).await?;
        Ok(substituted)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Discover a manual's tools and store them under `manual.tool` names
    ///
    /// Fails for duplicate names, missing variables and unknown template
    /// types. Discovery failures come back with `success == false`.
    pub async fn register_manual(&self, manual_call_template: CallTemplate) -> Result<RegisterManualResult> {
        let name = match manual_call_template.name.as_deref() {
            Some(name) if !name.is_empty() => sanitize_manual_name(name),
            _ => uuid::Uuid::new_v4().simple().to_string(),
        };
        let template = manual_call_template.with_name(name.clone());

        {
            let mut registering = self.registering.lock().await;
            if registering.contains(&name)
                || self.repository.get_manual_call_template(&name).await?.is_some()
            {
                return Err(Error::DuplicateManual { name });
            }
            registering.insert(name.clone());
        }

        let result = self.register_reserved(&name, &template).await;
        self.registering.lock().await.remove(&name);
        result
    }

    async fn register_reserved(&self, name: &str, template: &CallTemplate) -> Result<RegisterManualResult> {
        let template = self.substitute_call_template(template, name).await?;
        let protocol = self.protocol_for(&template).await?;
        info!(manual = %name, call_template_type = %template.call_template_type(), "Registering manual");

        let mut result = match protocol.register_manual(self, &template).await {
            Ok(result) => result,
            Err(e) => {
                warn!(manual = %name, error = %e, "Manual discovery raised an error");
                return Ok(RegisterManualResult::failure(template, vec![e.to_string()]));
            }
        };
        result.manual_call_template = template.clone();

        if !result.success {
            warn!(manual = %name, errors = ?result.errors, "Manual registration failed");
            return Ok(result);
        }

        for tool in &mut result.manual.tools {
            tool.namespace_under(name);
        }
        self.repository
            .save_manual(template, result.manual.clone())
            .await?;

        info!(manual = %name, tools = result.manual.tools.len(), "Manual registered");
        Ok(result)
    }

    /// Register several manuals concurrently; each settles on its own
    pub async fn register_manuals(&self, manual_call_templates: Vec<CallTemplate>) -> Vec<RegisterManualResult> {
        let registrations = manual_call_templates.into_iter().map(|template| async move {
            match self.register_manual(template.clone()).await {
                Ok(result) => result,
                Err(e) => RegisterManualResult::failure(template, vec![e.to_string()]),
            }
        });
        join_all(registrations).await
    }

    /// Release a manual and drop its tools; returns false if it was not registered
    pub async fn deregister_manual(&self, manual_name: &str) -> Result<bool> {
        let Some(template) = self.repository.get_manual_call_template(manual_name).await? else {
            debug!(manual = %manual_name, "Deregister of unknown manual");
            return Ok(false);
        };

        match self.protocol_for(&template).await {
            Ok(protocol) => {
                if let Err(e) = protocol.deregister_manual(self, &template).await {
                    warn!(manual = %manual_name, error = %e, "Protocol cleanup failed, removing manual anyway");
                }
            }
            Err(e) => warn!(manual = %manual_name, error = %e, "No protocol for manual cleanup"),
        }

        let removed = self.repository.remove_manual(manual_name).await?;
        info!(manual = %manual_name, removed, "Manual deregistered");
        Ok(removed)
    }

    // =========================================================================
    // Invocation
    // =========================================================================

    /// Resolve a tool, its manual template and its substituted call template
    async fn prepare_call(&self, tool_name: &str) -> Result<(Tool, CallTemplate, CallTemplate)> {
        let not_found = || Error::ToolNotFound {
            name: tool_name.to_string(),
        };
        let manual_name = manual_name_of(tool_name).ok_or_else(not_found)?;
        let tool = self.repository.get_tool(tool_name).await?.ok_or_else(not_found)?;
        let manual_call_template = self
            .repository
            .get_manual_call_template(manual_name)
            .await?
            .ok_or_else(|| Error::ManualNotFound {
                name: manual_name.to_string(),
            })?;
        let tool_call_template = self
            .substitute_call_template(&tool.tool_call_template, manual_name)
            .await?;
        Ok((tool, manual_call_template, tool_call_template))
    }

    /// Call a tool and post-process its result
    pub async fn call_tool(&self, tool_name: &str, args: Map<String, Value>) -> Result<Value> {
        let (tool, manual_call_template, tool_call_template) = self.prepare_call(tool_name).await?;
        let protocol = self.protocol_for(&tool_call_template).await?;

        debug!(tool = %tool_name, protocol = protocol.protocol_name(), "Calling tool");
        let result = protocol
            .call_tool(self, tool_name, &args, &tool_call_template)
            .await?;

        Ok(apply_post_processors(
            &self.post_processors,
            &tool,
            &manual_call_template,
            result,
        ))
    }

    /// Call a tool as a stream, post-processing each chunk independently
    pub async fn call_tool_streaming(
        &self,
        tool_name: &str,
        args: Map<String, Value>,
    ) -> Result<ToolResultStream> {
        let (tool, manual_call_template, tool_call_template) = self.prepare_call(tool_name).await?;
        let protocol = self.protocol_for(&tool_call_template).await?;

        debug!(tool = %tool_name, protocol = protocol.protocol_name(), "Streaming tool");
        let stream = protocol
            .call_tool_streaming(self, tool_name, &args, &tool_call_template)
            .await?;

        let post_processors = self.post_processors.clone();
        Ok(stream
            .map(move |chunk| {
                chunk.map(|value| {
                    apply_post_processors(&post_processors, &tool, &manual_call_template, value)
                })
            })
            .boxed())
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Rank tools against a free-text query
    pub async fn search_tools(
        &self,
        query: &str,
        limit: usize,
        any_of_tags_required: Option<&[String]>,
    ) -> Result<Vec<Tool>> {
        self.search_strategy
            .search_tools(self.repository.as_ref(), query, limit, any_of_tags_required)
            .await
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.repository.get_tools().await
    }

    pub async fn get_tool(&self, tool_name: &str) -> Result<Option<Tool>> {
        self.repository.get_tool(tool_name).await
    }

    pub async fn get_manual(&self, manual_name: &str) -> Result<Option<UtcpManual>> {
        self.repository.get_manual(manual_name).await
    }

    // =========================================================================
    // Required variables
    // =========================================================================

    /// Variables a manual and its discovered tools reference, fully qualified
    ///
    /// Discovery runs only when the manual's own variables resolve; it does
    /// not register anything.
    pub async fn get_required_variables_for_manual_and_tools(
        &self,
        manual_call_template: &CallTemplate,
    ) -> Result<Vec<String>> {
        let name = match manual_call_template.name.as_deref() {
            Some(name) if !name.is_empty() => sanitize_manual_name(name),
            _ => {
                return Err(Error::validation(
                    "name",
                    "manual name is required to namespace variables",
                ))
            }
        };
        let template = manual_call_template.clone().with_name(name.clone());

        let mut required =
            VariableSubstitutor::find_required_variables(&template.to_value()?, Some(&name))?;

        let substituted = match self.substitute_call_template(&template, &name).await {
            Ok(substituted) => substituted,
            Err(e) => {
                debug!(manual = %name, error = %e, "Skipping tool discovery for required variables");
                return Ok(required);
            }
        };
        let protocol = self.protocol_for(&substituted).await?;
        let result = protocol.register_manual(self, &substituted).await?;
        if let Err(e) = protocol.deregister_manual(self, &substituted).await {
            debug!(manual = %name, error = %e, "Cleanup after variable discovery failed");
        }

        for tool in &result.manual.tools {
            for variable in VariableSubstitutor::find_required_variables(
                &tool.tool_call_template.to_value()?,
                Some(&name),
            )? {
                if !required.contains(&variable) {
                    required.push(variable);
                }
            }
        }
        Ok(required)
    }

    /// Variables a registered tool's call template references, fully qualified
    pub async fn get_required_variables_for_registered_tool(&self, tool_name: &str) -> Result<Vec<String>> {
        let tool = self
            .repository
            .get_tool(tool_name)
            .await?
            .ok_or_else(|| Error::ToolNotFound {
                name: tool_name.to_string(),
            })?;
        let manual_name = manual_name_of(tool_name).ok_or_else(|| Error::ToolNotFound {
            name: tool_name.to_string(),
        })?;
        VariableSubstitutor::find_required_variables(&tool.tool_call_template.to_value()?, Some(manual_name))
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Close every distinct protocol instance concurrently
    pub async fn close(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let protocols: Vec<_> = self
            .registry
            .get_comm_protocols()
            .await
            .into_values()
            .filter(|p| seen.insert(Arc::as_ptr(p) as *const () as usize))
            .collect();

        let results = join_all(protocols.iter().map(|p| async move {
            (p.protocol_name().to_string(), p.close().await)
        }))
        .await;

        for (protocol, result) in results {
            if let Err(e) = result {
                warn!(protocol = %protocol, error = %e, "Protocol close failed");
            }
        }
        info!(protocols = protocols.len(), "Client closed");
        Ok(())
    }
}
