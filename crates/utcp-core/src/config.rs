//! Client configuration
//!
//! TigerStyle: Explicit defaults, validated before use.

use crate::call_template::CallTemplate;
use crate::error::{Error, Result};
use crate::post_process::PostProcessorConfig;
use crate::repository::ToolRepositoryConfig;
use crate::search::ToolSearchStrategyConfig;
use crate::variables::{DotEnvVariableLoader, VariableLoader, VariableSubstitutor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source of variables beyond the explicit map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variable_loader_type", rename_all = "snake_case")]
pub enum VariableLoaderConfig {
    /// dotenv-style file, relative paths resolved against the client root
    Dotenv { env_file_path: String },
}

impl VariableLoaderConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Dotenv { env_file_path } if env_file_path.trim().is_empty() => Err(
                Error::validation("load_variables_from.env_file_path", "cannot be empty"),
            ),
            Self::Dotenv { .. } => Ok(()),
        }
    }

    /// Build the loader, resolving relative paths against `root_dir`
    pub fn build(&self, root_dir: Option<&Path>) -> Arc<dyn VariableLoader> {
        match self {
            Self::Dotenv { env_file_path } => {
                let path = PathBuf::from(env_file_path);
                let path = match root_dir {
                    Some(root) if path.is_relative() => root.join(path),
                    _ => path,
                };
                Arc::new(DotEnvVariableLoader::new(path))
            }
        }
    }
}

/// UTCP client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UtcpClientConfig {
    /// Explicit variables, highest precedence
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Loaders consulted in order after `variables`
    #[serde(default)]
    pub load_variables_from: Vec<VariableLoaderConfig>,
    /// Manuals registered when the client is created
    #[serde(default)]
    pub manual_call_templates: Vec<CallTemplate>,
    #[serde(default)]
    pub tool_search_strategy: ToolSearchStrategyConfig,
    #[serde(default)]
    pub tool_repository: ToolRepositoryConfig,
    /// Applied to every tool result in order
    #[serde(default)]
    pub post_processing: Vec<PostProcessorConfig>,
}

impl UtcpClientConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration file, YAML for `.yaml`/`.yml`, JSON otherwise
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set an explicit variable
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Add a variable loader
    pub fn with_loader(mut self, loader: VariableLoaderConfig) -> Self {
        self.load_variables_from.push(loader);
        self
    }

    /// Add a manual to register at startup
    pub fn with_manual_call_template(mut self, template: CallTemplate) -> Self {
        self.manual_call_templates.push(template);
        self
    }

    /// Add a post-processor
    pub fn with_post_processor(mut self, post_processor: PostProcessorConfig) -> Self {
        self.post_processing.push(post_processor);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.tool_search_strategy.validate()?;
        for loader in &self.load_variables_from {
            loader.validate()?;
        }
        Ok(())
    }

    /// Substitutor over this configuration's variable sources
    pub fn variable_substitutor(&self, root_dir: Option<&Path>) -> VariableSubstitutor {
        VariableSubstitutor::new(
            self.variables.clone(),
            self.load_variables_from
                .iter()
                .map(|l| l.build(root_dir))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::TAG_WEIGHT_DEFAULT;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config: UtcpClientConfig = serde_json::from_value(json!({})).unwrap();
        assert!(config.variables.is_empty());
        assert!(config.manual_call_templates.is_empty());
        assert_eq!(config.tool_repository, ToolRepositoryConfig::InMemory);
        match config.tool_search_strategy {
            ToolSearchStrategyConfig::TagAndDescriptionWordMatch { tag_weight, .. } => {
                assert_eq!(tag_weight, TAG_WEIGHT_DEFAULT)
            }
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
variables:
  API_KEY: secret
load_variables_from:
  - variable_loader_type: dotenv
    env_file_path: .env
manual_call_templates:
  - call_template_type: text
    name: files
    file_path: tools.json
tool_search_strategy:
  tool_search_strategy_type: tag_and_description_word_match
  tag_weight: 2.0
post_processing:
  - tool_post_processor_type: filter_dict
    exclude_keys: [secret]
"#
        )
        .unwrap();

        let config = UtcpClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.variables.get("API_KEY").map(String::as_str), Some("secret"));
        assert_eq!(config.manual_call_templates.len(), 1);
        assert_eq!(config.manual_call_templates[0].call_template_type(), "text");
        assert_eq!(config.post_processing.len(), 1);
        assert_eq!(
            config.load_variables_from[0],
            VariableLoaderConfig::Dotenv {
                env_file_path: ".env".into()
            }
        );
    }

    #[test]
    fn test_config_from_json_file_validates() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"load_variables_from": [{{"variable_loader_type": "dotenv", "env_file_path": " "}}]}}"#
        )
        .unwrap();

        let result = UtcpClientConfig::from_file(file.path());
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn test_relative_dotenv_resolved_against_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vars.env"), "FROM_ROOT=yes\n").unwrap();

        let config = UtcpClientConfig::new().with_loader(VariableLoaderConfig::Dotenv {
            env_file_path: "vars.env".into(),
        });
        let substitutor = config.variable_substitutor(Some(dir.path()));

        let out = substitutor
            .substitute(&json!("${FROM_ROOT}"), None)
            .await
            .unwrap();
        assert_eq!(out, "yes");
    }
}
