//! Variable substitution
//!
//! TigerStyle: Resolve everything first, then rewrite. Either every token in
//! the value resolves or the whole substitution fails.
//!
//! Tokens are `${NAME}` or `$NAME`. Each token is looked up first under its
//! namespaced key (`NAMESPACE__NAME`, with underscores in the namespace
//! doubled) and then under the bare key. For each key the sources are tried
//! in order: explicit variables, then every loader, then the process
//! environment.

use crate::error::{Error, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Separator between namespace and variable name
pub const NAMESPACE_SEPARATOR: &str = "__";

/// Maximum namespace length in bytes
pub const NAMESPACE_LENGTH_BYTES_MAX: usize = 256;

static VARIABLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("variable pattern is a valid regex")
});

static NAMESPACE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("namespace pattern is a valid regex"));

// Shell workflow step outputs are resolved by the shell, not here.
static STEP_OUTPUT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^CMD_[0-9]+_OUTPUT$").expect("step output pattern is a valid regex"));

// =============================================================================
// Loaders
// =============================================================================

/// External source of variables
#[async_trait]
pub trait VariableLoader: Send + Sync {
    /// Look up a single key; `Ok(None)` when the source does not define it
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

/// Reads a dotenv-style file on every lookup
#[derive(Debug, Clone)]
pub struct DotEnvVariableLoader {
    path: PathBuf,
}

impl DotEnvVariableLoader {
    /// Create a loader for the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the dotenv file
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl VariableLoader for DotEnvVariableLoader {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "dotenv file missing");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        for item in dotenvy::from_read_iter(content.as_bytes()) {
            let (name, value) = item.map_err(|e| {
                Error::validation(
                    format!("dotenv:{}", self.path.display()),
                    e.to_string(),
                )
            })?;
            if name == key {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

// =============================================================================
// Namespaces
// =============================================================================

/// Fail fast on namespaces with characters outside `[A-Za-z0-9_]`
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.len() > NAMESPACE_LENGTH_BYTES_MAX || !NAMESPACE_PATTERN.is_match(namespace) {
        return Err(Error::InvalidNamespace {
            namespace: namespace.to_string(),
        });
    }
    Ok(())
}

/// Fully-qualified key for a variable inside a namespace
pub fn namespaced_variable_name(namespace: &str, name: &str) -> String {
    format!(
        "{}{}{}",
        namespace.replace('_', "__"),
        NAMESPACE_SEPARATOR,
        name
    )
}

fn token_name<'a>(caps: &'a Captures<'_>) -> Option<&'a str> {
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str())
        .filter(|name| !STEP_OUTPUT_PATTERN.is_match(name))
}

fn collect_names(value: &Value, names: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            for caps in VARIABLE_PATTERN.captures_iter(s) {
                if let Some(name) = token_name(&caps) {
                    names.insert(name.to_string());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_names(item, names)),
        Value::Object(map) => map.values().for_each(|item| collect_names(item, names)),
        _ => {}
    }
}

fn rewrite(value: &Value, resolved: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => {
            let replaced = VARIABLE_PATTERN.replace_all(s, |caps: &Captures<'_>| {
                match token_name(caps).and_then(|name| resolved.get(name)) {
                    Some(v) => v.clone(),
                    None => caps[0].to_string(),
                }
            });
            Value::String(replaced.into_owned())
        }
        Value::Array(items) => Value::Array(items.iter().map(|i| rewrite(i, resolved)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), rewrite(v, resolved)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// =============================================================================
// Substitutor
// =============================================================================

/// Layered variable resolver
#[derive(Clone, Default)]
pub struct VariableSubstitutor {
    variables: HashMap<String, String>,
    loaders: Vec<Arc<dyn VariableLoader>>,
}

impl std::fmt::Debug for VariableSubstitutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableSubstitutor")
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("loaders", &self.loaders.len())
            .finish()
    }
}

impl VariableSubstitutor {
    /// Create a substitutor over explicit variables and loaders
    pub fn new(variables: HashMap<String, String>, loaders: Vec<Arc<dyn VariableLoader>>) -> Self {
        Self { variables, loaders }
    }

    /// Add a loader after the existing ones
    pub fn with_loader(mut self, loader: Arc<dyn VariableLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// Replace every token in every string leaf of `value`
    pub async fn substitute(&self, value: &Value, namespace: Option<&str>) -> Result<Value> {
        if let Some(ns) = namespace {
            validate_namespace(ns)?;
        }

        let mut names = BTreeSet::new();
        collect_names(value, &mut names);
        if names.is_empty() {
            return Ok(value.clone());
        }

        let mut resolved = HashMap::with_capacity(names.len());
        for name in names {
            let found = self.resolve(&name, namespace).await?;
            resolved.insert(name, found);
        }

        Ok(rewrite(value, &resolved))
    }

    /// Fully-qualified names of every token in `value`, deduplicated
    pub fn find_required_variables(value: &Value, namespace: Option<&str>) -> Result<Vec<String>> {
        if let Some(ns) = namespace {
            validate_namespace(ns)?;
        }

        let mut names = BTreeSet::new();
        collect_names(value, &mut names);

        Ok(names
            .into_iter()
            .map(|name| match namespace {
                Some(ns) => namespaced_variable_name(ns, &name),
                None => name,
            })
            .collect())
    }

    async fn resolve(&self, name: &str, namespace: Option<&str>) -> Result<String> {
        if let Some(ns) = namespace {
            if let Some(value) = self.lookup(&namespaced_variable_name(ns, name)).await? {
                return Ok(value);
            }
        }
        if let Some(value) = self.lookup(name).await? {
            return Ok(value);
        }
        Err(Error::VariableNotFound {
            name: name.to_string(),
        })
    }

    async fn lookup(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.variables.get(key) {
            return Ok(Some(value.clone()));
        }
        for loader in &self.loaders {
            if let Some(value) = loader.get(key).await? {
                return Ok(Some(value));
            }
        }
        Ok(std::env::var(key).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn dotenv_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_substitute_nested_structure() {
        let substitutor = VariableSubstitutor::new(vars(&[("HOST", "api.example.com"), ("KEY", "k1")]), vec![]);
        let value = json!({
            "url": "https://${HOST}/v1",
            "headers": {"X-Key": "$KEY"},
            "list": ["${HOST}", 3, true, null],
        });

        let out = substitutor.substitute(&value, None).await.unwrap();
        assert_eq!(out["url"], "https://api.example.com/v1");
        assert_eq!(out["headers"]["X-Key"], "k1");
        assert_eq!(out["list"], json!(["api.example.com", 3, true, null]));
    }

    #[tokio::test]
    async fn test_substitute_missing_variable_aborts() {
        let substitutor = VariableSubstitutor::new(vars(&[("A", "1")]), vec![]);
        let value = json!({"a": "${A}", "b": "${UTCP_TEST_SURELY_UNDEFINED_VAR}"});

        let err = substitutor.substitute(&value, None).await.unwrap_err();
        match err {
            Error::VariableNotFound { name } => assert_eq!(name, "UTCP_TEST_SURELY_UNDEFINED_VAR"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_namespace_fails_before_lookup() {
        let substitutor = VariableSubstitutor::default();
        let result = substitutor.substitute(&json!("no tokens"), Some("bad-ns")).await;
        assert!(matches!(result, Err(Error::InvalidNamespace { .. })));
    }

    #[tokio::test]
    async fn test_step_output_references_are_left_alone() {
        let substitutor = VariableSubstitutor::default();
        let value = json!("echo $CMD_0_OUTPUT and ${CMD_12_OUTPUT}");
        let out = substitutor.substitute(&value, Some("m")).await.unwrap();
        assert_eq!(out, value);
    }

    #[tokio::test]
    #[serial]
    async fn test_variable_precedence() {
        let env_key = "UTCP_PRECEDENCE_X";
        let file = dotenv_file(&format!("{}=file\n", env_key));
        let loader: Arc<dyn VariableLoader> = Arc::new(DotEnvVariableLoader::new(file.path()));
        std::env::set_var(env_key, "env");

        let token = json!(format!("${{{}}}", env_key));
        let namespaced = namespaced_variable_name("NS", env_key);

        let all = VariableSubstitutor::new(vars(&[(namespaced.as_str(), "config")]), vec![loader.clone()]);
        assert_eq!(all.substitute(&token, Some("NS")).await.unwrap(), "config");

        let file_and_env = VariableSubstitutor::new(HashMap::new(), vec![loader]);
        assert_eq!(file_and_env.substitute(&token, Some("NS")).await.unwrap(), "file");

        let env_only = VariableSubstitutor::default();
        assert_eq!(env_only.substitute(&token, Some("NS")).await.unwrap(), "env");

        std::env::remove_var(env_key);
        let err = env_only.substitute(&token, Some("NS")).await.unwrap_err();
        assert!(matches!(err, Error::VariableNotFound { name } if name == env_key));
    }

    #[tokio::test]
    async fn test_namespaced_key_beats_bare_key() {
        let substitutor = VariableSubstitutor::new(
            vars(&[("my__tool__TOKEN", "scoped"), ("TOKEN", "global")]),
            vec![],
        );
        let out = substitutor.substitute(&json!("$TOKEN"), Some("my_tool")).await.unwrap();
        assert_eq!(out, "scoped");

        let out = substitutor.substitute(&json!("$TOKEN"), Some("other")).await.unwrap();
        assert_eq!(out, "global");
    }

    #[tokio::test]
    async fn test_dotenv_loader_missing_file() {
        let loader = DotEnvVariableLoader::new("/nonexistent/utcp/.env");
        assert_eq!(loader.get("ANY").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dotenv_loader_parses_quotes_and_comments() {
        let file = dotenv_file("# comment\nexport QUOTED=\"hello world\"\nPLAIN=value\n");
        let loader = DotEnvVariableLoader::new(file.path());

        assert_eq!(loader.get("QUOTED").await.unwrap().as_deref(), Some("hello world"));
        assert_eq!(loader.get("PLAIN").await.unwrap().as_deref(), Some("value"));
        assert_eq!(loader.get("MISSING").await.unwrap(), None);
    }

    #[test]
    fn test_find_required_variables() {
        let value = json!({
            "url": "https://${HOST}/x",
            "auth": {"api_key": "$KEY"},
            "again": "${HOST}",
            "step": "$CMD_1_OUTPUT"
        });

        let bare = VariableSubstitutor::find_required_variables(&value, None).unwrap();
        assert_eq!(bare, vec!["HOST".to_string(), "KEY".to_string()]);

        let scoped = VariableSubstitutor::find_required_variables(&value, Some("my_api")).unwrap();
        assert_eq!(
            scoped,
            vec!["my__api__HOST".to_string(), "my__api__KEY".to_string()]
        );
    }

    #[test]
    fn test_validate_namespace() {
        assert!(validate_namespace("weather_api_2").is_ok());
        assert!(validate_namespace("weather-api").is_err());
        assert!(validate_namespace("").is_err());
    }
}
