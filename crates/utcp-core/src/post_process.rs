//! Result post-processing
//!
//! TigerStyle: Pure transformations applied in configured order.

use crate::call_template::CallTemplate;
use crate::tool::Tool;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Default maximum string length for `limit_strings`
pub const STRING_LENGTH_CHARS_DEFAULT: usize = 10_000;

/// Transforms a tool result before it reaches the caller
pub trait ToolPostProcessor: Send + Sync {
    /// Short identifier for logs
    fn name(&self) -> &str;

    fn post_process(&self, tool: &Tool, manual_call_template: &CallTemplate, result: Value) -> Value;
}

/// Post-processor selection in client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool_post_processor_type", rename_all = "snake_case")]
pub enum PostProcessorConfig {
    FilterDict(FilterDictConfig),
    LimitStrings(LimitStringsConfig),
}

impl PostProcessorConfig {
    /// Build the configured post-processor
    pub fn build(&self) -> Arc<dyn ToolPostProcessor> {
        match self {
            Self::FilterDict(config) => Arc::new(FilterDictPostProcessor::new(config.clone())),
            Self::LimitStrings(config) => Arc::new(LimitStringsPostProcessor::new(config.clone())),
        }
    }
}

/// Which tools a post-processor applies to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_include_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_include_manuals: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_manuals: Option<Vec<String>>,
}

impl ToolSelector {
    /// Whether `tool` from `manual_call_template` is selected
    pub fn matches(&self, tool: &Tool, manual_call_template: &CallTemplate) -> bool {
        let contains = |list: &Option<Vec<String>>, item: &str| {
            list.as_ref().map(|l| l.iter().any(|x| x == item))
        };

        if contains(&self.exclude_tools, &tool.name) == Some(true) {
            return false;
        }
        if contains(&self.only_include_tools, &tool.name) == Some(false) {
            return false;
        }

        let manual_name = manual_call_template
            .name
            .as_deref()
            .or_else(|| tool.manual_name())
            .unwrap_or_default();
        if contains(&self.exclude_manuals, manual_name) == Some(true) {
            return false;
        }
        if contains(&self.only_include_manuals, manual_name) == Some(false) {
            return false;
        }
        true
    }
}

// =============================================================================
// filter_dict
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterDictConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_include_keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_keys: Option<Vec<String>>,
    #[serde(flatten)]
    pub selector: ToolSelector,
}

/// Keeps or drops object keys at every depth
#[derive(Debug, Clone)]
pub struct FilterDictPostProcessor {
    only_include_keys: Option<HashSet<String>>,
    exclude_keys: Option<HashSet<String>>,
    selector: ToolSelector,
}

impl FilterDictPostProcessor {
    pub fn new(config: FilterDictConfig) -> Self {
        Self {
            only_include_keys: config.only_include_keys.map(|k| k.into_iter().collect()),
            exclude_keys: config.exclude_keys.map(|k| k.into_iter().collect()),
            selector: config.selector,
        }
    }

    fn is_container(value: &Value) -> bool {
        matches!(value, Value::Object(_) | Value::Array(_))
    }

    fn is_empty_container(value: &Value) -> bool {
        match value {
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        }
    }

    fn only_include(keys: &HashSet<String>, value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    if keys.contains(&k) {
                        out.insert(k, Self::only_include(keys, v));
                    } else if Self::is_container(&v) {
                        // Keep the path to nested matches only
                        let nested = Self::only_include(keys, v);
                        if !Self::is_empty_container(&nested) {
                            out.insert(k, nested);
                        }
                    }
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .filter_map(|item| {
                        if Self::is_container(&item) {
                            let nested = Self::only_include(keys, item);
                            (!Self::is_empty_container(&nested)).then_some(nested)
                        } else {
                            Some(item)
                        }
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    fn exclude(keys: &HashSet<String>, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .filter(|(k, _)| !keys.contains(k))
                    .map(|(k, v)| (k, Self::exclude(keys, v)))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| Self::exclude(keys, v)).collect())
            }
            other => other,
        }
    }
}

impl ToolPostProcessor for FilterDictPostProcessor {
    fn name(&self) -> &str {
        "filter_dict"
    }

    fn post_process(&self, tool: &Tool, manual_call_template: &CallTemplate, result: Value) -> Value {
        if !self.selector.matches(tool, manual_call_template) {
            return result;
        }
        let mut result = result;
        if let Some(keys) = &self.only_include_keys {
            result = Self::only_include(keys, result);
        }
        if let Some(keys) = &self.exclude_keys {
            result = Self::exclude(keys, result);
        }
        result
    }
}

// =============================================================================
// limit_strings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitStringsConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(flatten)]
    pub selector: ToolSelector,
}

fn default_limit() -> usize {
    STRING_LENGTH_CHARS_DEFAULT
}

impl Default for LimitStringsConfig {
    fn default() -> Self {
        Self {
            limit: STRING_LENGTH_CHARS_DEFAULT,
            selector: ToolSelector::default(),
        }
    }
}

/// Truncates every string leaf to a maximum number of characters
#[derive(Debug, Clone)]
pub struct LimitStringsPostProcessor {
    config: LimitStringsConfig,
}

impl LimitStringsPostProcessor {
    pub fn new(config: LimitStringsConfig) -> Self {
        Self { config }
    }

    fn truncate(limit: usize, value: Value) -> Value {
        match value {
            Value::String(s) if s.chars().count() > limit => {
                Value::String(s.chars().take(limit).collect())
            }
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| Self::truncate(limit, v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::truncate(limit, v)))
                    .collect(),
            ),
            other => other,
        }
    }
}

impl ToolPostProcessor for LimitStringsPostProcessor {
    fn name(&self) -> &str {
        "limit_strings"
    }

    fn post_process(&self, tool: &Tool, manual_call_template: &CallTemplate, result: Value) -> Value {
        if !self.config.selector.matches(tool, manual_call_template) {
            return result;
        }
        Self::truncate(self.config.limit, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> Tool {
        Tool::new(name, CallTemplate::new("http"))
    }

    fn manual(name: &str) -> CallTemplate {
        CallTemplate::new("http").with_name(name)
    }

    #[test]
    fn test_filter_dict_only_include_nested() {
        let processor = FilterDictPostProcessor::new(FilterDictConfig {
            only_include_keys: Some(vec!["id".into(), "name".into()]),
            ..Default::default()
        });

        let result = json!({
            "id": 1,
            "secret": "x",
            "owner": {"name": "ann", "token": "t"},
            "items": [{"id": 2, "blob": "b"}, {"other": 1}, 7],
            "meta": {"trace": "z"}
        });

        let out = processor.post_process(&tool("m.t"), &manual("m"), result);
        assert_eq!(
            out,
            json!({
                "id": 1,
                "owner": {"name": "ann"},
                "items": [{"id": 2}, 7]
            })
        );
    }

    #[test]
    fn test_filter_dict_exclude_recursive() {
        let processor = FilterDictPostProcessor::new(FilterDictConfig {
            exclude_keys: Some(vec!["password".into()]),
            ..Default::default()
        });

        let out = processor.post_process(
            &tool("m.t"),
            &manual("m"),
            json!({"user": {"name": "a", "password": "p"}, "list": [{"password": 1, "k": 2}]}),
        );
        assert_eq!(out, json!({"user": {"name": "a"}, "list": [{"k": 2}]}));
    }

    #[test]
    fn test_limit_strings_counts_chars() {
        let processor = LimitStringsPostProcessor::new(LimitStringsConfig {
            limit: 3,
            ..Default::default()
        });

        let out = processor.post_process(
            &tool("m.t"),
            &manual("m"),
            json!({"a": "héllo", "b": ["abcdef", 12345], "c": "ok"}),
        );
        assert_eq!(out, json!({"a": "hél", "b": ["abc", 12345], "c": "ok"}));
    }

    #[test]
    fn test_selector_restricts_application() {
        let processor = LimitStringsPostProcessor::new(LimitStringsConfig {
            limit: 1,
            selector: ToolSelector {
                exclude_manuals: Some(vec!["skip".into()]),
                ..Default::default()
            },
        });

        let kept = processor.post_process(&tool("skip.t"), &manual("skip"), json!("long"));
        assert_eq!(kept, json!("long"));

        let cut = processor.post_process(&tool("m.t"), &manual("m"), json!("long"));
        assert_eq!(cut, json!("l"));

        let selector = ToolSelector {
            only_include_tools: Some(vec!["m.a".into()]),
            ..Default::default()
        };
        assert!(selector.matches(&tool("m.a"), &manual("m")));
        assert!(!selector.matches(&tool("m.b"), &manual("m")));
    }

    #[test]
    fn test_config_tagging() {
        let config: PostProcessorConfig = serde_json::from_value(json!({
            "tool_post_processor_type": "limit_strings",
            "limit": 5,
            "only_include_manuals": ["m"]
        }))
        .unwrap();

        match &config {
            PostProcessorConfig::LimitStrings(c) => {
                assert_eq!(c.limit, 5);
                assert_eq!(c.selector.only_include_manuals, Some(vec!["m".to_string()]));
            }
            other => panic!("unexpected config: {:?}", other),
        }
        assert_eq!(config.build().name(), "limit_strings");
    }
}
