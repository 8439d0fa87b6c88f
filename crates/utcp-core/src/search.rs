//! Tool search
//!
//! TigerStyle: Deterministic scoring, stable ordering.

use crate::error::{Error, Result};
use crate::repository::ToolRepository;
use crate::tool::Tool;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Default number of results
pub const SEARCH_LIMIT_DEFAULT: usize = 10;

/// Default weight of a shared description word
pub const DESCRIPTION_WEIGHT_DEFAULT: f64 = 1.0;

/// Default weight of a tag match
pub const TAG_WEIGHT_DEFAULT: f64 = 3.0;

/// Description words this short never score
const DESCRIPTION_WORD_LENGTH_MIN: usize = 3;

static WORD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+").expect("word pattern is a valid regex"));

fn words(text: &str) -> HashSet<String> {
    WORD_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Ranks repository tools against a free-text query
#[async_trait]
pub trait ToolSearchStrategy: Send + Sync {
    /// Return at most `limit` tools (0 means no limit), best first
    async fn search_tools(
        &self,
        repository: &dyn ToolRepository,
        query: &str,
        limit: usize,
        any_of_tags_required: Option<&[String]>,
    ) -> Result<Vec<Tool>>;
}

/// Search strategy selection in client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool_search_strategy_type", rename_all = "snake_case")]
pub enum ToolSearchStrategyConfig {
    TagAndDescriptionWordMatch {
        #[serde(default = "default_description_weight")]
        description_weight: f64,
        #[serde(default = "default_tag_weight")]
        tag_weight: f64,
    },
}

fn default_description_weight() -> f64 {
    DESCRIPTION_WEIGHT_DEFAULT
}

fn default_tag_weight() -> f64 {
    TAG_WEIGHT_DEFAULT
}

impl Default for ToolSearchStrategyConfig {
    fn default() -> Self {
        Self::TagAndDescriptionWordMatch {
            description_weight: DESCRIPTION_WEIGHT_DEFAULT,
            tag_weight: TAG_WEIGHT_DEFAULT,
        }
    }
}

impl ToolSearchStrategyConfig {
    /// Reject weights that would make scores meaningless
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::TagAndDescriptionWordMatch {
                description_weight,
                tag_weight,
            } => {
                for (field, weight) in [
                    ("description_weight", description_weight),
                    ("tag_weight", tag_weight),
                ] {
                    if !weight.is_finite() || *weight < 0.0 {
                        return Err(Error::validation(
                            field,
                            format!("weight must be finite and non-negative, got {}", weight),
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    /// Build the configured strategy
    pub fn build(&self) -> Arc<dyn ToolSearchStrategy> {
        match self {
            Self::TagAndDescriptionWordMatch {
                description_weight,
                tag_weight,
            } => Arc::new(TagAndDescriptionWordMatchStrategy::new(
                *description_weight,
                *tag_weight,
            )),
        }
    }
}

// =============================================================================
// Tag and description word match
// =============================================================================

/// Scores tools by overlap between the query and their tags and description
#[derive(Debug, Clone)]
pub struct TagAndDescriptionWordMatchStrategy {
    description_weight: f64,
    tag_weight: f64,
}

impl Default for TagAndDescriptionWordMatchStrategy {
    fn default() -> Self {
        Self::new(DESCRIPTION_WEIGHT_DEFAULT, TAG_WEIGHT_DEFAULT)
    }
}

impl TagAndDescriptionWordMatchStrategy {
    pub fn new(description_weight: f64, tag_weight: f64) -> Self {
        assert!(description_weight >= 0.0, "description_weight must be >= 0");
        assert!(tag_weight >= 0.0, "tag_weight must be >= 0");
        Self {
            description_weight,
            tag_weight,
        }
    }

    /// Score one tool; `query` must already be lowercased and trimmed
    pub fn score(&self, tool: &Tool, query: &str, query_words: &HashSet<String>) -> f64 {
        let mut score = 0.0;

        for tag in &tool.tags {
            let tag = tag.to_lowercase();
            if !query.is_empty() && !tag.is_empty() && (tag.contains(query) || query.contains(&tag)) {
                score += self.tag_weight;
            }
            let shared = words(&tag).intersection(query_words).count();
            score += self.tag_weight * 0.5 * shared as f64;
        }

        let shared = words(&tool.description.to_lowercase())
            .iter()
            .filter(|w| w.chars().count() >= DESCRIPTION_WORD_LENGTH_MIN && query_words.contains(*w))
            .count();
        score += self.description_weight * shared as f64;

        score
    }
}

#[async_trait]
impl ToolSearchStrategy for TagAndDescriptionWordMatchStrategy {
    async fn search_tools(
        &self,
        repository: &dyn ToolRepository,
        query: &str,
        limit: usize,
        any_of_tags_required: Option<&[String]>,
    ) -> Result<Vec<Tool>> {
        let mut tools = repository.get_tools().await?;

        if let Some(required) = any_of_tags_required.filter(|r| !r.is_empty()) {
            let required: HashSet<String> = required.iter().map(|t| t.to_lowercase()).collect();
            tools.retain(|tool| tool.tags.iter().any(|t| required.contains(&t.to_lowercase())));
        }

        let query = query.trim().to_lowercase();
        let query_words = words(&query);

        let mut scored: Vec<(f64, Tool)> = tools
            .into_iter()
            .map(|tool| (self.score(&tool, &query, &query_words), tool))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        // sort_by is stable; equal scores keep repository order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let ranked = scored.into_iter().map(|(_, tool)| tool);
        Ok(if limit == 0 {
            ranked.collect()
        } else {
            ranked.take(limit).collect()
        })
    }
}
