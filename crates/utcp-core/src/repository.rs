//! Tool repository
//!
//! TigerStyle: Serialized writers, snapshot readers.
//!
//! Writers queue on an async mutex (tokio's mutex is fair, so writes apply in
//! submission order) and publish a fresh immutable state. Readers clone the
//! current `Arc` and never block on a writer.

use crate::call_template::CallTemplate;
use crate::error::{Error, Result};
use crate::tool::{Tool, UtcpManual};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Storage for manuals and their tools
#[async_trait]
pub trait ToolRepository: Send + Sync {
    /// Install a manual, replacing any manual with the same name
    async fn save_manual(&self, manual_call_template: CallTemplate, manual: UtcpManual) -> Result<()>;

    /// Remove a manual and all of its tools
    async fn remove_manual(&self, manual_name: &str) -> Result<bool>;

    /// Remove a single tool and detach it from its manual
    async fn remove_tool(&self, tool_name: &str) -> Result<bool>;

    async fn get_tool(&self, tool_name: &str) -> Result<Option<Tool>>;

    async fn get_tools(&self) -> Result<Vec<Tool>>;

    async fn get_tools_by_manual(&self, manual_name: &str) -> Result<Option<Vec<Tool>>>;

    async fn get_manual(&self, manual_name: &str) -> Result<Option<UtcpManual>>;

    async fn get_manuals(&self) -> Result<Vec<UtcpManual>>;

    async fn get_manual_call_template(&self, manual_name: &str) -> Result<Option<CallTemplate>>;

    async fn get_manual_call_templates(&self) -> Result<Vec<CallTemplate>>;
}

/// Repository selection in client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool_repository_type", rename_all = "snake_case")]
pub enum ToolRepositoryConfig {
    #[default]
    InMemory,
}

impl ToolRepositoryConfig {
    /// Build the configured repository
    pub fn build(&self) -> Arc<dyn ToolRepository> {
        match self {
            Self::InMemory => Arc::new(InMemToolRepository::new()),
        }
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Debug, Clone, Default)]
struct RepositoryState {
    manual_call_templates: IndexMap<String, CallTemplate>,
    manuals: IndexMap<String, UtcpManual>,
    tools: IndexMap<String, Tool>,
}

impl RepositoryState {
    fn drop_manual(&mut self, manual_name: &str) -> bool {
        let Some(manual) = self.manuals.shift_remove(manual_name) else {
            return false;
        };
        for tool in &manual.tools {
            self.tools.shift_remove(&tool.name);
        }
        self.manual_call_templates.shift_remove(manual_name);
        true
    }
}

/// Process-local repository
pub struct InMemToolRepository {
    write_lock: Mutex<()>,
    state: RwLock<Arc<RepositoryState>>,
}

impl InMemToolRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            write_lock: Mutex::new(()),
            state: RwLock::new(Arc::new(RepositoryState::default())),
        }
    }

    fn snapshot(&self) -> Arc<RepositoryState> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, next: RepositoryState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    /// Apply `f` to a copy of the state under the write lock, then publish it
    async fn write<T>(&self, f: impl FnOnce(&mut RepositoryState) -> T) -> T {
        let _guard = self.write_lock.lock().await;
        let mut next = (*self.snapshot()).clone();
        let out = f(&mut next);
        self.publish(next);
        out
    }
}

impl Default for InMemToolRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRepository for InMemToolRepository {
    async fn save_manual(&self, manual_call_template: CallTemplate, manual: UtcpManual) -> Result<()> {
        let manual_name = manual_call_template
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::validation("name", "manual call template must be named"))?;

        let tool_count = manual.tools.len();
        self.write(|state| {
            let replaced = state.drop_manual(&manual_name);
            for tool in &manual.tools {
                state.tools.insert(tool.name.clone(), tool.clone());
            }
            state
                .manual_call_templates
                .insert(manual_name.clone(), manual_call_template);
            state.manuals.insert(manual_name.clone(), manual);
            debug!(manual = %manual_name, replaced, "Manual saved");
        })
        .await;

        info!(manual = %manual_name, tools = tool_count, "Manual stored");
        Ok(())
    }

    async fn remove_manual(&self, manual_name: &str) -> Result<bool> {
        Ok(self.write(|state| state.drop_manual(manual_name)).await)
    }

    async fn remove_tool(&self, tool_name: &str) -> Result<bool> {
        Ok(self
            .write(|state| {
                if state.tools.shift_remove(tool_name).is_none() {
                    return false;
                }
                for manual in state.manuals.values_mut() {
                    manual.tools.retain(|t| t.name != tool_name);
                }
                true
            })
            .await)
    }

    async fn get_tool(&self, tool_name: &str) -> Result<Option<Tool>> {
        Ok(self.snapshot().tools.get(tool_name).cloned())
    }

    async fn get_tools(&self) -> Result<Vec<Tool>> {
        Ok(self.snapshot().tools.values().cloned().collect())
    }

    async fn get_tools_by_manual(&self, manual_name: &str) -> Result<Option<Vec<Tool>>> {
        Ok(self
            .snapshot()
            .manuals
            .get(manual_name)
            .map(|m| m.tools.clone()))
    }

    async fn get_manual(&self, manual_name: &str) -> Result<Option<UtcpManual>> {
        Ok(self.snapshot().manuals.get(manual_name).cloned())
    }

    async fn get_manuals(&self) -> Result<Vec<UtcpManual>> {
        Ok(self.snapshot().manuals.values().cloned().collect())
    }

    async fn get_manual_call_template(&self, manual_name: &str) -> Result<Option<CallTemplate>> {
        Ok(self
            .snapshot()
            .manual_call_templates
            .get(manual_name)
            .cloned())
    }

    async fn get_manual_call_templates(&self) -> Result<Vec<CallTemplate>> {
        Ok(self
            .snapshot()
            .manual_call_templates
            .values()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(name: &str) -> CallTemplate {
        CallTemplate::new("text")
            .with_name(name)
            .with_field("file_path", format!("{}.json", name))
    }

    fn manual(tool_names: &[&str]) -> UtcpManual {
        UtcpManual::new(
            tool_names
                .iter()
                .map(|n| Tool::new(*n, CallTemplate::new("text")))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let repo = InMemToolRepository::new();
        repo.save_manual(template("a"), manual(&["a.one", "a.two"]))
            .await
            .unwrap();

        assert_eq!(repo.get_tools().await.unwrap().len(), 2);
        assert!(repo.get_tool("a.one").await.unwrap().is_some());
        assert_eq!(
            repo.get_tools_by_manual("a").await.unwrap().map(|t| t.len()),
            Some(2)
        );
        assert_eq!(
            repo.get_manual_call_template("a")
                .await
                .unwrap()
                .and_then(|t| t.name),
            Some("a".to_string())
        );
        assert!(repo.get_manual("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_tools_atomically() {
        let repo = InMemToolRepository::new();
        repo.save_manual(template("a"), manual(&["a.old"]))
            .await
            .unwrap();
        repo.save_manual(template("a"), manual(&["a.new"]))
            .await
            .unwrap();

        assert!(repo.get_tool("a.old").await.unwrap().is_none());
        assert!(repo.get_tool("a.new").await.unwrap().is_some());
        assert_eq!(repo.get_manuals().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_requires_name() {
        let repo = InMemToolRepository::new();
        let result = repo
            .save_manual(CallTemplate::new("text"), manual(&[]))
            .await;
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn test_remove_manual_cascades() {
        let repo = InMemToolRepository::new();
        repo.save_manual(template("a"), manual(&["a.one"]))
            .await
            .unwrap();
        repo.save_manual(template("b"), manual(&["b.one"]))
            .await
            .unwrap();

        assert!(repo.remove_manual("a").await.unwrap());
        assert!(!repo.remove_manual("a").await.unwrap());

        let names: Vec<_> = repo
            .get_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["b.one"]);
        assert!(repo.get_manual_call_template("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_tool_detaches_from_manual() {
        let repo = InMemToolRepository::new();
        repo.save_manual(template("a"), manual(&["a.one", "a.two"]))
            .await
            .unwrap();

        assert!(repo.remove_tool("a.one").await.unwrap());
        assert!(!repo.remove_tool("a.one").await.unwrap());

        let remaining = repo.get_tools_by_manual("a").await.unwrap().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "a.two");
    }

    #[tokio::test]
    async fn test_reads_are_copies() {
        let repo = InMemToolRepository::new();
        repo.save_manual(template("a"), manual(&["a.one"]))
            .await
            .unwrap();

        let mut tool = repo.get_tool("a.one").await.unwrap().unwrap();
        tool.description = "mutated".into();

        let fresh = repo.get_tool("a.one").await.unwrap().unwrap();
        assert_eq!(fresh.description, "");
    }

    #[tokio::test]
    async fn test_concurrent_saves_keep_index_consistent() {
        let repo = Arc::new(InMemToolRepository::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("m{}", i);
                let tool = format!("{}.t", name);
                repo.save_manual(template(&name), manual(&[tool.as_str()]))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(repo.get_manuals().await.unwrap().len(), 16);
        assert_eq!(repo.get_tools().await.unwrap().len(), 16);
    }
}
