//! Knowledge store collaborator contract.
//!
//! The knowledge store supplies contextual snippets for workflow steps and
//! gives learned rules a durable home. The real retrieval layer (vector
//! store, embeddings) lives outside this crate; the contract here is only
//! retrieve/persist/load. Two implementations ship with the core: an
//! in-memory store for tests and a flat JSON file store keyed by rule id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::router::WorkerRole;
use crate::error::Result;
use crate::learning::rules::{Rule, RuleId};
use crate::mlog_debug;

/// A contextual snippet returned by retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnippet {
    /// The snippet text.
    pub content: String,
    /// Where the snippet came from (file, document, prior run).
    pub source: String,
    /// Retrieval relevance in [0,1].
    pub relevance: f64,
}

/// External collaborator for contextual retrieval and rule persistence.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Retrieve snippets relevant to a query, optionally biased by role.
    async fn retrieve(
        &self,
        query: &str,
        role_hint: Option<WorkerRole>,
    ) -> Result<Vec<ContextSnippet>>;

    /// Durably persist one rule (insert or update by id).
    async fn persist_rule(&self, rule: &Rule) -> Result<()>;

    /// Load all persisted rules.
    async fn load_rules(&self) -> Result<Vec<Rule>>;
}

/// In-memory knowledge store for tests and ephemeral hosts.
#[derive(Default)]
pub struct InMemoryKnowledge {
    snippets: RwLock<Vec<(Option<WorkerRole>, ContextSnippet)>>,
    rules: RwLock<HashMap<RuleId, Rule>>,
}

impl InMemoryKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a snippet, optionally scoped to a role.
    pub async fn add_snippet(&self, role: Option<WorkerRole>, snippet: ContextSnippet) {
        self.snippets.write().await.push((role, snippet));
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledge {
    async fn retrieve(
        &self,
        query: &str,
        role_hint: Option<WorkerRole>,
    ) -> Result<Vec<ContextSnippet>> {
        let query = query.to_lowercase();
        let snippets = self.snippets.read().await;
        Ok(snippets
            .iter()
            .filter(|(role, snippet)| {
                let role_ok = match (role, role_hint) {
                    (Some(r), Some(hint)) => *r == hint,
                    _ => true,
                };
                role_ok && snippet.content.to_lowercase().contains(&query)
            })
            .map(|(_, snippet)| snippet.clone())
            .collect())
    }

    async fn persist_rule(&self, rule: &Rule) -> Result<()> {
        self.rules.write().await.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn load_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.rules.read().await.values().cloned().collect())
    }
}

/// File-backed knowledge store: rules persisted as a flat JSON map keyed by
/// rule id, durable across restarts. Retrieval is not this store's concern
/// and always returns nothing; hosts with a retrieval layer implement
/// `KnowledgeStore` themselves.
pub struct FileKnowledge {
    path: PathBuf,
    rules: RwLock<HashMap<RuleId, Rule>>,
}

impl FileKnowledge {
    /// Open a file-backed store, reading any existing rules file.
    pub async fn open(path: &Path) -> Result<Self> {
        let rules = if path.exists() {
            let raw = tokio::fs::read_to_string(path).await?;
            serde_json::from_str::<HashMap<RuleId, Rule>>(&raw)?
        } else {
            HashMap::new()
        };
        mlog_debug!(
            "FileKnowledge: opened {} with {} rules",
            path.display(),
            rules.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            rules: RwLock::new(rules),
        })
    }

    async fn flush(&self, rules: &HashMap<RuleId, Rule>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(rules)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

#[async_trait]
impl KnowledgeStore for FileKnowledge {
    async fn retrieve(
        &self,
        _query: &str,
        _role_hint: Option<WorkerRole>,
    ) -> Result<Vec<ContextSnippet>> {
        Ok(Vec::new())
    }

    async fn persist_rule(&self, rule: &Rule) -> Result<()> {
        let mut rules = self.rules.write().await;
        rules.insert(rule.id, rule.clone());
        self.flush(&rules).await
    }

    async fn load_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.rules.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::rules::RuleCategory;

    #[tokio::test]
    async fn test_in_memory_retrieve_by_query() {
        let store = InMemoryKnowledge::new();
        store
            .add_snippet(
                None,
                ContextSnippet {
                    content: "Checkout service uses idempotency keys".to_string(),
                    source: "design.md".to_string(),
                    relevance: 0.9,
                },
            )
            .await;

        let hits = store.retrieve("checkout", None).await.unwrap();
        assert_eq!(hits.len(), 1);

        let misses = store.retrieve("billing", None).await.unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_retrieve_role_scoping() {
        let store = InMemoryKnowledge::new();
        store
            .add_snippet(
                Some(WorkerRole::Designer),
                ContextSnippet {
                    content: "schema conventions".to_string(),
                    source: "conventions.md".to_string(),
                    relevance: 0.8,
                },
            )
            .await;

        let for_designer = store
            .retrieve("schema", Some(WorkerRole::Designer))
            .await
            .unwrap();
        assert_eq!(for_designer.len(), 1);

        let for_executor = store
            .retrieve("schema", Some(WorkerRole::Executor))
            .await
            .unwrap();
        assert!(for_executor.is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_rule_roundtrip() {
        let store = InMemoryKnowledge::new();
        let rule = Rule::new("pattern", "suggestion", RuleCategory::Style);
        store.persist_rule(&rule).await.unwrap();

        let loaded = store.load_rules().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].pattern, "pattern");
    }

    #[tokio::test]
    async fn test_file_knowledge_durable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");

        let store = FileKnowledge::open(&path).await.unwrap();
        let rule = Rule::new(r"\beval\(", "Avoid eval", RuleCategory::Security);
        store.persist_rule(&rule).await.unwrap();
        drop(store);

        let reopened = FileKnowledge::open(&path).await.unwrap();
        let loaded = reopened.load_rules().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, rule.id);
    }

    #[tokio::test]
    async fn test_file_knowledge_update_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");

        let store = FileKnowledge::open(&path).await.unwrap();
        let mut rule = Rule::new("p", "s", RuleCategory::Style);
        store.persist_rule(&rule).await.unwrap();

        rule.usage_count = 5;
        store.persist_rule(&rule).await.unwrap();

        let loaded = store.load_rules().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].usage_count, 5);
    }
}
