//! Learned quality rules and their store.
//!
//! Rules are created by the learning engine from accepted corrections,
//! mutated only through usage accounting, and never silently deleted.
//! The store is an explicit instance (no process globals) guarded by a
//! read-many/write-one lock: promotion is append-mostly and usage
//! increments are commutative, so a single writer is enough.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::knowledge::KnowledgeStore;
use crate::mlog_debug;

/// Initial confidence assigned to a freshly mined rule.
pub const INITIAL_CONFIDENCE: f64 = 0.7;

/// Confidence ceiling for reinforced rules.
const CONFIDENCE_CAP: f64 = 0.95;

/// Reinforcement applied when an equivalent rule is mined again.
const CONFIDENCE_STEP: f64 = 0.05;

/// Unique identifier for a learned rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub Uuid);

impl RuleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category tag for a learned rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleCategory {
    Style,
    Security,
    Performance,
    BestPractice,
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleCategory::Style => write!(f, "style"),
            RuleCategory::Security => write!(f, "security"),
            RuleCategory::Performance => write!(f, "performance"),
            RuleCategory::BestPractice => write!(f, "best-practice"),
        }
    }
}

/// A learned, reusable pattern-plus-suggestion used during review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    /// Regex source matched against reviewed text. Treated as untrusted
    /// input: compiled under a size limit before promotion and at review.
    pub pattern: String,
    /// Human-readable suggestion shown on a match.
    pub suggestion: String,
    pub category: RuleCategory,
    pub confidence: f64,
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl Rule {
    pub fn new(pattern: &str, suggestion: &str, category: RuleCategory) -> Self {
        let now = Utc::now();
        Self {
            id: RuleId::new(),
            pattern: pattern.to_string(),
            suggestion: suggestion.to_string(),
            category,
            confidence: INITIAL_CONFIDENCE,
            usage_count: 1,
            created_at: now,
            last_used: now,
        }
    }
}

/// Outcome of merging a candidate rule into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new rule was created.
    Created(RuleId),
    /// An equivalent rule existed; its usage was reinforced.
    Reinforced(RuleId),
}

/// Process-wide rule table, flushed through to the knowledge store on write.
pub struct RuleStore {
    rules: RwLock<HashMap<RuleId, Rule>>,
    knowledge: Arc<dyn KnowledgeStore>,
}

impl RuleStore {
    /// Create an empty store backed by the given knowledge store.
    pub fn new(knowledge: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            knowledge,
        }
    }

    /// Load persisted rules from the knowledge store.
    pub async fn load(&self) -> Result<usize> {
        let loaded = self.knowledge.load_rules().await?;
        let count = loaded.len();
        let mut rules = self.rules.write().await;
        for rule in loaded {
            rules.insert(rule.id, rule);
        }
        mlog_debug!("RuleStore: loaded {} persisted rules", count);
        Ok(count)
    }

    /// Number of stored rules.
    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rules.read().await.is_empty()
    }

    /// Snapshot of all rules.
    pub async fn all(&self) -> Vec<Rule> {
        self.rules.read().await.values().cloned().collect()
    }

    /// Look up one rule.
    pub async fn get(&self, id: &RuleId) -> Option<Rule> {
        self.rules.read().await.get(id).cloned()
    }

    /// Merge a mined candidate into the store.
    ///
    /// A candidate whose pattern already exists reinforces the existing
    /// rule (usage +1, confidence nudged toward the cap) instead of
    /// creating a duplicate.
    pub async fn merge_candidate(&self, candidate: Rule) -> Result<MergeOutcome> {
        let mut rules = self.rules.write().await;

        let existing = rules
            .values_mut()
            .find(|r| r.pattern == candidate.pattern && r.category == candidate.category);

        let (outcome, snapshot) = match existing {
            Some(rule) => {
                rule.usage_count += 1;
                rule.confidence = (rule.confidence + CONFIDENCE_STEP).min(CONFIDENCE_CAP);
                rule.last_used = Utc::now();
                (MergeOutcome::Reinforced(rule.id), rule.clone())
            }
            None => {
                let id = candidate.id;
                rules.insert(id, candidate.clone());
                (MergeOutcome::Created(id), candidate)
            }
        };
        drop(rules);

        self.knowledge.persist_rule(&snapshot).await?;
        Ok(outcome)
    }

    /// Record that a rule matched during review.
    pub async fn record_match(&self, id: &RuleId) -> Result<()> {
        let snapshot = {
            let mut rules = self.rules.write().await;
            match rules.get_mut(id) {
                Some(rule) => {
                    rule.usage_count += 1;
                    rule.last_used = Utc::now();
                    Some(rule.clone())
                }
                None => None,
            }
        };

        if let Some(rule) = snapshot {
            self.knowledge.persist_rule(&rule).await?;
        }
        Ok(())
    }
}
