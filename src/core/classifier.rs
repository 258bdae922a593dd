//! Complexity classification for submitted tasks.
//!
//! The classifier scores a task on a normalized 0-1 scale from five
//! independent signals. Scoring is pure and deterministic: the same task
//! content always produces the same score, and a malformed or missing
//! payload degrades to zero contribution rather than an error.

use serde::{Deserialize, Serialize};

use crate::core::task::Task;

/// Fixed signal weights: description, domain terms, task type, payload, dependencies.
const WEIGHTS: [f64; 5] = [0.1, 0.3, 0.3, 0.2, 0.1];

/// Word count at which the description factor saturates.
const DESCRIPTION_SATURATION: f64 = 50.0;

/// Matched-term count at which the domain factor saturates.
const DOMAIN_SATURATION: f64 = 10.0;

/// Fixed vocabulary of domain terms that indicate complexity.
const DOMAIN_TERMS: &[&str] = &[
    "architecture",
    "authentication",
    "authorization",
    "cache",
    "checkout",
    "concurrency",
    "database",
    "deployment",
    "distributed",
    "endpoint",
    "infrastructure",
    "integration",
    "microservice",
    "migration",
    "performance",
    "pipeline",
    "scalable",
    "schema",
    "security",
    "transaction",
];

/// Task-type verbs that indicate simple, mechanical work.
const SIMPLE_VERBS: &[&str] = &["rename", "format", "comment", "move", "delete", "lint"];

/// Task-type verbs for routine development work.
const MEDIUM_VERBS: &[&str] = &["implement", "fix", "refactor", "test", "update", "document"];

/// Task-type verbs for work requiring design and planning.
const COMPLEX_VERBS: &[&str] = &["design", "architect", "migrate", "optimize", "integrate", "orchestrate"];

/// Discrete complexity level derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Simple,
    Medium,
    Complex,
}

impl std::fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplexityLevel::Simple => write!(f, "simple"),
            ComplexityLevel::Medium => write!(f, "medium"),
            ComplexityLevel::Complex => write!(f, "complex"),
        }
    }
}

/// The named factor breakdown behind a score, kept for auditability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexityFactors {
    /// min(word_count / 50, 1)
    pub description_length: f64,
    /// min(matched_domain_terms / 10, 1)
    pub domain_terms: f64,
    /// Three-bucket verb lookup on the task type.
    pub task_type: f64,
    /// Serialized size and nesting depth of the payload.
    pub payload: f64,
    /// min(dependency_count / 5, 1)
    pub dependencies: f64,
}

/// A complexity score in [0,1] with its factor breakdown.
///
/// Immutable once computed for a given task snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexityScore {
    pub score: f64,
    pub level: ComplexityLevel,
    pub factors: ComplexityFactors,
}

/// Scores incoming tasks on a normalized 0-1 scale.
#[derive(Debug, Clone, Default)]
pub struct ComplexityClassifier;

impl ComplexityClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Compute the complexity score for a task.
    ///
    /// Pure and deterministic; no side effects and no failure mode. A task
    /// without a payload (or with a payload that does not serialize) simply
    /// contributes zero to the payload factor.
    pub fn classify(&self, task: &Task) -> ComplexityScore {
        let factors = ComplexityFactors {
            description_length: description_factor(&task.description),
            domain_terms: domain_factor(&task.description),
            task_type: task_type_factor(&task.task_type),
            payload: payload_factor(task.payload.as_ref()),
            dependencies: dependency_factor(task.depends_on.len()),
        };

        let raw = factors.description_length * WEIGHTS[0]
            + factors.domain_terms * WEIGHTS[1]
            + factors.task_type * WEIGHTS[2]
            + factors.payload * WEIGHTS[3]
            + factors.dependencies * WEIGHTS[4];
        let score = raw.clamp(0.0, 1.0);

        ComplexityScore {
            score,
            level: level_for(score),
            factors,
        }
    }
}

fn level_for(score: f64) -> ComplexityLevel {
    if score <= 0.3 {
        ComplexityLevel::Simple
    } else if score <= 0.7 {
        ComplexityLevel::Medium
    } else {
        ComplexityLevel::Complex
    }
}

fn description_factor(description: &str) -> f64 {
    let words = description.split_whitespace().count() as f64;
    (words / DESCRIPTION_SATURATION).min(1.0)
}

fn domain_factor(description: &str) -> f64 {
    let lower = description.to_lowercase();
    let matched = DOMAIN_TERMS.iter().filter(|term| lower.contains(*term)).count() as f64;
    (matched / DOMAIN_SATURATION).min(1.0)
}

fn task_type_factor(task_type: &str) -> f64 {
    let lower = task_type.to_lowercase();
    if SIMPLE_VERBS.iter().any(|v| lower.contains(v)) {
        0.2
    } else if COMPLEX_VERBS.iter().any(|v| lower.contains(v)) {
        0.8
    } else if MEDIUM_VERBS.iter().any(|v| lower.contains(v)) {
        0.5
    } else {
        0.5
    }
}

fn payload_factor(payload: Option<&serde_json::Value>) -> f64 {
    let Some(value) = payload else {
        return 0.0;
    };
    // Serialization of a Value cannot fail, but a failure would just mean
    // the payload contributes nothing.
    let size = serde_json::to_string(value).map(|s| s.len()).unwrap_or(0) as f64;
    let depth = structural_depth(value) as f64;
    ((size / 1000.0 + depth / 5.0) / 2.0).min(1.0)
}

/// Nesting depth of a JSON value: scalars are 0, containers are one more
/// than their deepest child.
fn structural_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Object(map) => {
            1 + map.values().map(structural_depth).max().unwrap_or(0)
        }
        serde_json::Value::Array(items) => {
            1 + items.iter().map(structural_depth).max().unwrap_or(0)
        }
        _ => 0,
    }
}

fn dependency_factor(count: usize) -> f64 {
    (count as f64 / 5.0).min(1.0)
}
