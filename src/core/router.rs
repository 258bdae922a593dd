//! Routing of classified tasks to worker roles and workflow templates.
//!
//! Routing is a total function: every (score, task) pair produces a
//! non-empty route. Task-type keyword overrides are consulted first, then a
//! fixed complexity-level table. The override table is data, not code, so
//! hosts can swap routing policy without touching the router.

use serde::{Deserialize, Serialize};

use crate::core::classifier::{ComplexityLevel, ComplexityScore};
use crate::core::task::Task;

/// Identity of a specialized worker.
///
/// Roles are the addresses on the message bus; workers declare the role
/// they serve when they register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerRole {
    Designer,
    Planner,
    Implementer,
    Executor,
    Reviewer,
    UiSpecialist,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Designer => "designer",
            WorkerRole::Planner => "planner",
            WorkerRole::Implementer => "implementer",
            WorkerRole::Executor => "executor",
            WorkerRole::Reviewer => "reviewer",
            WorkerRole::UiSpecialist => "ui-specialist",
        }
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The worker roles and workflow template chosen for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Ordered, non-empty list of worker roles.
    pub roles: Vec<WorkerRole>,
    /// Name of the workflow template to run.
    pub template: String,
}

/// A task-type keyword override.
///
/// If any keyword appears in the task type, the override's route wins
/// regardless of the complexity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteOverride {
    pub keywords: Vec<String>,
    pub roles: Vec<WorkerRole>,
    pub template: String,
}

/// Maps complexity scores and task types to routes.
#[derive(Debug, Clone)]
pub struct Router {
    overrides: Vec<RouteOverride>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a router with the standard override table.
    ///
    /// Design work always goes to the full design crew and the consensus
    /// template; audits go to a lone reviewer; execution requests go
    /// straight to an executor.
    pub fn new() -> Self {
        Self {
            overrides: vec![
                RouteOverride {
                    keywords: vec!["design".to_string(), "blueprint".to_string()],
                    roles: vec![
                        WorkerRole::Designer,
                        WorkerRole::Planner,
                        WorkerRole::UiSpecialist,
                    ],
                    template: "design-consensus".to_string(),
                },
                RouteOverride {
                    keywords: vec!["audit".to_string(), "review".to_string()],
                    roles: vec![WorkerRole::Reviewer],
                    template: "review-only".to_string(),
                },
                RouteOverride {
                    keywords: vec!["execute".to_string(), "run".to_string()],
                    roles: vec![WorkerRole::Executor],
                    template: "execute-only".to_string(),
                },
            ],
        }
    }

    /// Create a router with a caller-supplied override table.
    pub fn with_overrides(overrides: Vec<RouteOverride>) -> Self {
        Self { overrides }
    }

    /// Choose a route for a classified task.
    ///
    /// Total: always returns a non-empty role list. Keyword overrides are
    /// checked in table order, then the complexity level decides.
    pub fn route(&self, score: &ComplexityScore, task: &Task) -> Route {
        let task_type = task.task_type.to_lowercase();
        for rule in &self.overrides {
            if rule.keywords.iter().any(|k| task_type.contains(k.as_str())) {
                return Route {
                    roles: rule.roles.clone(),
                    template: rule.template.clone(),
                };
            }
        }

        match score.level {
            ComplexityLevel::Simple => Route {
                roles: vec![WorkerRole::Implementer, WorkerRole::Executor],
                template: "direct-implementation".to_string(),
            },
            ComplexityLevel::Medium => Route {
                roles: vec![WorkerRole::Designer, WorkerRole::Implementer],
                template: "design-implement".to_string(),
            },
            ComplexityLevel::Complex => Route {
                roles: vec![
                    WorkerRole::Designer,
                    WorkerRole::Planner,
                    WorkerRole::UiSpecialist,
                ],
                template: "full-design".to_string(),
            },
        }
    }
}
