//! Task data model for the orchestration core.
//!
//! Tasks are the units of work submitted by external callers. Each task
//! tracks its type, payload, dependencies, priority, and lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a submitted task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Scheduling priority of a task.
///
/// Priority is carried through for callers; the core does not reorder
/// dispatch by priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Critical => write!(f, "critical"),
        }
    }
}

/// Task status in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task submitted but not yet picked up.
    Pending,
    /// Task is being worked on.
    InProgress,
    /// Task completed successfully.
    Completed,
    /// Task failed with an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Task was cancelled before completion.
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of work submitted to the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Free-text description of what the task should accomplish.
    pub description: String,
    /// Task-type tag used for routing (e.g. "rename", "design-architecture").
    pub task_type: String,
    /// Optional structured payload accompanying the task.
    pub payload: Option<serde_json::Value>,
    /// Tasks that must be completed before this one may start.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: TaskPriority,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: TaskStatus,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
    /// When the task was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task with the given description and type.
    pub fn new(description: &str, task_type: &str) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            description: description.to_string(),
            task_type: task_type.to_string(),
            payload: None,
            depends_on: Vec::new(),
            priority: TaskPriority::default(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a structured payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Declare dependencies on other tasks.
    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Transition the task to a new status, touching `updated_at`.
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed { .. } | TaskStatus::Cancelled
        )
    }
}

/// In-process table of submitted tasks.
///
/// The store is an explicit instance passed to whoever needs it; there is no
/// process-global task table. Terminal tasks whose result has been retrieved
/// move into an archive map so `get` keeps answering after retrieval.
#[derive(Debug, Default)]
pub struct TaskStore {
    active: HashMap<TaskId, Task>,
    archived: HashMap<TaskId, Task>,
}

impl TaskStore {
    /// Create an empty task store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a submitted task, returning its id.
    pub fn insert(&mut self, task: Task) -> TaskId {
        let id = task.id;
        self.active.insert(id, task);
        id
    }

    /// Look up a task by id, checking the archive as well.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.active.get(id).or_else(|| self.archived.get(id))
    }

    /// Number of non-archived tasks.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Transition a task to InProgress.
    ///
    /// Enforces the dependency invariant: every id in `depends_on` must
    /// reference a known task that has reached Completed.
    pub fn start(&mut self, id: &TaskId) -> Result<()> {
        let deps = self
            .active
            .get(id)
            .map(|t| t.depends_on.clone())
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

        for dep in &deps {
            let completed = self
                .get(dep)
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false);
            if !completed {
                return Err(Error::DependencyNotCompleted {
                    task: id.short(),
                    dependency: dep.short(),
                });
            }
        }

        if let Some(task) = self.active.get_mut(id) {
            task.set_status(TaskStatus::InProgress);
        }
        Ok(())
    }

    /// Update the status of a task.
    pub fn set_status(&mut self, id: &TaskId, status: TaskStatus) -> Result<()> {
        let task = self
            .active
            .get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        task.set_status(status);
        Ok(())
    }

    /// Retrieve a terminal task, moving it into the archive.
    ///
    /// Returns `None` if the task is not terminal yet.
    pub fn take_result(&mut self, id: &TaskId) -> Result<Option<Task>> {
        let terminal = self
            .active
            .get(id)
            .map(|t| t.is_terminal())
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

        if !terminal {
            return Ok(None);
        }

        let task = self.active.remove(id).expect("checked above");
        self.archived.insert(*id, task.clone());
        Ok(Some(task))
    }
}
