use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {task} depends on {dependency} which is not completed")]
    DependencyNotCompleted { task: String, dependency: String },

    #[error("Workflow run not found: {0}")]
    RunNotFound(String),

    #[error("Workflow template not found: {0}")]
    TemplateNotFound(String),

    #[error("Workflow template already registered: {0}")]
    TemplateExists(String),

    #[error("Template {template} has a dependency cycle: {detail}")]
    TemplateCycle { template: String, detail: String },

    #[error("Step {step} in template {template} depends on unknown step {dependency}")]
    UnknownStepDependency {
        template: String,
        step: String,
        dependency: String,
    },

    #[error("No worker registered for role: {0}")]
    RoleUnavailable(String),

    #[error("Worker {role} failed: {cause}")]
    WorkerFailure { role: String, cause: String },

    #[error("Step {step} in run {run_id} failed: {cause}")]
    StepFailed {
        run_id: String,
        step: String,
        cause: String,
    },

    #[error("Workflow run {run_id} failed: {cause}")]
    RunFailed { run_id: String, cause: String },

    #[error("Consensus request {request_id} has no participants")]
    EmptyConsensus { request_id: String },

    #[error("Invalid rule pattern: {0}")]
    InvalidRulePattern(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
