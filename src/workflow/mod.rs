//! Workflow templates and the engine that runs them.

pub mod engine;
pub mod template;

pub use engine::{RunId, RunPhase, RunStatus, StepState, StepStatus, WorkflowEngine};
pub use template::{
    ExhaustionPolicy, RetryPolicy, TemplateRegistry, WorkflowStep, WorkflowTemplate,
};
