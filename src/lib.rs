//! maestro: an agent orchestration core.
//!
//! Tasks are classified by complexity, routed to workflow templates, and
//! executed step by step against role-addressed workers on an in-process
//! message bus. Design artifacts go through quorum consensus, and a
//! learning engine mines review rules from observed code changes.
//!
//! The [`Orchestrator`](orchestrator::Orchestrator) facade wires the
//! pieces together; each component is also usable on its own.

pub mod bus;
pub mod config;
pub mod consensus;
pub mod core;
pub mod error;
pub mod knowledge;
pub mod learning;
pub mod log;
pub mod orchestrator;
pub mod worker;
pub mod workflow;

pub use bus::MessageBus;
pub use config::Config;
pub use consensus::{
    ConsensusCoordinator, ConsensusOutcome, ConsensusRequest, ConsensusResponse, MergePolicy,
    Suggestion, Vote,
};
pub use crate::core::classifier::{ComplexityClassifier, ComplexityLevel, ComplexityScore};
pub use crate::core::router::{Route, Router, WorkerRole};
pub use crate::core::task::{Task, TaskId, TaskPriority, TaskStatus, TaskStore};
pub use error::{Error, Result};
pub use knowledge::{ContextSnippet, FileKnowledge, InMemoryKnowledge, KnowledgeStore};
pub use learning::diff::CodeDiff;
pub use learning::engine::{Issue, LearnOutcome, LearningEngine};
pub use learning::rules::{Rule, RuleCategory, RuleStore};
pub use orchestrator::{Orchestrator, Submission};
pub use worker::{spawn_worker, Worker, WorkerRequest, WorkerResult};
pub use workflow::{
    RunId, RunPhase, RunStatus, StepState, WorkflowEngine, WorkflowStep, WorkflowTemplate,
};
