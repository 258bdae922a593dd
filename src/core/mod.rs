//! Core task model, complexity classification, and routing.

pub mod classifier;
pub mod router;
pub mod task;

pub use classifier::{ComplexityClassifier, ComplexityFactors, ComplexityLevel, ComplexityScore};
pub use router::{Route, RouteOverride, Router, WorkerRole};
pub use task::{Task, TaskId, TaskPriority, TaskStatus, TaskStore};
