//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Orchestrators with a full scripted worker set
//! - Consensus ballots
//! - Predefined tasks and code diffs

use std::sync::Arc;

use serde_json::json;

use maestro::consensus::{ConsensusResponse, Suggestion};
use maestro::knowledge::InMemoryKnowledge;
use maestro::learning::diff::CodeDiff;
use maestro::worker::ScriptedWorker;
use maestro::{Config, Orchestrator, Task, WorkerRole};

/// All six worker roles.
pub const ALL_ROLES: [WorkerRole; 6] = [
    WorkerRole::Designer,
    WorkerRole::Planner,
    WorkerRole::Implementer,
    WorkerRole::Executor,
    WorkerRole::Reviewer,
    WorkerRole::UiSpecialist,
];

/// Build an orchestrator with an in-memory knowledge store and a scripted
/// worker registered for every role, each answering success.
pub async fn orchestrator_with_all_workers() -> Orchestrator {
    let orch = Orchestrator::new(Config::default(), Arc::new(InMemoryKnowledge::new()))
        .await
        .expect("Failed to build orchestrator");
    for role in ALL_ROLES {
        orch.register_worker(Arc::new(
            ScriptedWorker::new(role).respond_with(json!({"role": role.as_str(), "ok": true})),
        ))
        .await;
    }
    orch
}

/// An orchestrator with no workers registered at all.
pub async fn bare_orchestrator() -> Orchestrator {
    Orchestrator::new(Config::default(), Arc::new(InMemoryKnowledge::new()))
        .await
        .expect("Failed to build orchestrator")
}

/// Serialize a consensus ballot the way a voting worker would return it.
pub fn ballot(response: &ConsensusResponse) -> serde_json::Value {
    serde_json::to_value(response).expect("Failed to serialize ballot")
}

/// An approving ballot carrying one schema suggestion.
pub fn approving_ballot_with_field(name: &str, field_type: &str) -> serde_json::Value {
    ballot(
        &ConsensusResponse::approve().with_suggestions(vec![Suggestion::AddField {
            name: name.to_string(),
            field_type: field_type.to_string(),
        }]),
    )
}

/// The canonical complex design task: long description, dense with domain
/// vocabulary, structured payload, upstream dependencies.
pub fn complex_design_task() -> Task {
    Task::new(
        "Design a scalable microservices architecture for checkout",
        "design-architecture",
    )
    .with_payload(json!({
        "services": ["cart", "payment", "inventory"],
        "constraints": {"latency_ms": 200, "throughput": {"rps": 5000}},
    }))
}

/// The canonical trivial task.
pub fn simple_rename_task() -> Task {
    Task::new("rename the variable", "rename-symbol")
}

/// A diff replacing a `var` declaration with `const`.
pub fn var_to_const_diff() -> CodeDiff {
    CodeDiff::new(
        "src/checkout.js",
        "var total = 0;\nmodule.exports = total;\n",
        "const total = 0;\nmodule.exports = total;\n",
        "senior-reviewer",
    )
}
