//! Full workflow execution tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use maestro::knowledge::InMemoryKnowledge;
use maestro::learning::engine::LearningEngine;
use maestro::learning::rules::RuleStore;
use maestro::worker::{spawn_worker, ScriptedWorker, Worker, WorkerRequest};
use maestro::workflow::{ExhaustionPolicy, RetryPolicy, WorkflowStep, WorkflowTemplate};
use maestro::{MessageBus, Result, RunPhase, StepState, TaskStatus, WorkerRole, WorkflowEngine};

use crate::fixtures::{orchestrator_with_all_workers, simple_rename_task, var_to_const_diff};

/// A worker that records every request context it receives.
struct CapturingWorker {
    role: WorkerRole,
    contexts: Arc<Mutex<Vec<serde_json::Value>>>,
    response: serde_json::Value,
}

#[async_trait]
impl Worker for CapturingWorker {
    fn role(&self) -> WorkerRole {
        self.role
    }

    async fn process(&self, request: &WorkerRequest) -> Result<serde_json::Value> {
        self.contexts.lock().unwrap().push(request.context.clone());
        Ok(self.response.clone())
    }
}

#[tokio::test]
async fn test_fan_out_respects_dependency_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let bus = Arc::new(MessageBus::new());
    for role in [
        WorkerRole::Designer,
        WorkerRole::Planner,
        WorkerRole::UiSpecialist,
    ] {
        spawn_worker(&bus, Arc::new(ScriptedWorker::new(role).record_to(log.clone()))).await;
    }
    let engine = WorkflowEngine::new(bus, Arc::new(InMemoryKnowledge::new()));

    let run_id = engine.start("design-consensus", json!({})).await.unwrap();
    assert_eq!(engine.wait(&run_id).await.unwrap(), RunPhase::Succeeded);

    let order = log.lock().unwrap().clone();
    assert_eq!(order.len(), 3);
    // The design step gates both downstream steps; their relative order is
    // unconstrained.
    assert_eq!(order[0], "design");
    assert!(order[1..].contains(&"plan".to_string()));
    assert!(order[1..].contains(&"ui-review".to_string()));
}

#[tokio::test]
async fn test_dependency_results_flow_into_step_context() {
    let bus = Arc::new(MessageBus::new());
    spawn_worker(
        &bus,
        Arc::new(
            ScriptedWorker::new(WorkerRole::Designer).respond_with(json!({"blueprint": "v1"})),
        ),
    )
    .await;
    let contexts = Arc::new(Mutex::new(Vec::new()));
    spawn_worker(
        &bus,
        Arc::new(CapturingWorker {
            role: WorkerRole::Implementer,
            contexts: contexts.clone(),
            response: json!({}),
        }),
    )
    .await;
    let engine = WorkflowEngine::new(bus, Arc::new(InMemoryKnowledge::new()));

    let run_id = engine
        .start("design-implement", json!({"goal": "checkout"}))
        .await
        .unwrap();
    assert_eq!(engine.wait(&run_id).await.unwrap(), RunPhase::Succeeded);

    let contexts = contexts.lock().unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0]["initial"]["goal"], "checkout");
    assert_eq!(contexts[0]["dependencies"]["design"]["blueprint"], "v1");
}

#[tokio::test]
async fn test_review_step_receives_learned_rule_warnings() {
    let rules = Arc::new(RuleStore::new(Arc::new(InMemoryKnowledge::new())));
    let learning = Arc::new(LearningEngine::new(rules, 1 << 16));
    learning.learn(&var_to_const_diff()).await.unwrap();

    let bus = Arc::new(MessageBus::new());
    spawn_worker(
        &bus,
        Arc::new(
            ScriptedWorker::new(WorkerRole::Implementer)
                .respond_with(json!({"code": "var total = 0;"})),
        ),
    )
    .await;
    let contexts = Arc::new(Mutex::new(Vec::new()));
    spawn_worker(
        &bus,
        Arc::new(CapturingWorker {
            role: WorkerRole::Reviewer,
            contexts: contexts.clone(),
            response: json!({"approved": true}),
        }),
    )
    .await;
    let engine =
        WorkflowEngine::new(bus, Arc::new(InMemoryKnowledge::new())).with_learning(learning);
    engine
        .register_template(WorkflowTemplate::new(
            "implement-review",
            vec![
                WorkflowStep::new("implement", WorkerRole::Implementer),
                WorkflowStep::new("review", WorkerRole::Reviewer).depends_on(&["implement"]),
            ],
        ))
        .await
        .unwrap();

    let run_id = engine.start("implement-review", json!({})).await.unwrap();
    assert_eq!(engine.wait(&run_id).await.unwrap(), RunPhase::Succeeded);

    let contexts = contexts.lock().unwrap();
    let warnings = contexts[0]["warnings"].as_array().unwrap();
    assert!(!warnings.is_empty());
    assert!(warnings[0]["suggestion"]
        .as_str()
        .unwrap()
        .contains("const"));
}

#[tokio::test]
async fn test_skip_policy_survives_a_flaky_optional_step() {
    let bus = Arc::new(MessageBus::new());
    spawn_worker(&bus, Arc::new(ScriptedWorker::new(WorkerRole::Implementer))).await;
    spawn_worker(
        &bus,
        Arc::new(ScriptedWorker::new(WorkerRole::Reviewer).fail_first(10)),
    )
    .await;
    let engine = WorkflowEngine::new(bus, Arc::new(InMemoryKnowledge::new()));
    engine
        .register_template(
            WorkflowTemplate::new(
                "implement-optional-review",
                vec![
                    WorkflowStep::new("implement", WorkerRole::Implementer),
                    WorkflowStep::new("review", WorkerRole::Reviewer).depends_on(&["implement"]),
                ],
            )
            .with_retry(RetryPolicy {
                max_retries: 1,
                on_exhausted: ExhaustionPolicy::Skip,
            }),
        )
        .await
        .unwrap();

    let run_id = engine
        .start("implement-optional-review", json!({}))
        .await
        .unwrap();
    assert_eq!(engine.wait(&run_id).await.unwrap(), RunPhase::Succeeded);

    let status = engine.run_status(&run_id).await.unwrap();
    assert_eq!(status.steps["implement"].state, StepState::Done);
    assert_eq!(status.steps["review"].state, StepState::Skipped);
    assert_eq!(status.steps["review"].attempts, 2);
}

#[tokio::test]
async fn test_cancelled_run_marks_task_cancelled() {
    let orch = orchestrator_with_all_workers().await;
    // Re-register the implementer with a long delay so the run is still in
    // flight when we cancel.
    orch.register_worker(Arc::new(
        ScriptedWorker::new(WorkerRole::Implementer).with_delay(Duration::from_millis(500)),
    ))
    .await;

    let submission = orch.submit(simple_rename_task()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    orch.cancel_run(&submission.run_id).await.unwrap();

    assert_eq!(
        orch.wait(&submission.run_id).await.unwrap(),
        RunPhase::Cancelled
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let task = orch.status(&submission.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
}
