//! Classification and routing end to end.

use maestro::{ComplexityLevel, RunPhase, TaskStatus, WorkerRole};

use crate::fixtures::{
    complex_design_task, orchestrator_with_all_workers, simple_rename_task,
};

#[tokio::test]
async fn test_design_task_routes_to_full_design_triple() {
    let orch = orchestrator_with_all_workers().await;

    let (score, route) = orch.classify_and_route(&complex_design_task());
    assert!(score.score > 0.0 && score.score <= 1.0);
    assert_eq!(
        route.roles,
        vec![
            WorkerRole::Designer,
            WorkerRole::Planner,
            WorkerRole::UiSpecialist,
        ]
    );
    assert_eq!(route.template, "design-consensus");
}

#[tokio::test]
async fn test_rename_task_routes_to_implementer_executor_pair() {
    let orch = orchestrator_with_all_workers().await;

    let (score, route) = orch.classify_and_route(&simple_rename_task());
    assert_eq!(score.level, ComplexityLevel::Simple);
    assert_eq!(
        route.roles,
        vec![WorkerRole::Implementer, WorkerRole::Executor]
    );
    assert_eq!(route.template, "direct-implementation");
}

#[tokio::test]
async fn test_submitted_design_task_runs_its_routed_template() {
    let orch = orchestrator_with_all_workers().await;

    let submission = orch.submit(complex_design_task()).await.unwrap();
    assert_eq!(submission.route.template, "design-consensus");

    assert_eq!(
        orch.wait(&submission.run_id).await.unwrap(),
        RunPhase::Succeeded
    );

    // The design-consensus template fans out from design to plan and
    // ui-review; all three step results must land.
    let status = orch.run_status(&submission.run_id).await.unwrap();
    assert!(status.results.contains_key("design"));
    assert!(status.results.contains_key("plan"));
    assert!(status.results.contains_key("ui-review"));
}

#[tokio::test]
async fn test_submitted_rename_task_completes() {
    let orch = orchestrator_with_all_workers().await;

    let submission = orch.submit(simple_rename_task()).await.unwrap();
    assert_eq!(
        orch.wait(&submission.run_id).await.unwrap(),
        RunPhase::Succeeded
    );

    // Give the status watcher a beat to fold the phase back in.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let task = orch.take_result(&submission.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}
