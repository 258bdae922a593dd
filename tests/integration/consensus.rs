//! Quorum resolution and suggestion merging.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use maestro::consensus::{ConsensusCoordinator, ConsensusRequest, ConsensusResponse, Suggestion};
use maestro::worker::{spawn_worker, ScriptedWorker};
use maestro::{MessageBus, WorkerRole};

use crate::fixtures::{
    approving_ballot_with_field, ballot, bare_orchestrator, ALL_ROLES,
};

#[tokio::test]
async fn test_five_participants_need_four_approvals() {
    // Five roles vote; with a 0.7 ratio, ceil(3.5) = 4 must approve.
    let bus = Arc::new(MessageBus::new());
    let voters = [
        (WorkerRole::Designer, true),
        (WorkerRole::Planner, true),
        (WorkerRole::Implementer, true),
        (WorkerRole::Executor, true),
        (WorkerRole::Reviewer, false),
    ];
    for (role, approve) in voters {
        let response = if approve {
            ConsensusResponse::approve()
        } else {
            ConsensusResponse::reject("not convinced")
        };
        spawn_worker(
            &bus,
            Arc::new(ScriptedWorker::new(role).respond_with(ballot(&response))),
        )
        .await;
    }
    let coordinator = ConsensusCoordinator::new(bus);

    let request = ConsensusRequest::new(
        json!({}),
        voters.iter().map(|(role, _)| *role).collect(),
    );
    let outcome = coordinator.resolve(request).await.unwrap();
    assert_eq!(outcome.required_approvals, 4);
    assert_eq!(outcome.approvals, 4);
    assert!(outcome.approved);
}

#[tokio::test]
async fn test_three_of_five_approvals_reject() {
    let bus = Arc::new(MessageBus::new());
    let voters = [
        (WorkerRole::Designer, true),
        (WorkerRole::Planner, true),
        (WorkerRole::Implementer, true),
        (WorkerRole::Executor, false),
        (WorkerRole::Reviewer, false),
    ];
    for (role, approve) in voters {
        let response = if approve {
            ConsensusResponse::approve()
        } else {
            ConsensusResponse::reject("missing error budget")
        };
        spawn_worker(
            &bus,
            Arc::new(ScriptedWorker::new(role).respond_with(ballot(&response))),
        )
        .await;
    }
    let coordinator = ConsensusCoordinator::new(bus);

    let request = ConsensusRequest::new(
        json!({}),
        voters.iter().map(|(role, _)| *role).collect(),
    );
    let outcome = coordinator.resolve(request).await.unwrap();
    assert_eq!(outcome.approvals, 3);
    assert!(!outcome.approved);
    assert_eq!(outcome.feedback.len(), 2);
}

#[tokio::test]
async fn test_slow_participant_resolves_as_non_approval_before_it_answers() {
    let bus = Arc::new(MessageBus::new());
    spawn_worker(
        &bus,
        Arc::new(
            ScriptedWorker::new(WorkerRole::Designer)
                .respond_with(ballot(&ConsensusResponse::approve())),
        ),
    )
    .await;
    spawn_worker(
        &bus,
        Arc::new(
            ScriptedWorker::new(WorkerRole::Planner)
                .respond_with(ballot(&ConsensusResponse::approve()))
                .with_delay(Duration::from_secs(30)),
        ),
    )
    .await;
    let coordinator = ConsensusCoordinator::new(bus);

    let started = std::time::Instant::now();
    let request = ConsensusRequest::new(
        json!({}),
        vec![WorkerRole::Designer, WorkerRole::Planner],
    )
    .with_deadline(Duration::from_millis(100));
    let outcome = coordinator.resolve(request).await.unwrap();

    // The round resolves at the deadline, not when the laggard answers.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.approvals, 1);
    assert!(!outcome.approved);
}

#[tokio::test]
async fn test_suggestions_from_multiple_participants_accumulate() {
    let bus = Arc::new(MessageBus::new());
    spawn_worker(
        &bus,
        Arc::new(
            ScriptedWorker::new(WorkerRole::Designer)
                .respond_with(approving_ballot_with_field("created_at", "timestamp")),
        ),
    )
    .await;
    spawn_worker(
        &bus,
        Arc::new(ScriptedWorker::new(WorkerRole::Planner).respond_with(ballot(
            &ConsensusResponse::approve().with_suggestions(vec![
                Suggestion::AddPolicy {
                    concern: "authentication".to_string(),
                },
                Suggestion::AddField {
                    name: "created_at".to_string(),
                    field_type: "timestamp".to_string(),
                },
            ]),
        ))),
    )
    .await;
    let coordinator = ConsensusCoordinator::new(bus);

    let request = ConsensusRequest::new(
        json!({"schema": {"id": "uuid"}}),
        vec![WorkerRole::Designer, WorkerRole::Planner],
    );
    let outcome = coordinator.resolve(request).await.unwrap();
    assert!(outcome.approved);

    // The duplicate field suggestion merges idempotently.
    let schema = outcome.artifact["schema"].as_object().unwrap();
    assert_eq!(schema.len(), 2);
    assert_eq!(schema["created_at"], "timestamp");
    assert_eq!(outcome.artifact["policies"]["authentication"], true);
}

#[tokio::test]
async fn test_facade_consensus_uses_configured_deadline() {
    let orch = bare_orchestrator().await;
    for role in ALL_ROLES {
        orch.register_worker(Arc::new(
            ScriptedWorker::new(role).respond_with(ballot(&ConsensusResponse::approve())),
        ))
        .await;
    }

    let outcome = orch
        .resolve_consensus(
            json!({"schema": {}}),
            vec![WorkerRole::Designer, WorkerRole::Planner, WorkerRole::UiSpecialist],
        )
        .await
        .unwrap();
    assert!(outcome.approved);
    assert_eq!(outcome.votes.len(), 3);
}

#[tokio::test]
async fn test_five_participants_with_explicit_quorum_and_one_silent() {
    // requiredApprovals pinned to 4; one participant never registers, so it
    // can never vote. Four approvals still carry the round.
    let bus = Arc::new(MessageBus::new());
    for role in [
        WorkerRole::Designer,
        WorkerRole::Planner,
        WorkerRole::Implementer,
        WorkerRole::Executor,
    ] {
        spawn_worker(
            &bus,
            Arc::new(ScriptedWorker::new(role).respond_with(ballot(&ConsensusResponse::approve()))),
        )
        .await;
    }
    let coordinator = ConsensusCoordinator::new(bus);

    let request = ConsensusRequest::new(
        json!({}),
        vec![
            WorkerRole::Designer,
            WorkerRole::Planner,
            WorkerRole::Implementer,
            WorkerRole::Executor,
            WorkerRole::Reviewer,
        ],
    )
    .with_required_approvals(4)
    .with_deadline(Duration::from_millis(100));
    let outcome = coordinator.resolve(request).await.unwrap();
    assert_eq!(outcome.required_approvals, 4);
    assert_eq!(outcome.approvals, 4);
    assert_eq!(outcome.votes.len(), 4);
    assert!(outcome.approved);
}
