//! Top-level facade wiring the classifier, router, workflow engine,
//! consensus coordinator, and learning engine together over one bus.
//!
//! The orchestrator owns the task table. `submit` classifies a task,
//! routes it to a workflow template, and starts a run; a background
//! watcher folds the run's terminal phase back into the task's status.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::bus::MessageBus;
use crate::config::Config;
use crate::consensus::{ConsensusCoordinator, ConsensusOutcome, ConsensusRequest};
use crate::core::classifier::{ComplexityClassifier, ComplexityScore};
use crate::core::router::{Route, Router, WorkerRole};
use crate::core::task::{Task, TaskId, TaskStatus, TaskStore};
use crate::error::Result;
use crate::knowledge::{FileKnowledge, KnowledgeStore};
use crate::learning::diff::CodeDiff;
use crate::learning::engine::{Issue, LearnOutcome, LearningEngine};
use crate::learning::rules::RuleStore;
use crate::worker::{spawn_worker, Worker};
use crate::workflow::engine::{RunId, RunPhase, RunStatus, WorkflowEngine};
use crate::workflow::template::{ExhaustionPolicy, RetryPolicy, WorkflowTemplate};
use crate::{mlog, mlog_warn};

/// What `submit` decided about a task.
#[derive(Debug, Clone)]
pub struct Submission {
    pub task_id: TaskId,
    pub score: ComplexityScore,
    pub route: Route,
    pub run_id: RunId,
}

/// The orchestration core: one bus, one task table, one engine.
pub struct Orchestrator {
    config: Config,
    bus: Arc<MessageBus>,
    tasks: Arc<RwLock<TaskStore>>,
    classifier: ComplexityClassifier,
    router: Router,
    engine: Arc<WorkflowEngine>,
    consensus: ConsensusCoordinator,
    learning: Arc<LearningEngine>,
}

impl Orchestrator {
    /// Build an orchestrator over a knowledge store, loading any persisted
    /// rules.
    pub async fn new(config: Config, knowledge: Arc<dyn KnowledgeStore>) -> Result<Self> {
        let bus = Arc::new(MessageBus::new());

        let rules = Arc::new(RuleStore::new(knowledge.clone()));
        let loaded = rules.load().await?;
        if loaded > 0 {
            mlog!("Orchestrator: loaded {} persisted rules", loaded);
        }
        let learning = Arc::new(LearningEngine::new(rules, config.pattern_size_limit));

        let engine = Arc::new(
            WorkflowEngine::new(bus.clone(), knowledge)
                .with_learning(learning.clone())
                .with_max_in_flight(config.max_in_flight)
                .with_default_retry(RetryPolicy {
                    max_retries: config.max_retries,
                    on_exhausted: ExhaustionPolicy::Abort,
                }),
        );
        let consensus =
            ConsensusCoordinator::new(bus.clone()).with_approval_ratio(config.approval_ratio);

        Ok(Self {
            config,
            bus,
            tasks: Arc::new(RwLock::new(TaskStore::new())),
            classifier: ComplexityClassifier::new(),
            router: Router::new(),
            engine,
            consensus,
            learning,
        })
    }

    /// Build an orchestrator whose rules persist to the configured rules
    /// file (`~/.maestro/rules.json` unless overridden).
    pub async fn with_file_knowledge(config: Config) -> Result<Self> {
        let path = config.rules_file()?;
        let knowledge = Arc::new(FileKnowledge::open(&path).await?);
        Self::new(config, knowledge).await
    }

    /// The bus workers register on.
    pub fn bus(&self) -> Arc<MessageBus> {
        self.bus.clone()
    }

    /// Register an additional workflow template.
    pub async fn register_template(&self, template: WorkflowTemplate) -> Result<()> {
        self.engine.register_template(template).await
    }

    /// Register a worker on the bus for its role.
    pub async fn register_worker(&self, worker: Arc<dyn Worker>) {
        spawn_worker(&self.bus, worker).await;
    }

    /// Classify a task and pick its route, without starting anything.
    pub fn classify_and_route(&self, task: &Task) -> (ComplexityScore, Route) {
        let score = self.classifier.classify(task);
        let route = self.router.route(&score, task);
        (score, route)
    }

    /// Submit a task: classify, route, and start the routed workflow.
    ///
    /// Declared dependencies must be completed, otherwise submission is
    /// rejected. The run's terminal phase is folded back into the task
    /// status in the background.
    pub async fn submit(&self, task: Task) -> Result<Submission> {
        let (score, route) = self.classify_and_route(&task);
        mlog!(
            "Orchestrator: task {} classified {} ({:.3}), routed to {}",
            task.id.short(),
            score.level,
            score.score,
            route.template
        );

        let task_id = {
            let mut tasks = self.tasks.write().await;
            let id = tasks.insert(task.clone());
            tasks.start(&id)?;
            id
        };

        let initial = serde_json::json!({
            "task": task,
            "complexity": score,
            "roles": route.roles.clone(),
        });
        let run_id = match self.engine.start(&route.template, initial).await {
            Ok(run_id) => run_id,
            Err(err) => {
                self.tasks.write().await.set_status(
                    &task_id,
                    TaskStatus::Failed {
                        error: err.to_string(),
                    },
                )?;
                return Err(err);
            }
        };

        self.watch_run(task_id, run_id);

        Ok(Submission {
            task_id,
            score,
            route,
            run_id,
        })
    }

    /// Mirror a run's terminal phase into the task table.
    fn watch_run(&self, task_id: TaskId, run_id: RunId) {
        let engine = self.engine.clone();
        let tasks = self.tasks.clone();
        tokio::spawn(async move {
            let status = match engine.wait(&run_id).await {
                Ok(phase) => match phase {
                    RunPhase::Succeeded => TaskStatus::Completed,
                    RunPhase::Cancelled => TaskStatus::Cancelled,
                    RunPhase::Failed | RunPhase::Running => TaskStatus::Failed {
                        error: engine
                            .run_status(&run_id)
                            .await
                            .ok()
                            .and_then(|s| s.error)
                            .unwrap_or_else(|| "workflow run failed".to_string()),
                    },
                },
                Err(err) => TaskStatus::Failed {
                    error: err.to_string(),
                },
            };
            if let Err(err) = tasks.write().await.set_status(&task_id, status) {
                mlog_warn!("failed to record outcome of run {}: {}", run_id.short(), err);
            }
        });
    }

    /// Look up a task's current state.
    pub async fn status(&self, id: &TaskId) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Start a named workflow directly, bypassing classification.
    pub async fn run_workflow(
        &self,
        template: &str,
        initial_context: serde_json::Value,
    ) -> Result<RunId> {
        self.engine.start(template, initial_context).await
    }

    /// Retrieve the result of a terminal task, archiving it.
    ///
    /// Returns `None` while the task is still in flight.
    pub async fn take_result(&self, id: &TaskId) -> Result<Option<Task>> {
        self.tasks.write().await.take_result(id)
    }

    /// Snapshot a workflow run.
    pub async fn run_status(&self, run_id: &RunId) -> Result<RunStatus> {
        self.engine.run_status(run_id).await
    }

    /// Wait for a workflow run to finish.
    pub async fn wait(&self, run_id: &RunId) -> Result<RunPhase> {
        self.engine.wait(run_id).await
    }

    /// Cancel a workflow run.
    pub async fn cancel_run(&self, run_id: &RunId) -> Result<()> {
        self.engine.cancel(run_id).await
    }

    /// Drop a finished run from the run table, returning its final status.
    pub async fn remove_run(&self, run_id: &RunId) -> Result<RunStatus> {
        self.engine.remove_run(run_id).await
    }

    /// Run a consensus round over an artifact with the configured deadline.
    pub async fn resolve_consensus(
        &self,
        artifact: serde_json::Value,
        participants: Vec<WorkerRole>,
    ) -> Result<ConsensusOutcome> {
        let request = ConsensusRequest::new(artifact, participants)
            .with_deadline(Duration::from_millis(self.config.consensus_deadline_ms));
        self.consensus.resolve(request).await
    }

    /// Mine rules from an observed code change.
    pub async fn learn(&self, diff: &CodeDiff) -> Result<LearnOutcome> {
        self.learning.learn(diff).await
    }

    /// Review text against the learned rules.
    pub async fn review(&self, text: &str) -> Result<Vec<Issue>> {
        self.learning.review(text).await
    }
}
