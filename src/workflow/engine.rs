//! Workflow execution engine.
//!
//! The engine drives one run per registered template instance: steps start
//! `pending`, become `ready` when their declared dependencies are `done`,
//! are dispatched to their bound worker role over the message bus (bounded
//! by `max_in_flight`), and end `done`, `failed`, `skipped`, or
//! `cancelled`. Failures consume the template's retry budget before the
//! exhaustion policy decides between aborting the run and skipping the
//! step.
//!
//! The run table is partitioned by run id: each run owns its own lock, so
//! concurrent runs never contend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::core::router::WorkerRole;
use crate::core::task::Task;
use crate::error::{Error, Result};
use crate::knowledge::KnowledgeStore;
use crate::learning::LearningEngine;
use crate::worker::WorkerRequest;
use crate::workflow::template::{
    ExhaustionPolicy, RetryPolicy, TemplateRegistry, WorkflowStep, WorkflowTemplate,
};
use crate::{mlog, mlog_debug, mlog_warn};

/// Outcome channel depth per run.
const OUTCOME_CAPACITY: usize = 64;

/// Unique identifier for one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of one workflow step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
    Skipped,
    Cancelled,
}

/// Terminal and non-terminal phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunPhase::Running)
    }
}

/// Public view of one step's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStatus {
    pub state: StepState,
    pub attempts: u32,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Public view of a run: step states and collected results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: RunId,
    pub phase: RunPhase,
    pub steps: HashMap<String, StepStatus>,
    /// Results of `done` steps, keyed by step name.
    pub results: HashMap<String, serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug)]
struct StepRecord {
    state: StepState,
    attempts: u32,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    fn new() -> Self {
        Self {
            state: StepState::Pending,
            attempts: 0,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

struct RunRecord {
    id: RunId,
    template: Arc<WorkflowTemplate>,
    initial_context: serde_json::Value,
    phase: RunPhase,
    steps: HashMap<String, StepRecord>,
    results: HashMap<String, serde_json::Value>,
    error: Option<String>,
}

struct RunHandle {
    record: Arc<RwLock<RunRecord>>,
    cancel: CancellationToken,
    phase_rx: watch::Receiver<RunPhase>,
}

/// One step outcome reported back to the driver loop.
struct StepOutcome {
    step: String,
    result: std::result::Result<serde_json::Value, String>,
}

/// Executes workflow templates against a set of workers on the bus.
pub struct WorkflowEngine {
    bus: Arc<MessageBus>,
    knowledge: Arc<dyn KnowledgeStore>,
    learning: Option<Arc<LearningEngine>>,
    templates: RwLock<TemplateRegistry>,
    runs: RwLock<HashMap<RunId, RunHandle>>,
    max_in_flight: usize,
    default_retry: RetryPolicy,
}

impl WorkflowEngine {
    /// Create an engine over a bus and knowledge store, preloaded with the
    /// standard templates.
    pub fn new(bus: Arc<MessageBus>, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            bus,
            knowledge,
            learning: None,
            templates: RwLock::new(TemplateRegistry::standard()),
            runs: RwLock::new(HashMap::new()),
            max_in_flight: 4,
            default_retry: RetryPolicy::default(),
        }
    }

    /// Consult a learning engine for advisory warnings on review steps.
    pub fn with_learning(mut self, learning: Arc<LearningEngine>) -> Self {
        self.learning = Some(learning);
        self
    }

    /// Bound the number of concurrently running steps per run.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Retry policy for templates that do not declare their own.
    pub fn with_default_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }

    /// Register an additional template. Cyclic templates are rejected here,
    /// before any run can reference them.
    pub async fn register_template(&self, template: WorkflowTemplate) -> Result<()> {
        self.templates.write().await.register(template)
    }

    /// Start a run of a named template and return its id.
    ///
    /// The run executes in a background task; poll with `run_status`,
    /// block with `wait`, or stop it with `cancel`.
    pub async fn start(
        &self,
        template_name: &str,
        initial_context: serde_json::Value,
    ) -> Result<RunId> {
        let template = self.templates.read().await.get(template_name)?;

        let id = RunId::new();
        let steps = template
            .steps
            .iter()
            .map(|s| (s.name.clone(), StepRecord::new()))
            .collect();
        let record = Arc::new(RwLock::new(RunRecord {
            id,
            template: template.clone(),
            initial_context,
            phase: RunPhase::Running,
            steps,
            results: HashMap::new(),
            error: None,
        }));

        let cancel = CancellationToken::new();
        let (phase_tx, phase_rx) = watch::channel(RunPhase::Running);
        self.runs.write().await.insert(
            id,
            RunHandle {
                record: record.clone(),
                cancel: cancel.clone(),
                phase_rx,
            },
        );

        mlog!(
            "WorkflowEngine: run {} started (template {})",
            id.short(),
            template.name
        );

        let driver = Driver {
            bus: self.bus.clone(),
            knowledge: self.knowledge.clone(),
            learning: self.learning.clone(),
            record,
            cancel,
            phase_tx,
            max_in_flight: self.max_in_flight,
            retry: template.retry.unwrap_or(self.default_retry),
        };
        tokio::spawn(driver.run());

        Ok(id)
    }

    /// Snapshot the state of a run.
    pub async fn run_status(&self, run_id: &RunId) -> Result<RunStatus> {
        let runs = self.runs.read().await;
        let handle = runs
            .get(run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        let record = handle.record.read().await;

        Ok(RunStatus {
            run_id: record.id,
            phase: record.phase,
            steps: record
                .steps
                .iter()
                .map(|(name, s)| {
                    (
                        name.clone(),
                        StepStatus {
                            state: s.state,
                            attempts: s.attempts,
                            error: s.error.clone(),
                            started_at: s.started_at,
                            finished_at: s.finished_at,
                        },
                    )
                })
                .collect(),
            results: record.results.clone(),
            error: record.error.clone(),
        })
    }

    /// Signal cancellation of a run.
    ///
    /// Pending and ready steps are cancelled immediately; running steps are
    /// allowed to finish but their results are discarded.
    pub async fn cancel(&self, run_id: &RunId) -> Result<()> {
        let runs = self.runs.read().await;
        let handle = runs
            .get(run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        handle.cancel.cancel();
        Ok(())
    }

    /// Drop a terminal run from the run table, returning its final status.
    ///
    /// Long-lived hosts call this after retrieving results so the table
    /// does not grow without bound. Removing a run that has not finished
    /// is refused.
    pub async fn remove_run(&self, run_id: &RunId) -> Result<RunStatus> {
        let status = self.run_status(run_id).await?;
        if !status.phase.is_terminal() {
            return Err(Error::Validation(format!(
                "run {} has not reached a terminal phase",
                run_id.short()
            )));
        }
        self.runs.write().await.remove(run_id);
        Ok(status)
    }

    /// Wait for a run to reach a terminal phase.
    pub async fn wait(&self, run_id: &RunId) -> Result<RunPhase> {
        let mut phase_rx = {
            let runs = self.runs.read().await;
            runs.get(run_id)
                .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?
                .phase_rx
                .clone()
        };

        loop {
            let phase = *phase_rx.borrow();
            if phase.is_terminal() {
                return Ok(phase);
            }
            if phase_rx.changed().await.is_err() {
                // Driver went away; report the last recorded phase.
                return Ok(*phase_rx.borrow());
            }
        }
    }
}

/// Per-run driver task: dispatch loop plus outcome handling.
struct Driver {
    bus: Arc<MessageBus>,
    knowledge: Arc<dyn KnowledgeStore>,
    learning: Option<Arc<LearningEngine>>,
    record: Arc<RwLock<RunRecord>>,
    cancel: CancellationToken,
    phase_tx: watch::Sender<RunPhase>,
    max_in_flight: usize,
    retry: RetryPolicy,
}

impl Driver {
    async fn run(self) {
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<StepOutcome>(OUTCOME_CAPACITY);
        let mut in_flight: usize = 0;
        let mut cancel_seen = false;

        loop {
            if self.cancel.is_cancelled() {
                if !cancel_seen {
                    self.mark_cancelled().await;
                    cancel_seen = true;
                }
                if in_flight == 0 {
                    break;
                }
                // Drain running steps, discarding their results.
                match outcome_rx.recv().await {
                    Some(outcome) => {
                        in_flight -= 1;
                        self.discard_after_cancel(&outcome.step).await;
                    }
                    None => break,
                }
                continue;
            }

            in_flight += self.dispatch_ready(in_flight, &outcome_tx).await;

            if self.check_succeeded().await {
                break;
            }

            if in_flight == 0 {
                // Nothing running and nothing dispatchable, but the run is
                // not complete. Dependencies can no longer be satisfied.
                self.fail_run("workflow stalled: steps remain but none are runnable")
                    .await;
                break;
            }

            tokio::select! {
                outcome = outcome_rx.recv() => {
                    let Some(outcome) = outcome else { break };
                    in_flight -= 1;
                    if !self.handle_outcome(outcome).await {
                        break;
                    }
                }
                _ = self.cancel.cancelled() => {
                    // Handled at the top of the loop.
                }
            }
        }
    }

    /// Promote pending steps whose dependencies are done and dispatch them,
    /// bounded by the in-flight budget. Returns the number dispatched.
    async fn dispatch_ready(
        &self,
        in_flight: usize,
        outcome_tx: &mpsc::Sender<StepOutcome>,
    ) -> usize {
        let mut to_dispatch = Vec::new();
        {
            let mut record = self.record.write().await;
            let template = record.template.clone();

            // Promote: pending -> ready once all dependencies are done.
            for step in &template.steps {
                let deps_done = step.depends_on.iter().all(|dep| {
                    record
                        .steps
                        .get(dep)
                        .map(|s| s.state == StepState::Done)
                        .unwrap_or(false)
                });
                let state = record.steps.get(&step.name).map(|s| s.state);
                if state == Some(StepState::Pending) && deps_done {
                    if let Some(s) = record.steps.get_mut(&step.name) {
                        s.state = StepState::Ready;
                    }
                }
            }

            // Dispatch: ready -> running, up to capacity.
            let mut budget = self.max_in_flight.saturating_sub(in_flight);
            for step in &template.steps {
                if budget == 0 {
                    break;
                }
                let ready = record
                    .steps
                    .get(&step.name)
                    .map(|s| s.state == StepState::Ready)
                    .unwrap_or(false);
                if !ready {
                    continue;
                }
                if let Some(s) = record.steps.get_mut(&step.name) {
                    s.state = StepState::Running;
                    s.attempts += 1;
                    s.started_at.get_or_insert_with(Utc::now);
                }
                let deps: HashMap<String, serde_json::Value> = step
                    .depends_on
                    .iter()
                    .filter_map(|d| record.results.get(d).map(|v| (d.clone(), v.clone())))
                    .collect();
                to_dispatch.push((step.clone(), deps, record.initial_context.clone()));
                budget -= 1;
            }
        }

        let dispatched = to_dispatch.len();
        for (step, deps, initial) in to_dispatch {
            let context = self.build_context(&step, &deps, initial).await;
            let request = WorkerRequest::new(step_task(&step), context);
            let bus = self.bus.clone();
            let tx = outcome_tx.clone();
            let name = step.name.clone();
            let role = step.role;
            mlog_debug!("WorkflowEngine: dispatching step {} to {}", name, role);
            tokio::spawn(async move {
                let result = match bus.request(role, request).await {
                    Ok(reply) if reply.success => Ok(reply.data),
                    Ok(reply) => Err(reply
                        .error
                        .unwrap_or_else(|| "worker reported failure".to_string())),
                    Err(err) => Err(err.to_string()),
                };
                let _ = tx.send(StepOutcome { step: name, result }).await;
            });
        }
        dispatched
    }

    /// Assemble the structured context a step's worker receives: the run's
    /// initial context, dependency results, step config, knowledge
    /// snippets, and advisory rule warnings for review steps.
    async fn build_context(
        &self,
        step: &WorkflowStep,
        deps: &HashMap<String, serde_json::Value>,
        initial: serde_json::Value,
    ) -> serde_json::Value {
        let query = step
            .config
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or(&step.name);
        let snippets = match self.knowledge.retrieve(query, Some(step.role)).await {
            Ok(snippets) => snippets,
            Err(err) => {
                mlog_warn!("knowledge retrieval failed for step {}: {}", step.name, err);
                Vec::new()
            }
        };

        let mut context = serde_json::json!({
            "initial": initial,
            "dependencies": deps,
            "config": step.config,
            "knowledge": snippets,
        });

        // Review steps get the learned-rule warnings for the material they
        // are about to review.
        if step.role == WorkerRole::Reviewer {
            if let Some(learning) = &self.learning {
                let material = serde_json::to_string_pretty(deps).unwrap_or_default();
                match learning.review(&material).await {
                    Ok(issues) => {
                        context["warnings"] =
                            serde_json::to_value(issues).unwrap_or(serde_json::Value::Null);
                    }
                    Err(err) => {
                        mlog_warn!("rule review failed for step {}: {}", step.name, err);
                    }
                }
            }
        }

        context
    }

    async fn handle_outcome(&self, outcome: StepOutcome) -> bool {
        let mut record = self.record.write().await;
        let template = record.template.clone();
        let run_id = record.id;

        match outcome.result {
            Ok(data) => {
                if let Some(s) = record.steps.get_mut(&outcome.step) {
                    s.state = StepState::Done;
                    s.error = None;
                    s.finished_at = Some(Utc::now());
                }
                mlog_debug!("run {}: step {} done", run_id.short(), outcome.step);
                record.results.insert(outcome.step, data);
                true
            }
            Err(cause) => {
                let attempts = record
                    .steps
                    .get(&outcome.step)
                    .map(|s| s.attempts)
                    .unwrap_or(0);

                if attempts <= self.retry.max_retries {
                    mlog_warn!(
                        "run {}: step {} failed (attempt {}), retrying: {}",
                        run_id.short(),
                        outcome.step,
                        attempts,
                        cause
                    );
                    if let Some(s) = record.steps.get_mut(&outcome.step) {
                        s.state = StepState::Pending;
                        s.error = Some(cause);
                    }
                    return true;
                }

                match self.retry.on_exhausted {
                    ExhaustionPolicy::Abort => {
                        mlog_warn!(
                            "run {}: step {} exhausted retries, aborting: {}",
                            run_id.short(),
                            outcome.step,
                            cause
                        );
                        if let Some(s) = record.steps.get_mut(&outcome.step) {
                            s.state = StepState::Failed;
                            s.error = Some(cause.clone());
                            s.finished_at = Some(Utc::now());
                        }
                        // Steps that can no longer run are cancelled.
                        for s in record.steps.values_mut() {
                            if matches!(s.state, StepState::Pending | StepState::Ready) {
                                s.state = StepState::Cancelled;
                            }
                        }
                        record.phase = RunPhase::Failed;
                        record.error = Some(
                            Error::StepFailed {
                                run_id: run_id.to_string(),
                                step: outcome.step,
                                cause,
                            }
                            .to_string(),
                        );
                        let _ = self.phase_tx.send(RunPhase::Failed);
                        false
                    }
                    ExhaustionPolicy::Skip => {
                        mlog_warn!(
                            "run {}: step {} exhausted retries, skipping: {}",
                            run_id.short(),
                            outcome.step,
                            cause
                        );
                        if let Some(s) = record.steps.get_mut(&outcome.step) {
                            s.state = StepState::Skipped;
                            s.error = Some(cause);
                            s.finished_at = Some(Utc::now());
                        }
                        skip_dependents(&mut record, &template);
                        true
                    }
                }
            }
        }
    }

    async fn check_succeeded(&self) -> bool {
        let mut record = self.record.write().await;
        let complete = record
            .steps
            .values()
            .all(|s| matches!(s.state, StepState::Done | StepState::Skipped));
        if complete {
            record.phase = RunPhase::Succeeded;
            mlog!("WorkflowEngine: run {} succeeded", record.id.short());
            let _ = self.phase_tx.send(RunPhase::Succeeded);
        }
        complete
    }

    async fn fail_run(&self, cause: &str) {
        let mut record = self.record.write().await;
        record.phase = RunPhase::Failed;
        record.error = Some(
            Error::RunFailed {
                run_id: record.id.to_string(),
                cause: cause.to_string(),
            }
            .to_string(),
        );
        mlog_warn!("WorkflowEngine: run {} failed: {}", record.id.short(), cause);
        let _ = self.phase_tx.send(RunPhase::Failed);
    }

    async fn mark_cancelled(&self) {
        let mut record = self.record.write().await;
        for s in record.steps.values_mut() {
            if matches!(s.state, StepState::Pending | StepState::Ready) {
                s.state = StepState::Cancelled;
            }
        }
        record.phase = RunPhase::Cancelled;
        mlog!("WorkflowEngine: run {} cancelled", record.id.short());
        let _ = self.phase_tx.send(RunPhase::Cancelled);
    }

    /// A running step finished after cancellation: discard its result.
    async fn discard_after_cancel(&self, step: &str) {
        let mut record = self.record.write().await;
        if let Some(s) = record.steps.get_mut(step) {
            if s.state == StepState::Running {
                s.state = StepState::Cancelled;
                s.finished_at = Some(Utc::now());
            }
        }
    }
}

/// Mark every transitive dependent of skipped steps as skipped; a step
/// whose dependency will never be done cannot become ready.
fn skip_dependents(record: &mut RunRecord, template: &WorkflowTemplate) {
    loop {
        let mut changed = false;
        for step in &template.steps {
            let blocked = step.depends_on.iter().any(|dep| {
                record
                    .steps
                    .get(dep)
                    .map(|s| s.state == StepState::Skipped)
                    .unwrap_or(false)
            });
            if !blocked {
                continue;
            }
            if let Some(s) = record.steps.get_mut(&step.name) {
                if matches!(s.state, StepState::Pending | StepState::Ready) {
                    s.state = StepState::Skipped;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// Build the synthetic task a step dispatches: the step name doubles as the
/// task type so workers can script per-step behavior.
fn step_task(step: &WorkflowStep) -> Task {
    let description = step
        .config
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or(&step.name);
    Task::new(description, &step.name)
}
