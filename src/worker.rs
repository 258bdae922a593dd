//! Worker contract and mailbox hosting.
//!
//! A `Worker` is an external collaborator: it accepts one task plus
//! structured context and returns a structured result or failure. How the
//! worker reasons internally (which reasoning service it calls, how it
//! prompts it) is entirely its own business; the core only depends on this
//! trait and on the role/capability declarations used for routing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bus::MessageBus;
use crate::core::router::WorkerRole;
use crate::core::task::Task;
use crate::error::Result;
use crate::{mlog_debug, mlog_warn};

/// A task plus context delivered to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// The task to process.
    pub task: Task,
    /// Structured context: dependency results, knowledge snippets,
    /// advisory warnings.
    pub context: serde_json::Value,
}

impl WorkerRequest {
    pub fn new(task: Task, context: serde_json::Value) -> Self {
        Self { task, context }
    }
}

/// Structured outcome of a worker call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    /// Whether the worker succeeded.
    pub success: bool,
    /// Result payload (empty object on failure).
    pub data: serde_json::Value,
    /// Failure cause when `success` is false.
    pub error: Option<String>,
}

impl WorkerResult {
    /// A successful result carrying `data`.
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    /// A failed result carrying an error message.
    pub fn failure(error: &str) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Object(Default::default()),
            error: Some(error.to_string()),
        }
    }
}

/// An external collaborator that processes tasks for one role.
#[async_trait]
pub trait Worker: Send + Sync {
    /// The role this worker serves; its address on the bus.
    fn role(&self) -> WorkerRole;

    /// Capability tags this worker declares.
    ///
    /// The core does not match on these itself; they are metadata for the
    /// host, which reads them when assembling a custom override table for
    /// `Router::with_overrides` (e.g. mapping a "blueprint" capability to
    /// a keyword override targeting this worker's role).
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Process one request, returning the structured result payload.
    async fn process(&self, request: &WorkerRequest) -> Result<serde_json::Value>;
}

/// Host a worker on its bus mailbox.
///
/// Registers a mailbox for the worker's role and services it until the bus
/// is dropped. Worker errors become failed `WorkerResult`s; they never tear
/// down the mailbox loop.
pub async fn spawn_worker(
    bus: &MessageBus,
    worker: Arc<dyn Worker>,
) -> tokio::task::JoinHandle<()> {
    let role = worker.role();
    let mut rx = bus.register(role).await;
    mlog_debug!("spawn_worker: hosting {} (caps: {:?})", role, worker.capabilities());

    tokio::spawn(async move {
        // Each request is served on its own task so one slow request does
        // not head-of-line block the mailbox.
        while let Some(envelope) = rx.recv().await {
            let worker = worker.clone();
            tokio::spawn(async move {
                let result = match worker.process(&envelope.request).await {
                    Ok(data) => WorkerResult::success(data),
                    Err(err) => {
                        mlog_warn!("worker {} failed: {}", role, err);
                        WorkerResult::failure(&err.to_string())
                    }
                };
                // Requester may have timed out and gone away; that is not our problem.
                let _ = envelope.reply.send(result);
            });
        }
        mlog_debug!("spawn_worker: mailbox for {} closed", role);
    })
}

/// A scripted worker for tests and local development.
///
/// Responds from a per-task-type script with an optional default, can fail
/// its first N calls (for retry testing), can delay replies (for deadline
/// testing), and records the order in which it was dispatched.
pub struct ScriptedWorker {
    role: WorkerRole,
    capabilities: Vec<String>,
    responses: HashMap<String, serde_json::Value>,
    default_response: serde_json::Value,
    fail_first: AtomicU32,
    delay: Option<Duration>,
    dispatch_log: Option<Arc<Mutex<Vec<String>>>>,
}

impl ScriptedWorker {
    /// Create a scripted worker that answers `{}` to everything.
    pub fn new(role: WorkerRole) -> Self {
        Self {
            role,
            capabilities: Vec::new(),
            responses: HashMap::new(),
            default_response: serde_json::json!({}),
            fail_first: AtomicU32::new(0),
            delay: None,
            dispatch_log: None,
        }
    }

    /// Declare capability tags.
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Script a response for a specific task type.
    pub fn respond_to(mut self, task_type: &str, response: serde_json::Value) -> Self {
        self.responses.insert(task_type.to_string(), response);
        self
    }

    /// Set the fallback response.
    pub fn respond_with(mut self, response: serde_json::Value) -> Self {
        self.default_response = response;
        self
    }

    /// Fail the first `n` calls before succeeding.
    pub fn fail_first(self, n: u32) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Record each dispatched task type into the shared log.
    pub fn record_to(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.dispatch_log = Some(log);
        self
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn role(&self) -> WorkerRole {
        self.role
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    async fn process(&self, request: &WorkerRequest) -> Result<serde_json::Value> {
        if let Some(log) = &self.dispatch_log {
            log.lock()
                .expect("dispatch log poisoned")
                .push(request.task.task_type.clone());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        // Concurrent requests each consume exactly one unit of the budget.
        let consumed = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(crate::Error::WorkerFailure {
                role: self.role.to_string(),
                cause: "scripted failure".to_string(),
            });
        }

        Ok(self
            .responses
            .get(&request.task.task_type)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone()))
    }
}
