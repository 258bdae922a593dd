//! Addressable-mailbox message bus.
//!
//! The bus is an internal routing abstraction, not a network transport:
//! each worker role owns a mailbox (a bounded tokio mpsc channel) and
//! callers await replies on a oneshot channel carried in the envelope.
//! Hosts that need a real transport bridge it inside a `Worker` impl.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::core::router::WorkerRole;
use crate::error::{Error, Result};
use crate::worker::{WorkerRequest, WorkerResult};
use crate::{mlog_debug, mlog_trace};

/// Mailbox depth per role.
const MAILBOX_CAPACITY: usize = 100;

/// A request plus the reply channel it should be answered on.
#[derive(Debug)]
pub struct Envelope {
    /// The request being delivered.
    pub request: WorkerRequest,
    /// Channel the worker answers on.
    pub reply: oneshot::Sender<WorkerResult>,
}

/// Routes typed messages between the core and workers by role.
#[derive(Debug, Default)]
pub struct MessageBus {
    mailboxes: RwLock<HashMap<WorkerRole, mpsc::Sender<Envelope>>>,
}

impl MessageBus {
    /// Create an empty bus with no registered mailboxes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mailbox for a role, returning its receiving end.
    ///
    /// Re-registering a role replaces the previous mailbox; in-flight
    /// requests to the old mailbox fail as unavailable.
    pub async fn register(&self, role: WorkerRole) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.mailboxes.write().await.insert(role, tx);
        mlog_debug!("MessageBus: registered mailbox for {}", role);
        rx
    }

    /// Check whether a role currently has a mailbox.
    pub async fn is_registered(&self, role: WorkerRole) -> bool {
        self.mailboxes.read().await.contains_key(&role)
    }

    /// Send a request to a role and await the worker's reply.
    pub async fn request(&self, role: WorkerRole, request: WorkerRequest) -> Result<WorkerResult> {
        let tx = {
            let mailboxes = self.mailboxes.read().await;
            mailboxes
                .get(&role)
                .cloned()
                .ok_or_else(|| Error::RoleUnavailable(role.to_string()))?
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        mlog_trace!("MessageBus: dispatching to {}", role);
        tx.send(Envelope {
            request,
            reply: reply_tx,
        })
        .await
        .map_err(|_| Error::RoleUnavailable(role.to_string()))?;

        reply_rx
            .await
            .map_err(|_| Error::WorkerFailure {
                role: role.to_string(),
                cause: "worker dropped the request without replying".to_string(),
            })
    }

    /// Send a request and await the reply, bounded by a deadline.
    pub async fn request_timeout(
        &self,
        role: WorkerRole,
        request: WorkerRequest,
        deadline: Duration,
    ) -> Result<WorkerResult> {
        match tokio::time::timeout(deadline, self.request(role, request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(deadline)),
        }
    }
}
