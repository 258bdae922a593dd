//! Multi-role consensus over a shared design artifact.
//!
//! A coordinator broadcasts an artifact to a set of participant roles,
//! collects approve/reject votes plus structured suggestions within a
//! deadline, merges the suggestions into the artifact, and reports whether
//! the quorum was reached. Participants that fail or miss the deadline
//! count as non-approvals; they never block resolution.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::core::router::WorkerRole;
use crate::core::task::Task;
use crate::error::{Error, Result};
use crate::worker::WorkerRequest;
use crate::{mlog, mlog_debug, mlog_warn};

/// Policy concerns the default merge catalogue knows how to fold in.
const DEFAULT_CONCERNS: &[&str] = &[
    "rate-limiting",
    "caching",
    "authentication",
    "logging",
    "validation",
];

/// A consensus round: one artifact, a set of reviewing roles, a deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRequest {
    pub id: Uuid,
    /// The design artifact under review, shared by all participants.
    pub artifact: serde_json::Value,
    pub participants: Vec<WorkerRole>,
    /// Per-participant response deadline.
    pub deadline: Duration,
    /// Explicit quorum size. When absent, the coordinator's approval ratio
    /// decides: ceil(ratio * participants).
    #[serde(default)]
    pub required_approvals: Option<usize>,
}

impl ConsensusRequest {
    pub fn new(artifact: serde_json::Value, participants: Vec<WorkerRole>) -> Self {
        Self {
            id: Uuid::new_v4(),
            artifact,
            participants,
            deadline: Duration::from_millis(30_000),
            required_approvals: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Override the computed quorum. Clamped to [1, participant count] at
    /// resolution.
    pub fn with_required_approvals(mut self, required: usize) -> Self {
        self.required_approvals = Some(required);
        self
    }
}

/// A structured change a participant proposes to the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Suggestion {
    /// Add a field to the artifact's schema section.
    AddField { name: String, field_type: String },
    /// Enable a cross-cutting policy (see the known concern catalogue).
    AddPolicy { concern: String },
    /// Free-form remark, carried through as feedback.
    Note { text: String },
}

fn default_confidence() -> f64 {
    1.0
}

/// One participant's vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResponse {
    pub approve: bool,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    #[serde(default)]
    pub feedback: Option<String>,
    /// How certain the participant is of its vote, in [0,1].
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl ConsensusResponse {
    pub fn approve() -> Self {
        Self {
            approve: true,
            suggestions: Vec::new(),
            feedback: None,
            confidence: 1.0,
        }
    }

    pub fn reject(feedback: &str) -> Self {
        Self {
            approve: false,
            suggestions: Vec::new(),
            feedback: Some(feedback.to_string()),
            confidence: 1.0,
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<Suggestion>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// One recorded vote, attributed to its role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub role: WorkerRole,
    pub approve: bool,
    pub confidence: f64,
}

/// Result of a resolved consensus round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub request_id: Uuid,
    /// Whether the approval quorum was reached.
    pub approved: bool,
    pub approvals: usize,
    pub required_approvals: usize,
    /// Every vote that arrived before the deadline, attributed by role.
    pub votes: Vec<Vote>,
    /// The artifact with all recognized suggestions folded in.
    pub artifact: serde_json::Value,
    /// Remarks and unrecognized suggestions, attributed by role.
    pub feedback: Vec<String>,
}

/// Effect of applying one suggestion to an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeEffect {
    Applied,
    AlreadyPresent,
    Unrecognized,
}

/// Folds suggestions into an artifact. Application is idempotent: a
/// suggestion whose change is already present is a no-op.
///
/// The concern catalogue is data, not code; hosts extend the recognized
/// cross-cutting policies without touching the merge logic.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    concerns: Vec<String>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            concerns: DEFAULT_CONCERNS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl MergePolicy {
    /// A merge policy recognizing a caller-supplied concern catalogue.
    pub fn with_concerns(concerns: Vec<String>) -> Self {
        Self { concerns }
    }

    fn apply(&self, artifact: &mut serde_json::Value, suggestion: &Suggestion) -> MergeEffect {
        match suggestion {
            Suggestion::AddField { name, field_type } => {
                let schema = ensure_object(artifact, "schema");
                if schema.get(name).and_then(|v| v.as_str()) == Some(field_type) {
                    return MergeEffect::AlreadyPresent;
                }
                schema.insert(
                    name.clone(),
                    serde_json::Value::String(field_type.clone()),
                );
                MergeEffect::Applied
            }
            Suggestion::AddPolicy { concern } => {
                if !self.concerns.iter().any(|c| c == concern) {
                    return MergeEffect::Unrecognized;
                }
                let policies = ensure_object(artifact, "policies");
                if policies.get(concern).and_then(|v| v.as_bool()) == Some(true) {
                    return MergeEffect::AlreadyPresent;
                }
                policies.insert(concern.clone(), serde_json::Value::Bool(true));
                MergeEffect::Applied
            }
            Suggestion::Note { .. } => MergeEffect::Unrecognized,
        }
    }
}

/// Get-or-create a named object section of the artifact.
fn ensure_object<'a>(
    artifact: &'a mut serde_json::Value,
    key: &str,
) -> &'a mut serde_json::Map<String, serde_json::Value> {
    if !artifact.is_object() {
        *artifact = serde_json::Value::Object(Default::default());
    }
    let root = artifact.as_object_mut().unwrap();
    let entry = root
        .entry(key.to_string())
        .or_insert_with(|| serde_json::Value::Object(Default::default()));
    if !entry.is_object() {
        *entry = serde_json::Value::Object(Default::default());
    }
    entry.as_object_mut().unwrap()
}

/// Runs consensus rounds over the message bus.
pub struct ConsensusCoordinator {
    bus: Arc<MessageBus>,
    approval_ratio: f64,
    merge: MergePolicy,
}

impl ConsensusCoordinator {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            approval_ratio: 0.7,
            merge: MergePolicy::default(),
        }
    }

    /// Fraction of participants that must approve. Clamped to (0, 1].
    pub fn with_approval_ratio(mut self, ratio: f64) -> Self {
        self.approval_ratio = ratio.clamp(f64::MIN_POSITIVE, 1.0);
        self
    }

    /// Replace the suggestion-merge catalogue.
    pub fn with_merge_policy(mut self, merge: MergePolicy) -> Self {
        self.merge = merge;
        self
    }

    /// Resolve one consensus round.
    ///
    /// Every participant is asked concurrently; each gets the same
    /// artifact and the request deadline. Suggestions are folded into the
    /// artifact only when the quorum is reached; a rejected round returns
    /// the artifact untouched, with the proposed changes carried in the
    /// aggregated feedback instead.
    pub async fn resolve(&self, request: ConsensusRequest) -> Result<ConsensusOutcome> {
        if request.participants.is_empty() {
            return Err(Error::EmptyConsensus {
                request_id: request.id.to_string(),
            });
        }

        let required = match request.required_approvals {
            Some(n) => n.clamp(1, request.participants.len()),
            None => self.required_approvals(request.participants.len()),
        };
        mlog!(
            "ConsensusCoordinator: round {} with {} participants, {} approvals required",
            request.id,
            request.participants.len(),
            required
        );

        let ballots = request.participants.iter().map(|&role| {
            let bus = self.bus.clone();
            let worker_request = WorkerRequest::new(
                Task::new("review the proposed design artifact", "consensus-review"),
                serde_json::json!({
                    "request_id": request.id,
                    "artifact": request.artifact.clone(),
                }),
            );
            let deadline = request.deadline;
            async move { (role, bus.request_timeout(role, worker_request, deadline).await) }
        });
        let ballots = futures::future::join_all(ballots).await;

        let mut approvals = 0;
        let mut votes = Vec::new();
        let mut feedback = Vec::new();
        let mut proposals: Vec<(WorkerRole, Suggestion)> = Vec::new();

        for (role, ballot) in ballots {
            let response = match ballot {
                Ok(reply) if reply.success => {
                    match serde_json::from_value::<ConsensusResponse>(reply.data) {
                        Ok(response) => response,
                        Err(err) => {
                            mlog_warn!("{} returned a malformed ballot: {}", role, err);
                            feedback.push(format!("{role}: malformed ballot ({err})"));
                            continue;
                        }
                    }
                }
                Ok(reply) => {
                    let cause = reply.error.unwrap_or_else(|| "worker failure".to_string());
                    mlog_warn!("{} failed to vote: {}", role, cause);
                    feedback.push(format!("{role}: failed ({cause})"));
                    continue;
                }
                Err(err) => {
                    mlog_warn!("{} did not vote: {}", role, err);
                    feedback.push(format!("{role}: no response ({err})"));
                    continue;
                }
            };

            votes.push(Vote {
                role,
                approve: response.approve,
                confidence: response.confidence,
            });
            if response.approve {
                approvals += 1;
            }
            if let Some(text) = response.feedback {
                feedback.push(format!("{role}: {text}"));
            }
            for suggestion in response.suggestions {
                match suggestion {
                    Suggestion::Note { text } => feedback.push(format!("{role}: {text}")),
                    other => proposals.push((role, other)),
                }
            }
        }

        let approved = approvals >= required;

        // Proposed changes touch the artifact only once the quorum holds;
        // a rejected round hands the artifact back unpatched.
        let mut artifact = request.artifact.clone();
        if approved {
            for (role, suggestion) in &proposals {
                match self.merge.apply(&mut artifact, suggestion) {
                    MergeEffect::Applied => {
                        mlog_debug!("merged suggestion from {}: {:?}", role, suggestion);
                    }
                    MergeEffect::AlreadyPresent => {}
                    MergeEffect::Unrecognized => {
                        feedback.push(format!("{role}: unrecognized suggestion {suggestion:?}"))
                    }
                }
            }
        } else {
            for (role, suggestion) in &proposals {
                feedback.push(format!("{role}: unapplied suggestion {suggestion:?}"));
            }
        }
        mlog!(
            "ConsensusCoordinator: round {} resolved: {}/{} approvals ({})",
            request.id,
            approvals,
            required,
            if approved { "approved" } else { "rejected" }
        );

        Ok(ConsensusOutcome {
            request_id: request.id,
            approved,
            approvals,
            required_approvals: required,
            votes,
            artifact,
            feedback,
        })
    }

    fn required_approvals(&self, participants: usize) -> usize {
        ((self.approval_ratio * participants as f64).ceil() as usize).clamp(1, participants)
    }
}
