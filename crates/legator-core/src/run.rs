//! Run records: the immutable account of one execution attempt.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tier::ActionTier;
use crate::types::{AgentKey, RunId, Timestamp};

/// What caused a run to be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Cron schedule fired.
    Scheduled,
    /// Webhook endpoint was hit.
    Webhook,
    /// Operator requested a run through the API.
    Manual,
    /// Declarative-store annotation (`run-now`) was consumed.
    Annotation,
    /// Another agent delegated work.
    A2a,
}

impl Trigger {
    /// Webhook triggers get burst headroom from the rate limiter.
    #[must_use]
    pub fn is_webhook(self) -> bool {
        matches!(self, Self::Webhook)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Webhook => write!(f, "webhook"),
            Self::Manual => write!(f, "manual"),
            Self::Annotation => write!(f, "annotation"),
            Self::A2a => write!(f, "a2a"),
        }
    }
}

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunPhase {
    /// Admitted but not yet executing.
    Pending,
    /// Executing.
    Running,
    /// Finished without error.
    Succeeded,
    /// Finished with an error or was aborted.
    Failed,
}

impl RunPhase {
    /// Terminal phases never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Outcome of a single tool action inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Executed successfully.
    Ok,
    /// Refused by policy or a denied approval.
    Blocked,
    /// Skipped (for example, a denied precondition).
    Skipped,
    /// Executed but failed.
    Error,
}

/// One tool action taken (or refused) during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Tool name, e.g. `probe.exec` or `k8s.rollout_restart`.
    pub tool: String,
    /// Target of the action (host, resource, URL).
    pub target: String,
    /// Executed tier: `max(declared, classified)`.
    pub tier: ActionTier,
    /// Outcome.
    pub status: ActionStatus,
    /// Why the action was blocked, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

/// Immutable record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub id: RunId,
    /// Which agent ran.
    pub agent: AgentKey,
    /// What admitted the run.
    pub trigger: Trigger,
    /// Model actually used.
    pub model: String,
    /// When the run was admitted.
    pub started_at: Timestamp,
    /// When the run reached a terminal phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// Current phase.
    pub phase: RunPhase,
    /// Iterations consumed.
    pub iterations: u32,
    /// Tokens consumed.
    pub tokens_used: u64,
    /// Final report text.
    pub report: String,
    /// Ordered actions taken during the run.
    pub actions: Vec<ActionRecord>,
}

impl RunRecord {
    /// Create a pending record for a freshly admitted run.
    #[must_use]
    pub fn admitted(agent: AgentKey, trigger: Trigger, model: impl Into<String>) -> Self {
        Self {
            id: RunId::new(),
            agent,
            trigger,
            model: model.into(),
            started_at: Timestamp::now(),
            completed_at: None,
            phase: RunPhase::Pending,
            iterations: 0,
            tokens_used: 0,
            report: String::new(),
            actions: Vec::new(),
        }
    }

    /// Transition into a terminal phase, stamping the completion time.
    ///
    /// Non-terminal phases are rejected so a finished run can never be
    /// resurrected into `Running`.
    pub fn complete(&mut self, phase: RunPhase, report: impl Into<String>) {
        debug_assert!(phase.is_terminal());
        if self.phase.is_terminal() {
            return;
        }
        self.phase = phase;
        self.report = report.into();
        self.completed_at = Some(Timestamp::now());
    }
}
