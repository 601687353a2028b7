//! Approval record types.

use legator_core::{ActionTier, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle phase of an approval request.
///
/// Transitions are monotonic: `Pending` moves exactly once into one of the
/// terminal phases and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalPhase {
    /// Waiting for a decision.
    Pending,
    /// A user approved the action.
    Approved,
    /// A user denied the action.
    Denied,
    /// The deadline passed without a decision.
    Expired,
}

impl ApprovalPhase {
    /// Terminal phases are immutable.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Approved => write!(f, "Approved"),
            Self::Denied => write!(f, "Denied"),
            Self::Expired => write!(f, "Expired"),
        }
    }
}

/// The action an approval request gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Tool that would execute, e.g. `probe.exec`.
    pub tool: String,
    /// Executed tier of the action.
    pub tier: ActionTier,
    /// Target host or resource.
    pub target: String,
    /// Human-readable description.
    pub description: String,
    /// Tool arguments, for display and audit.
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

/// Typed-confirmation metadata for destructive and data-mutation tiers.
///
/// The token is also surfaced in the request's context text so every
/// delivery channel can display it; treat channels that archive context as
/// part of the audit surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedConfirmation {
    /// Always true when this struct is present.
    pub required: bool,
    /// Token the approver must re-enter verbatim.
    pub token: String,
    /// Accepting a decision after this instant fails with `expired`.
    pub expires_at: Timestamp,
}

/// One persisted approval request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Record identifier.
    pub id: String,
    /// Agent whose run proposed the action.
    pub agent: String,
    /// Run the request belongs to.
    pub run: String,
    /// The gated action.
    pub action: ProposedAction,
    /// Context text shown to approvers.
    pub context: String,
    /// Notification channels for this request.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Current phase.
    pub phase: ApprovalPhase,
    /// Deadline after which the request expires.
    pub deadline: Timestamp,
    /// Typed-confirmation metadata, present for destructive/data tiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typed_confirmation: Option<TypedConfirmation>,
    /// Identity that decided the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    /// When the decision was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<Timestamp>,
    /// Reason attached to the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalRecord {
    /// Whether a decision on this record needs typed confirmation.
    #[must_use]
    pub fn confirmation_required(&self) -> bool {
        self.typed_confirmation
            .as_ref()
            .is_some_and(|c| c.required)
    }
}
