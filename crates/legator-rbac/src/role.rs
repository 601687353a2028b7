//! Roles, actions, and the static permit table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role ladder. Ordering is by privilege rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access to agents, runs, inventory, and audit.
    Viewer,
    /// Viewer plus run control, approvals, and chat.
    Operator,
    /// Everything, including device management and configuration.
    Admin,
}

impl Role {
    /// Numeric privilege rank.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Viewer => 1,
            Self::Operator => 2,
            Self::Admin => 3,
        }
    }

    /// The lower-privileged of two roles.
    #[must_use]
    pub fn lower(self, other: Self) -> Self {
        if self.rank() <= other.rank() {
            self
        } else {
            other
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Viewer => write!(f, "viewer"),
            Self::Operator => write!(f, "operator"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Every action the control plane authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// List and read agent records.
    ViewAgents,
    /// List and read run records.
    ViewRuns,
    /// Read device inventory.
    ViewInventory,
    /// Read audit summaries.
    ViewAudit,
    /// Trigger an agent run.
    RunAgent,
    /// Abort an in-flight run.
    AbortRun,
    /// Decide approval requests.
    Approve,
    /// Register, tag, and retire probes.
    ManageDevice,
    /// Change control-plane configuration and policies.
    Configure,
    /// Use the ChatOps surface.
    Chat,
}

impl Action {
    /// The read-only view actions.
    #[must_use]
    pub fn is_view(self) -> bool {
        matches!(
            self,
            Self::ViewAgents | Self::ViewRuns | Self::ViewInventory | Self::ViewAudit
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ViewAgents => "view-agents",
            Self::ViewRuns => "view-runs",
            Self::ViewInventory => "view-inventory",
            Self::ViewAudit => "view-audit",
            Self::RunAgent => "run-agent",
            Self::AbortRun => "abort-run",
            Self::Approve => "approve",
            Self::ManageDevice => "manage-device",
            Self::Configure => "configure",
            Self::Chat => "chat",
        };
        write!(f, "{s}")
    }
}

/// All actions, for permission listings.
pub const ALL_ACTIONS: &[Action] = &[
    Action::ViewAgents,
    Action::ViewRuns,
    Action::ViewInventory,
    Action::ViewAudit,
    Action::RunAgent,
    Action::AbortRun,
    Action::Approve,
    Action::ManageDevice,
    Action::Configure,
    Action::Chat,
];

/// The static permit table.
///
/// Admin permits everything; operator the view set plus run, abort, approve,
/// and chat; viewer only the view set.
#[must_use]
pub fn role_permits(role: Role, action: Action) -> bool {
    match role {
        Role::Admin => true,
        Role::Operator => {
            action.is_view()
                || matches!(
                    action,
                    Action::RunAgent | Action::AbortRun | Action::Approve | Action::Chat
                )
        }
        Role::Viewer => action.is_view(),
    }
}
