//! A2A task types.

use legator_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Delivery priority; pending tasks are returned highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Background work.
    Low,
    /// Default.
    Normal,
    /// Ahead of normal traffic.
    High,
    /// Delivered before everything else.
    Critical,
}

impl TaskPriority {
    /// Numeric rank, ascending with urgency.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    /// Parse from a label value; unknown values read as `Normal`.
    #[must_use]
    pub fn from_label(s: &str) -> Self {
        match s {
            "low" => Self::Low,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Normal,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Task lifecycle status, carried as a store label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Waiting for the target agent.
    Pending,
    /// Target agent acknowledged the task.
    Accepted,
    /// Target agent is working on it.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Target agent refused the task.
    Rejected,
    /// Aged out before being picked up.
    Expired,
}

impl TaskStatus {
    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(
                next,
                Self::Accepted | Self::InProgress | Self::Rejected | Self::Expired | Self::Failed
            ),
            Self::Accepted => matches!(next, Self::InProgress | Self::Completed | Self::Failed),
            Self::InProgress => matches!(next, Self::Completed | Self::Failed),
            Self::Completed | Self::Failed | Self::Rejected | Self::Expired => false,
        }
    }

    /// Terminal statuses never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Rejected | Self::Expired
        )
    }

    /// Parse from a label value.
    #[must_use]
    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "in-progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// A delegation request from one agent to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRequest {
    /// Delegating agent.
    pub source: String,
    /// Agent the work is for.
    pub target: String,
    /// Free-form task kind; defaults to `general`.
    #[serde(default)]
    pub task_type: Option<String>,
    /// Delivery priority; defaults to `normal`.
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    /// What the target agent should do.
    pub description: String,
    /// Structured context handed to the target agent.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
}

/// One task as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct A2aTask {
    /// Task identifier.
    pub id: String,
    /// Delegating agent.
    pub source: String,
    /// Agent the work is for.
    pub target: String,
    /// Task kind.
    pub task_type: String,
    /// Delivery priority.
    pub priority: TaskPriority,
    /// Current status.
    pub status: TaskStatus,
    /// What the target agent should do.
    pub description: String,
    /// Structured context handed to the target agent.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Result text reported by the target agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Server-assigned creation time.
    pub created_at: Timestamp,
    /// Optional expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
}
