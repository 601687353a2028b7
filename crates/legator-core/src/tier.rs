//! The action tier lattice and autonomy ceilings.
//!
//! Every action carries a *declared* tier (set by the caller) and a
//! *classified* tier (computed independently). Enforcement always compares
//! `max(declared, classified)` against the relevant ceiling, so a caller
//! claiming a lower tier never bypasses policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk classification of a single action.
///
/// Ordered from least to most dangerous; the ordering is load-bearing for
/// enforcement (`max(declared, classified)` and ceiling comparisons).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionTier {
    /// Pure read: no side effects on the target.
    Observe,
    /// Read plus active probing (network calls, device queries).
    Diagnose,
    /// Service mutation: restarts, config changes, package operations.
    Remediate,
    /// Mutation of stored data (databases, user files).
    DataMutation,
    /// Destructive, hard-to-reverse mutation (deletion, reformatting).
    DestructiveMutation,
}

impl ActionTier {
    /// Numeric rank, ascending with risk.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Observe => 1,
            Self::Diagnose => 2,
            Self::Remediate => 3,
            Self::DataMutation => 4,
            Self::DestructiveMutation => 5,
        }
    }

    /// Whether a decision on this tier requires typed confirmation.
    #[must_use]
    pub fn requires_typed_confirmation(self) -> bool {
        matches!(self, Self::DataMutation | Self::DestructiveMutation)
    }
}

impl fmt::Display for ActionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observe => write!(f, "observe"),
            Self::Diagnose => write!(f, "diagnose"),
            Self::Remediate => write!(f, "remediate"),
            Self::DataMutation => write!(f, "data-mutation"),
            Self::DestructiveMutation => write!(f, "destructive-mutation"),
        }
    }
}

impl std::str::FromStr for ActionTier {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observe" => Ok(Self::Observe),
            "diagnose" => Ok(Self::Diagnose),
            "remediate" | "service-mutation" => Ok(Self::Remediate),
            "data-mutation" => Ok(Self::DataMutation),
            "destructive-mutation" => Ok(Self::DestructiveMutation),
            other => Err(crate::error::CoreError::UnknownTier {
                value: other.to_string(),
            }),
        }
    }
}

/// The ceiling a probe-side policy enforces on executed commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyLevel {
    /// Only pure reads.
    Observe,
    /// Reads and active probing.
    Diagnose,
    /// Up to service mutation.
    Remediate,
}

impl PolicyLevel {
    /// The highest [`ActionTier`] this level admits.
    #[must_use]
    pub fn max_tier(self) -> ActionTier {
        match self {
            Self::Observe => ActionTier::Observe,
            Self::Diagnose => ActionTier::Diagnose,
            Self::Remediate => ActionTier::Remediate,
        }
    }

    /// Whether a command at `tier` may execute under this level.
    #[must_use]
    pub fn admits(self, tier: ActionTier) -> bool {
        tier <= self.max_tier()
    }
}

impl fmt::Display for PolicyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observe => write!(f, "observe"),
            Self::Diagnose => write!(f, "diagnose"),
            Self::Remediate => write!(f, "remediate"),
        }
    }
}

impl Default for PolicyLevel {
    fn default() -> Self {
        Self::Observe
    }
}

/// The maximum tier of action an agent may perform without approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutonomyCeiling {
    /// Read-only: anything beyond observation needs approval.
    Observe,
    /// May probe and propose; mutations need approval.
    Recommend,
    /// May mutate services autonomously; data/destructive need approval.
    AutomateSafe,
    /// Fully autonomous, including destructive actions.
    AutomateDestructive,
}

impl AutonomyCeiling {
    /// Numeric rank, ascending with autonomy.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Observe => 1,
            Self::Recommend => 2,
            Self::AutomateSafe => 3,
            Self::AutomateDestructive => 4,
        }
    }

    /// The highest [`ActionTier`] this ceiling permits without approval.
    #[must_use]
    pub fn max_tier(self) -> ActionTier {
        match self {
            Self::Observe => ActionTier::Observe,
            Self::Recommend => ActionTier::Diagnose,
            Self::AutomateSafe => ActionTier::Remediate,
            Self::AutomateDestructive => ActionTier::DestructiveMutation,
        }
    }

    /// Whether an action at `tier` needs an approval before executing.
    #[must_use]
    pub fn requires_approval(self, tier: ActionTier) -> bool {
        tier > self.max_tier()
    }
}

impl Default for AutonomyCeiling {
    fn default() -> Self {
        Self::Observe
    }
}

impl fmt::Display for AutonomyCeiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observe => write!(f, "observe"),
            Self::Recommend => write!(f, "recommend"),
            Self::AutomateSafe => write!(f, "automate-safe"),
            Self::AutomateDestructive => write!(f, "automate-destructive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(ActionTier::Observe < ActionTier::Diagnose);
        assert!(ActionTier::Diagnose < ActionTier::Remediate);
        assert!(ActionTier::Remediate < ActionTier::DataMutation);
        assert!(ActionTier::DataMutation < ActionTier::DestructiveMutation);
    }

    #[test]
    fn test_executed_tier_is_max_of_declared_and_classified() {
        let declared = ActionTier::Observe;
        let classified = ActionTier::Remediate;
        assert_eq!(declared.max(classified), ActionTier::Remediate);
    }

    #[test]
    fn test_policy_level_admits() {
        assert!(PolicyLevel::Observe.admits(ActionTier::Observe));
        assert!(!PolicyLevel::Observe.admits(ActionTier::Diagnose));
        assert!(PolicyLevel::Diagnose.admits(ActionTier::Diagnose));
        assert!(!PolicyLevel::Diagnose.admits(ActionTier::Remediate));
        assert!(PolicyLevel::Remediate.admits(ActionTier::Remediate));
        assert!(!PolicyLevel::Remediate.admits(ActionTier::DestructiveMutation));
    }

    #[test]
    fn test_autonomy_approval_boundary() {
        assert!(AutonomyCeiling::Observe.requires_approval(ActionTier::Diagnose));
        assert!(!AutonomyCeiling::Recommend.requires_approval(ActionTier::Diagnose));
        assert!(AutonomyCeiling::AutomateSafe.requires_approval(ActionTier::DataMutation));
        assert!(!AutonomyCeiling::AutomateDestructive.requires_approval(ActionTier::DestructiveMutation));
    }

    #[test]
    fn test_typed_confirmation_tiers() {
        assert!(!ActionTier::Remediate.requires_typed_confirmation());
        assert!(ActionTier::DataMutation.requires_typed_confirmation());
        assert!(ActionTier::DestructiveMutation.requires_typed_confirmation());
    }

    #[test]
    fn test_tier_serde_round_trip() {
        let json = serde_json::to_string(&ActionTier::DestructiveMutation).unwrap();
        assert_eq!(json, "\"destructive-mutation\"");
        let tier: ActionTier = serde_json::from_str(&json).unwrap();
        assert_eq!(tier, ActionTier::DestructiveMutation);
    }

    #[test]
    fn test_tier_from_str() {
        assert_eq!("observe".parse::<ActionTier>().unwrap(), ActionTier::Observe);
        assert_eq!(
            "service-mutation".parse::<ActionTier>().unwrap(),
            ActionTier::Remediate
        );
        assert!("root".parse::<ActionTier>().is_err());
    }
}
