//! The probe-side policy record, replaced whole on `policy_update`.

use legator_core::PolicyLevel;
use serde::{Deserialize, Serialize};

/// Local policy a probe enforces on every inbound command.
///
/// Policies are replaced as a whole record; there is no field-level patching,
/// so in-flight executions keep the policy they started under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbePolicy {
    /// Server-assigned policy identifier.
    pub id: String,
    /// Highest tier of command this probe may execute.
    pub level: PolicyLevel,
    /// When non-empty, only these base commands may run.
    #[serde(default)]
    pub allowed: Vec<String>,
    /// Command prefixes that are always refused.
    #[serde(default)]
    pub blocked: Vec<String>,
    /// Filesystem prefixes commands may reference; advisory for tooling.
    #[serde(default)]
    pub path_restrictions: Vec<String>,
}

impl ProbePolicy {
    /// A policy with the given level and no lists.
    #[must_use]
    pub fn with_level(id: impl Into<String>, level: PolicyLevel) -> Self {
        Self {
            id: id.into(),
            level,
            ..Self::default()
        }
    }
}
