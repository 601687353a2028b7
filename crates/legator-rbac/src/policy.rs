//! Policies: subjects, roles, and scopes.

use globset::Glob;
use serde::{Deserialize, Serialize};

use crate::role::Role;

/// The identity an authenticated request acts as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable subject claim.
    pub subject: String,
    /// Email claim, when present.
    #[serde(default)]
    pub email: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Group memberships.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UserIdentity {
    /// Build an identity from a subject.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Set the email claim.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    /// Set the groups claim.
    #[must_use]
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    /// Values carried under a claim name.
    fn claim_values(&self, claim: &str) -> Vec<&str> {
        match claim {
            "email" => vec![self.email.as_str()],
            "sub" | "subject" => vec![self.subject.as_str()],
            "name" => vec![self.name.as_str()],
            "groups" => self.groups.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// One `(claim, value)` matcher; values accept a `*` glob suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectMatch {
    /// Claim name: `email`, `sub`, `groups`, ...
    pub claim: String,
    /// Exact value or `prefix*` glob.
    pub value: String,
}

impl SubjectMatch {
    /// Create a matcher.
    #[must_use]
    pub fn new(claim: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            value: value.into(),
        }
    }

    /// Whether the matcher admits the user.
    #[must_use]
    pub fn matches(&self, user: &UserIdentity) -> bool {
        user.claim_values(&self.claim)
            .iter()
            .any(|v| !v.is_empty() && glob_match(&self.value, v))
    }
}

/// Resource scope: any of tags, namespaces, or agent names may admit a
/// resource. An entirely empty scope admits everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Device/agent tag globs.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Namespace globs.
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Agent-name globs.
    #[serde(default)]
    pub agents: Vec<String>,
}

impl Scope {
    /// Whether this scope has no restrictions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.namespaces.is_empty() && self.agents.is_empty()
    }

    /// Whether a resource falls inside the scope.
    #[must_use]
    pub fn admits(&self, resource: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        self.tags
            .iter()
            .chain(&self.namespaces)
            .chain(&self.agents)
            .any(|pattern| glob_match(pattern, resource))
    }
}

/// A complete RBAC policy: who it applies to and what they get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacPolicy {
    /// Policy name; ties in resolution break lexicographically on this.
    pub name: String,
    /// Disjunction of subject matchers.
    pub subjects: Vec<SubjectMatch>,
    /// Granted role.
    pub role: Role,
    /// Resource scope.
    #[serde(default)]
    pub scope: Scope,
}

impl RbacPolicy {
    /// Whether any subject matcher admits the user.
    #[must_use]
    pub fn matches(&self, user: &UserIdentity) -> bool {
        self.subjects.iter().any(|s| s.matches(user))
    }
}

/// Glob match with `globset`; an unparsable pattern falls back to equality.
pub(crate) fn glob_match(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }
    Glob::new(pattern).map_or(pattern == value, |g| g.compile_matcher().is_match(value))
}
