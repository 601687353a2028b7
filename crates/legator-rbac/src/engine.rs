//! Policy resolution, authorization, and non-escalating composition.

use crate::policy::{RbacPolicy, UserIdentity};
use crate::role::{role_permits, Action, Role};

/// The outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the action may proceed.
    pub allowed: bool,
    /// Machine-readable reason, always set on deny.
    pub reason: String,
    /// Name of the policy the decision rests on.
    pub policy: Option<String>,
    /// The effective role the decision was made at.
    pub role: Option<Role>,
}

impl Decision {
    fn allow(policy: &RbacPolicy) -> Self {
        Self {
            allowed: true,
            reason: String::new(),
            policy: Some(policy.name.clone()),
            role: Some(policy.role),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            policy: None,
            role: None,
        }
    }
}

/// Pick the policy that applies to a user.
///
/// The matching policy with the highest role rank wins; ties break on the
/// lexicographically smallest name so resolution is deterministic across
/// replicas.
#[must_use]
pub fn resolve_policy<'a>(
    user: &UserIdentity,
    policies: &'a [RbacPolicy],
) -> Option<&'a RbacPolicy> {
    policies
        .iter()
        .filter(|p| p.matches(user))
        .min_by(|a, b| {
            b.role
                .rank()
                .cmp(&a.role.rank())
                .then_with(|| a.name.cmp(&b.name))
        })
}

/// Authorize `action` on `resource` for `user`.
///
/// Resolves the user's policy, checks the role permit table, and, when
/// `resource` is non-empty, requires the policy scope to admit it.
#[must_use]
pub fn authorize(
    user: &UserIdentity,
    action: Action,
    resource: &str,
    policies: &[RbacPolicy],
) -> Decision {
    let Some(policy) = resolve_policy(user, policies) else {
        tracing::debug!(subject = %user.subject, %action, "no policy matches user");
        return Decision::deny(format!("no policy matches subject {}", user.subject));
    };

    if !role_permits(policy.role, action) {
        return Decision {
            allowed: false,
            reason: format!("role {} does not permit {action}", policy.role),
            policy: Some(policy.name.clone()),
            role: Some(policy.role),
        };
    }

    if !resource.is_empty() && !policy.scope.admits(resource) {
        return Decision {
            allowed: false,
            reason: format!("resource {resource} outside scope of policy {}", policy.name),
            policy: Some(policy.name.clone()),
            role: Some(policy.role),
        };
    }

    Decision::allow(policy)
}

/// Compose a base decision with an overlay policy.
///
/// The overlay can only clamp: a denied base passes through unchanged, the
/// effective role is the lower rank of the two, and a non-empty resource
/// must also be admitted by the overlay's scope. The overlay can never grant
/// an action the base already denied, nor raise the base role.
#[must_use]
pub fn compose_decision(
    base: &Decision,
    base_policy: &RbacPolicy,
    overlay: &RbacPolicy,
    action: Action,
    resource: &str,
) -> Decision {
    if !base.allowed {
        return base.clone();
    }

    let effective = base_policy.role.lower(overlay.role);
    if !role_permits(effective, action) {
        return Decision {
            allowed: false,
            reason: format!(
                "role clamped to {effective} by policies {} and {}; {effective} does not permit {action}",
                base_policy.name, overlay.name
            ),
            policy: Some(overlay.name.clone()),
            role: Some(effective),
        };
    }

    if !resource.is_empty() && !overlay.scope.admits(resource) {
        return Decision {
            allowed: false,
            reason: format!(
                "resource {resource} outside scope of overlay policy {}",
                overlay.name
            ),
            policy: Some(overlay.name.clone()),
            role: Some(effective),
        };
    }

    Decision {
        allowed: true,
        reason: String::new(),
        policy: Some(overlay.name.clone()),
        role: Some(effective),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Scope, SubjectMatch};

    fn policy(name: &str, role: Role) -> RbacPolicy {
        RbacPolicy {
            name: name.into(),
            subjects: vec![SubjectMatch::new("sub", "*")],
            role,
            scope: Scope::default(),
        }
    }

    fn scoped_policy(name: &str, role: Role, agents: &[&str]) -> RbacPolicy {
        RbacPolicy {
            scope: Scope {
                agents: agents.iter().map(ToString::to_string).collect(),
                ..Scope::default()
            },
            ..policy(name, role)
        }
    }

    fn user() -> UserIdentity {
        UserIdentity::new("u-1").with_email("dev@example.com")
    }

    #[test]
    fn test_resolve_highest_rank_wins() {
        let policies = vec![policy("viewer-all", Role::Viewer), policy("ops", Role::Operator)];
        assert_eq!(resolve_policy(&user(), &policies).unwrap().name, "ops");
    }

    #[test]
    fn test_resolve_ties_break_on_name() {
        let policies = vec![policy("zeta", Role::Operator), policy("alpha", Role::Operator)];
        assert_eq!(resolve_policy(&user(), &policies).unwrap().name, "alpha");
    }

    #[test]
    fn test_authorize_no_policy() {
        let decision = authorize(&user(), Action::ViewRuns, "", &[]);
        assert!(!decision.allowed);
        assert!(decision.reason.contains("no policy"));
    }

    #[test]
    fn test_authorize_role_denied() {
        let policies = vec![policy("viewer", Role::Viewer)];
        let decision = authorize(&user(), Action::RunAgent, "", &policies);
        assert!(!decision.allowed);
        assert!(decision.reason.contains("does not permit"));
        assert_eq!(decision.role, Some(Role::Viewer));
    }

    #[test]
    fn test_authorize_scope() {
        let policies = vec![scoped_policy("scoped", Role::Operator, &["disk-*"])];
        assert!(authorize(&user(), Action::RunAgent, "disk-cleaner", &policies).allowed);
        let denied = authorize(&user(), Action::RunAgent, "db-migrator", &policies);
        assert!(!denied.allowed);
        assert!(denied.reason.contains("outside scope"));

        // Empty resource skips scope checks.
        assert!(authorize(&user(), Action::RunAgent, "", &policies).allowed);
    }

    #[test]
    fn test_compose_base_deny_passes_through() {
        let base_policy = policy("rbac-viewer", Role::Viewer);
        let overlay = policy("userpolicy-admin", Role::Admin);
        let base = authorize(&user(), Action::Configure, "", &[base_policy.clone()]);
        assert!(!base.allowed);

        let composed = compose_decision(&base, &base_policy, &overlay, Action::Configure, "");
        assert_eq!(composed, base);
    }

    #[test]
    fn test_compose_overlay_cannot_escalate() {
        // Base operator, overlay admin: effective role stays operator, so
        // admin-only actions are denied with the clamp cited.
        let base_policy = policy("rbac-operator", Role::Operator);
        let overlay = policy("userpolicy-admin", Role::Admin);
        let base = authorize(&user(), Action::RunAgent, "", &[base_policy.clone()]);
        assert!(base.allowed);

        let composed = compose_decision(&base, &base_policy, &overlay, Action::Configure, "");
        assert!(!composed.allowed);
        assert!(composed.reason.contains("clamped"));
        assert!(composed.reason.contains("rbac-operator"));
        assert!(composed.reason.contains("userpolicy-admin"));
        assert_eq!(composed.role, Some(Role::Operator));
    }

    #[test]
    fn test_compose_overlay_clamps_down() {
        let base_policy = policy("rbac-admin", Role::Admin);
        let overlay = policy("userpolicy-viewer", Role::Viewer);
        let base = authorize(&user(), Action::RunAgent, "", &[base_policy.clone()]);
        assert!(base.allowed);

        let composed = compose_decision(&base, &base_policy, &overlay, Action::RunAgent, "");
        assert!(!composed.allowed);
        assert_eq!(composed.role, Some(Role::Viewer));
    }

    #[test]
    fn test_compose_overlay_scope_also_applies() {
        let base_policy = policy("rbac-operator", Role::Operator);
        let overlay = scoped_policy("userpolicy-scoped", Role::Operator, &["edge-*"]);
        let base = authorize(&user(), Action::RunAgent, "core-1", &[base_policy.clone()]);
        assert!(base.allowed);

        let composed = compose_decision(&base, &base_policy, &overlay, Action::RunAgent, "core-1");
        assert!(!composed.allowed);
        assert!(composed.reason.contains("outside scope"));

        let admitted = compose_decision(&base, &base_policy, &overlay, Action::RunAgent, "edge-3");
        assert!(admitted.allowed);
        assert_eq!(admitted.role, Some(Role::Operator));
    }

    #[test]
    fn test_compose_allows_when_both_permit() {
        let base_policy = policy("rbac-admin", Role::Admin);
        let overlay = policy("userpolicy-admin", Role::Admin);
        let base = authorize(&user(), Action::Configure, "", &[base_policy.clone()]);
        let composed = compose_decision(&base, &base_policy, &overlay, Action::Configure, "");
        assert!(composed.allowed);
        assert_eq!(composed.role, Some(Role::Admin));
    }
}
