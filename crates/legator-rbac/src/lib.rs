//! Legator RBAC - the decision engine behind every external surface.
//!
//! This crate provides:
//! - The role ladder (`viewer < operator < admin`) and its static permit table
//! - Policies: subject matchers, a role, and a resource scope
//! - [`resolve_policy`]: deterministic best-match selection for a user
//! - [`authorize`]: role permit plus scope admission
//! - [`compose_decision`]: base-plus-overlay composition that can only ever
//!   clamp privilege, never raise it
//!
//! Every function here is pure; callers audit the returned [`Decision`].

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod engine;
mod policy;
mod role;

pub use engine::{authorize, compose_decision, resolve_policy, Decision};
pub use policy::{RbacPolicy, Scope, SubjectMatch, UserIdentity};
pub use role::{role_permits, Action, Role, ALL_ACTIONS};
