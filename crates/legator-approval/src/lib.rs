//! Legator Approval - the consent gate for actions above an agent's ceiling.
//!
//! When a run proposes an action whose tier exceeds the agent's autonomy
//! ceiling, the [`ApprovalManager`] persists an approval record, notifies the
//! configured channels, and polls the record until a human decides or the
//! request times out. Destructive and data-mutation tiers additionally
//! require *typed confirmation*: the approver must re-enter a random token
//! verbatim before the decision is accepted.
//!
//! # Approval Flow
//!
//! 1. Compute the deadline from the requested timeout (default 30 minutes)
//! 2. For destructive/data tiers, mint a `CONFIRM-<hex>` token and record it
//! 3. Persist the record in phase `Pending`
//! 4. Poll every `poll_interval` until a terminal phase, the deadline, or
//!    cancellation; late deadlines and cancellations mark the record Expired
//!
//! Decisions arrive out-of-band through [`ApprovalManager::decide`], which
//! validates typed confirmation and performs the one-shot phase transition.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod manager;
mod record;

pub use error::{ApprovalError, ApprovalResult};
pub use manager::{ApprovalManager, ApprovalOutcome, ApprovalParams, DecisionKind};
pub use record::{ApprovalPhase, ApprovalRecord, ProposedAction, TypedConfirmation};
