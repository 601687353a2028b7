//! Legator A2A - asynchronous delegation between agents.
//!
//! One agent hands work to another by writing a task event into the shared
//! store; the target agent polls for pending tasks on its next run and
//! reports status back through label transitions. Delivery is
//! priority-ordered and survives control-plane restarts because the store is
//! the only state.
//!
//! Status labels move monotonically through
//! `pending → accepted → in-progress → {completed, failed, rejected,
//! expired}`; concurrent writers are reconciled by the store's optimistic
//! concurrency, with a bounded retry here.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod router;
mod task;
mod tools;

pub use router::{A2aError, A2aResult, TaskRouter};
pub use task::{A2aTask, DelegationRequest, TaskPriority, TaskStatus};
pub use tools::{A2aCheckTasksTool, A2aDelegateTool};
