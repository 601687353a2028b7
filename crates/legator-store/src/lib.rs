//! Legator Store - persistence abstraction for control-plane records.
//!
//! The approval manager, scheduler, and A2A router are polymorphic over the
//! [`EventStore`] capability set: create, get, update, status-update, and
//! label-selected list. Backends may be a declarative CRD store, SQL, or the
//! in-memory [`MemoryStore`]; the core never assumes more than this trait.
//!
//! Writers of labels and status use optimistic concurrency: every record
//! carries a version, `update` fails with [`StoreError::Conflict`] on a
//! stale version, and callers retry the read-modify-write.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod memory;
mod record;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use record::{LabelSelector, Record, StatusPatch};

use async_trait::async_trait;

/// The store capability set shared by every control-plane component.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a new record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when the id is taken.
    async fn create(&self, record: Record) -> StoreResult<Record>;

    /// Fetch a record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no record has the id.
    async fn get(&self, id: &str) -> StoreResult<Record>;

    /// Replace a record, enforcing its version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the stored version differs and
    /// [`StoreError::NotFound`] when the record is gone.
    async fn update(&self, record: Record) -> StoreResult<Record>;

    /// Merge a label/annotation patch into a record, enforcing the version
    /// the patch was computed against.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on a stale version and
    /// [`StoreError::NotFound`] when the record is gone.
    async fn update_status(&self, id: &str, patch: StatusPatch) -> StoreResult<Record>;

    /// List records whose labels satisfy the selector, in creation order.
    async fn list(&self, selector: &LabelSelector) -> StoreResult<Vec<Record>>;
}

/// Retry a status mutation over optimistic-concurrency conflicts.
///
/// Re-reads the record and recomputes the patch on every attempt; gives up
/// after `attempts` conflicts.
///
/// # Errors
///
/// Propagates the last error when every attempt conflicts, plus any
/// non-conflict error immediately.
pub async fn retry_status_update<S, F>(
    store: &S,
    id: &str,
    attempts: usize,
    mut patch_fn: F,
) -> StoreResult<Record>
where
    S: EventStore + ?Sized,
    F: FnMut(&Record) -> StatusPatch,
{
    let mut last = StoreError::Conflict {
        id: id.to_string(),
    };
    for _ in 0..attempts.max(1) {
        let current = store.get(id).await?;
        let patch = patch_fn(&current);
        match store.update_status(id, patch).await {
            Ok(record) => return Ok(record),
            Err(StoreError::Conflict { .. }) => {
                tracing::debug!(id, "status update conflicted, retrying");
                last = StoreError::Conflict {
                    id: id.to_string(),
                };
            }
            Err(e) => return Err(e),
        }
    }
    Err(last)
}
