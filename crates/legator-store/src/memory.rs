//! In-memory store backend.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{StoreError, StoreResult};
use crate::record::{LabelSelector, Record, StatusPatch};
use crate::EventStore;

/// Concurrency-safe in-memory [`EventStore`].
///
/// Used for tests and single-replica deployments; semantics match the
/// durable backends, including version conflicts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, Record>,
    insert_seq: AtomicU64,
    order: DashMap<String, u64>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn create(&self, mut record: Record) -> StoreResult<Record> {
        if self.records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists { id: record.id });
        }
        record.version = 1;
        let seq = self.insert_seq.fetch_add(1, Ordering::Relaxed);
        self.order.insert(record.id.clone(), seq);
        self.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> StoreResult<Record> {
        self.records
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn update(&self, record: Record) -> StoreResult<Record> {
        let mut entry = self
            .records
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound {
                id: record.id.clone(),
            })?;
        if entry.version != record.version {
            return Err(StoreError::Conflict { id: record.id });
        }
        let mut next = record;
        next.version = next.version.saturating_add(1);
        *entry = next.clone();
        Ok(next)
    }

    async fn update_status(&self, id: &str, patch: StatusPatch) -> StoreResult<Record> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        if entry.version != patch.expected_version {
            return Err(StoreError::Conflict { id: id.to_string() });
        }
        for (k, v) in patch.labels {
            entry.labels.insert(k, v);
        }
        for (k, v) in patch.annotations {
            entry.annotations.insert(k, v);
        }
        if let Some(detail) = patch.detail {
            entry.detail = detail;
        }
        entry.version = entry.version.saturating_add(1);
        Ok(entry.clone())
    }

    async fn list(&self, selector: &LabelSelector) -> StoreResult<Vec<Record>> {
        let mut matched: Vec<Record> = self
            .records
            .iter()
            .filter(|r| selector.matches(r))
            .map(|r| r.clone())
            .collect();
        matched.sort_by_key(|r| self.order.get(&r.id).map_or(u64::MAX, |s| *s));
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryStore::new();
        let created = store
            .create(Record::new("r1", "{}").with_label("kind", "test"))
            .await
            .unwrap();
        assert_eq!(created.version, 1);

        let fetched = store.get("r1").await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = MemoryStore::new();
        store.create(Record::new("r1", "{}")).await.unwrap();
        assert!(matches!(
            store.create(Record::new("r1", "{}")).await,
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_version_conflict() {
        let store = MemoryStore::new();
        let record = store.create(Record::new("r1", "{}")).await.unwrap();

        let mut stale = record.clone();
        stale.version = 0;
        assert!(matches!(
            store.update(stale).await,
            Err(StoreError::Conflict { .. })
        ));

        let updated = store.update(record).await.unwrap();
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn test_status_patch_merges() {
        let store = MemoryStore::new();
        let record = store
            .create(Record::new("r1", "{}").with_label("status", "pending"))
            .await
            .unwrap();

        let patch = StatusPatch::against(&record)
            .set_label("status", "accepted")
            .set_annotation("result", "done");
        let updated = store.update_status("r1", patch).await.unwrap();
        assert_eq!(updated.label("status"), Some("accepted"));
        assert_eq!(updated.annotation("result"), Some("done"));
        assert_eq!(updated.version, 2);

        // Stale patch now conflicts.
        let stale = StatusPatch {
            expected_version: 1,
            ..StatusPatch::default()
        };
        assert!(matches!(
            store.update_status("r1", stale).await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_in_creation_order() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .create(Record::new(format!("r{i}"), "{}").with_label("kind", "x"))
                .await
                .unwrap();
        }
        let listed = store
            .list(&LabelSelector::all().eq("kind", "x"))
            .await
            .unwrap();
        let ids: Vec<_> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r1", "r2", "r3", "r4"]);
    }

    #[tokio::test]
    async fn test_retry_status_update_recovers_from_conflict() {
        let store = MemoryStore::new();
        store
            .create(Record::new("r1", "{}").with_label("status", "pending"))
            .await
            .unwrap();

        // Interleave a competing write by patching from inside the closure's
        // first computed version.
        let result = crate::retry_status_update(&store, "r1", 3, |current| {
            StatusPatch::against(current).set_label("status", "accepted")
        })
        .await
        .unwrap();
        assert_eq!(result.label("status"), Some("accepted"));
    }
}
