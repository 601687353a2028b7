//! Generic labelled records and selectors.

use legator_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A persisted control-plane record: labels for indexing, annotations for
/// free-form metadata, and a detail document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record identifier, unique within the store.
    pub id: String,
    /// Indexed labels; selectors match on these.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Non-indexed metadata.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Serialized payload document.
    pub detail: String,
    /// Server-assigned creation time.
    pub created_at: Timestamp,
    /// Optimistic-concurrency version, bumped on every write.
    pub version: u64,
}

impl Record {
    /// Create a record with a fresh creation time and version zero.
    #[must_use]
    pub fn new(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            detail: detail.into(),
            created_at: Timestamp::now(),
            version: 0,
        }
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Read a label value.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Read an annotation value.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// A label/annotation merge computed against a specific record version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPatch {
    /// Version the patch was computed against.
    pub expected_version: u64,
    /// Labels to set.
    pub labels: BTreeMap<String, String>,
    /// Annotations to set.
    pub annotations: BTreeMap<String, String>,
    /// Replacement detail document, when present.
    pub detail: Option<String>,
}

impl StatusPatch {
    /// Start a patch against the version of `record`.
    #[must_use]
    pub fn against(record: &Record) -> Self {
        Self {
            expected_version: record.version,
            ..Self::default()
        }
    }

    /// Set a label.
    #[must_use]
    pub fn set_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set an annotation.
    #[must_use]
    pub fn set_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Replace the detail document.
    #[must_use]
    pub fn set_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Conjunctive equality selector over record labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    matches: BTreeMap<String, String>,
}

impl LabelSelector {
    /// A selector that matches everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Require `key == value`.
    #[must_use]
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.matches.insert(key.into(), value.into());
        self
    }

    /// Whether a record satisfies every requirement.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.matches
            .iter()
            .all(|(k, v)| record.label(k) == Some(v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builders() {
        let record = Record::new("r1", "{}")
            .with_label("kind", "approval")
            .with_annotation("note", "first");
        assert_eq!(record.label("kind"), Some("approval"));
        assert_eq!(record.annotation("note"), Some("first"));
        assert_eq!(record.version, 0);
    }

    #[test]
    fn test_selector_conjunction() {
        let record = Record::new("r1", "{}")
            .with_label("kind", "a2a-task")
            .with_label("status", "pending");

        assert!(LabelSelector::all().matches(&record));
        assert!(LabelSelector::all()
            .eq("kind", "a2a-task")
            .eq("status", "pending")
            .matches(&record));
        assert!(!LabelSelector::all()
            .eq("kind", "a2a-task")
            .eq("status", "accepted")
            .matches(&record));
        assert!(!LabelSelector::all().eq("missing", "x").matches(&record));
    }
}
