//! Gerrit change data structures.
//!
//! Only the fields the crawler reads are typed; everything else the server
//! returns is carried through `extra` so the stored record keeps the full
//! `ChangeInfo` shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Label whose votes are tallied into the review counters.
pub const CODE_REVIEW_LABEL: &str = "Code-Review";

/// A change as returned by the change search endpoint, enriched during assembly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeRecord {
    /// Server-assigned numeric change id
    #[serde(rename = "_number")]
    pub number: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Revision id of the current patch set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_revision: Option<String>,

    #[serde(default)]
    pub labels: Map<String, Value>,

    /// Patch sets keyed by revision id (commit sha)
    #[serde(default)]
    pub revisions: BTreeMap<String, RevisionRecord>,

    /// Pagination marker set on the last change of a page; never persisted
    #[serde(rename = "_more_changes", default, skip_serializing)]
    pub more_changes: bool,

    /// Highest revision `_number`, filled in by the assembler
    #[serde(default)]
    pub last_revision: Option<u32>,

    /// Code-Review vote value -> number of votes
    #[serde(default)]
    pub reviews_counts: BTreeMap<String, u64>,

    #[serde(default)]
    pub positive_reviews_counts: u64,

    #[serde(default)]
    pub negative_reviews_counts: u64,

    /// Remaining `ChangeInfo` fields (owner, messages, subject, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One patch set of a change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevisionRecord {
    #[serde(rename = "_number")]
    pub number: u32,

    /// Files touched by this patch set keyed by path
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// File-level metadata of a revision.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_inserted: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_deleted: Option<i64>,

    /// `DiffInfo` downloaded by the worker pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Value>,

    /// Set when the diff download failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileRecord {
    pub fn is_failed(&self) -> bool {
        self.fetch_error.is_some()
    }
}

impl ChangeRecord {
    /// Highest revision `_number` among the change's patch sets.
    pub fn latest_revision_number(&self) -> Option<u32> {
        self.revisions.values().map(|r| r.number).max()
    }

    /// Revision id of the most recent patch set.
    ///
    /// Prefers `current_revision` when the server sent it and it is present
    /// in `revisions`, otherwise picks the highest `_number`.
    pub fn latest_revision_id(&self) -> Option<&str> {
        if let Some(current) = self.current_revision.as_deref() {
            if self.revisions.contains_key(current) {
                return Some(current);
            }
        }
        self.revisions
            .iter()
            .max_by_key(|(_, revision)| revision.number)
            .map(|(id, _)| id.as_str())
    }

    /// Revision ids selected for file enrichment.
    pub fn selected_revision_ids(&self, last_revision_only: bool) -> Vec<String> {
        if last_revision_only {
            self.latest_revision_id()
                .map(|id| vec![id.to_string()])
                .unwrap_or_default()
        } else {
            self.revisions.keys().cloned().collect()
        }
    }

    pub fn revision_count(&self) -> usize {
        self.revisions.len()
    }

    pub fn file_count(&self) -> usize {
        self.revisions.values().map(|r| r.files.len()).sum()
    }

    pub fn failed_file_count(&self) -> usize {
        self.revisions
            .values()
            .flat_map(|r| r.files.values())
            .filter(|f| f.is_failed())
            .count()
    }

    /// Recompute `last_revision` and the Code-Review tallies from the record.
    pub fn tally_reviews(&mut self) {
        self.last_revision = self.latest_revision_number();

        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        let votes = self
            .labels
            .get(CODE_REVIEW_LABEL)
            .and_then(|label| label.get("all"))
            .and_then(Value::as_array);
        for vote in votes.into_iter().flatten() {
            let value = vote.get("value").and_then(Value::as_i64).unwrap_or(0);
            *counts.entry(value.to_string()).or_default() += 1;
        }

        self.positive_reviews_counts = counts
            .iter()
            .filter(|(value, _)| value.parse::<i64>().is_ok_and(|v| v > 0))
            .map(|(_, count)| count)
            .sum();
        self.negative_reviews_counts = counts
            .iter()
            .filter(|(value, _)| value.parse::<i64>().is_ok_and(|v| v < 0))
            .map(|(_, count)| count)
            .sum();
        self.reviews_counts = counts;
    }

    /// Whether anybody cast a non-zero Code-Review vote.
    pub fn has_votes(&self) -> bool {
        self.positive_reviews_counts + self.negative_reviews_counts > 0
    }
}
