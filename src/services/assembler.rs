// src/services/assembler.rs

//! Change assembly.
//!
//! Turns a change from the search endpoint into the record handed to the
//! stores: diffs of the selected patch sets are downloaded through the worker
//! pool and the review tallies are computed.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::models::ChangeRecord;
use crate::pipeline::WorkerPool;
use crate::services::GerritApi;

/// A diff download in flight.
struct FileTask {
    revision_id: String,
    path: String,
    handle: Result<JoinHandle<Result<Value>>>,
}

/// Enriches changes with per-file diffs.
pub struct ChangeAssembler {
    api: Arc<dyn GerritApi>,
}

impl ChangeAssembler {
    pub fn new(api: Arc<dyn GerritApi>) -> Self {
        Self { api }
    }

    /// Assemble a complete record.
    ///
    /// Returns only after every submitted diff task finished. A failed
    /// download marks its file with `fetch_error` and never fails the change.
    pub async fn assemble(
        &self,
        mut change: ChangeRecord,
        last_revision_only: bool,
        pool: &WorkerPool,
    ) -> ChangeRecord {
        let change_number = change.number;
        let selected = change.selected_revision_ids(last_revision_only);

        let mut tasks = Vec::new();
        for revision_id in selected {
            let Some(revision) = change.revisions.get(&revision_id) else {
                continue;
            };
            let revision_number = revision.number;
            for path in revision.files.keys() {
                let api = Arc::clone(&self.api);
                let file_path = path.clone();
                let handle = pool
                    .submit(async move {
                        api.fetch_file_diff(change_number, revision_number, &file_path)
                            .await
                    })
                    .await;
                tasks.push(FileTask {
                    revision_id: revision_id.clone(),
                    path: path.clone(),
                    handle,
                });
            }
        }

        let submitted = tasks.len();
        let outcomes = join_all(tasks.into_iter().map(|task| async move {
            let outcome = match task.handle {
                Ok(handle) => handle
                    .await
                    .unwrap_or_else(|e| Err(AppError::file_fetch(change_number, &task.path, e))),
                Err(e) => Err(e),
            };
            (task.revision_id, task.path, outcome)
        }))
        .await;

        let mut failed = 0;
        for (revision_id, path, outcome) in outcomes {
            let Some(file) = change
                .revisions
                .get_mut(&revision_id)
                .and_then(|revision| revision.files.get_mut(&path))
            else {
                continue;
            };
            match outcome {
                Ok(diff) => file.diff = Some(diff),
                Err(error) => {
                    failed += 1;
                    let error = if matches!(error, AppError::FileFetch { .. }) {
                        error
                    } else {
                        AppError::file_fetch(change_number, &path, error)
                    };
                    log::warn!("{}", error);
                    file.fetch_error = Some(error.to_string());
                }
            }
        }

        log::debug!(
            "Change {}: {} diff tasks, {} failed",
            change_number,
            submitted,
            failed
        );

        change.tally_reviews();
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGerrit;
    use serde_json::json;

    fn change_with_revisions() -> ChangeRecord {
        serde_json::from_value(json!({
            "_number": 42,
            "project": "demo",
            "labels": { "Code-Review": { "all": [ { "value": -2 } ] } },
            "revisions": {
                "r1": { "_number": 1, "files": { "a.txt": {}, "b.txt": {} } },
                "r2": { "_number": 2, "files": { "a.txt": {}, "b.txt": {}, "c.txt": {} } }
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_last_revision_only_fetches_latest_files() {
        let api = Arc::new(FakeGerrit::new());
        let assembler = ChangeAssembler::new(api.clone());
        let pool = WorkerPool::new(2);

        let record = assembler
            .assemble(change_with_revisions(), true, &pool)
            .await;
        pool.close().await;

        assert_eq!(api.diff_calls().len(), 3);
        assert!(api.diff_calls().iter().all(|(_, rev, _)| *rev == 2));
        assert!(record.revisions["r2"].files.values().all(|f| f.diff.is_some()));
        assert!(record.revisions["r1"].files.values().all(|f| f.diff.is_none()));
        assert_eq!(record.last_revision, Some(2));
        assert_eq!(record.negative_reviews_counts, 1);
    }

    #[tokio::test]
    async fn test_all_revisions_fetch_every_file() {
        let api = Arc::new(FakeGerrit::new());
        let assembler = ChangeAssembler::new(api.clone());
        let pool = WorkerPool::new(4);

        let record = assembler
            .assemble(change_with_revisions(), false, &pool)
            .await;
        pool.close().await;

        assert_eq!(api.diff_calls().len(), 5);
        assert_eq!(pool.submitted(), 5);
        assert_eq!(record.failed_file_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_file_is_marked_not_dropped() {
        let api = Arc::new(FakeGerrit::new().fail_diff("b.txt"));
        let assembler = ChangeAssembler::new(api.clone());
        let pool = WorkerPool::new(2);

        let record = assembler
            .assemble(change_with_revisions(), true, &pool)
            .await;
        pool.close().await;

        let files = &record.revisions["r2"].files;
        assert_eq!(files.len(), 3);
        assert!(files["b.txt"].is_failed());
        assert!(files["b.txt"].diff.is_none());
        assert!(files["a.txt"].diff.is_some());
        assert_eq!(record.failed_file_count(), 1);
    }

    #[tokio::test]
    async fn test_change_without_revisions() {
        let api = Arc::new(FakeGerrit::new());
        let assembler = ChangeAssembler::new(api.clone());
        let pool = WorkerPool::new(1);
        let change: ChangeRecord = serde_json::from_value(json!({ "_number": 9 })).unwrap();

        let record = assembler.assemble(change, true, &pool).await;
        pool.close().await;

        assert!(api.diff_calls().is_empty());
        assert_eq!(record.last_revision, None);
    }

    #[tokio::test]
    async fn test_closed_pool_marks_files_failed() {
        let api = Arc::new(FakeGerrit::new());
        let assembler = ChangeAssembler::new(api.clone());
        let pool = WorkerPool::new(1);
        pool.close().await;

        let record = assembler
            .assemble(change_with_revisions(), true, &pool)
            .await;
        assert_eq!(record.failed_file_count(), 3);
        assert!(api.diff_calls().is_empty());
    }
}
