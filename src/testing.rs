// src/testing.rs

//! In-memory fakes shared by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::ChangeRecord;
use crate::pipeline::{CrawlEvent, CrawlEvents};
use crate::services::{ChangeQuery, GerritApi};
use crate::storage::ChangeStore;
use crate::utils::CancelToken;

/// Change with `revisions` patch sets of `files` files each.
pub fn change_json(number: u64, revisions: u32, files: usize) -> Value {
    let mut revs = serde_json::Map::new();
    for rev in 1..=revisions {
        let mut file_map = serde_json::Map::new();
        for f in 0..files {
            file_map.insert(
                format!("src/file_{f}.rs"),
                json!({ "lines_inserted": f + 1, "lines_deleted": 0 }),
            );
        }
        revs.insert(
            format!("{number:04}{rev:036}"),
            json!({ "_number": rev, "files": file_map }),
        );
    }
    json!({
        "_number": number,
        "project": "demo",
        "branch": "master",
        "status": "MERGED",
        "labels": { "Code-Review": { "all": [ { "value": 2, "_account_id": 1000 } ] } },
        "messages": [ { "message": format!("Uploaded patch set {revisions}.") } ],
        "revisions": revs
    })
}

/// Scriptable Gerrit server.
#[derive(Default)]
pub struct FakeGerrit {
    changes: Vec<Value>,
    failing_paths: HashSet<String>,
    query_failures: Mutex<VecDeque<AppError>>,
    query_delay: Option<Duration>,
    queries: Mutex<Vec<ChangeQuery>>,
    diffs: Mutex<Vec<(u64, u32, String)>>,
}

impl FakeGerrit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve these changes, newest first, paged by `S`/`n`.
    pub fn with_changes(mut self, changes: Vec<Value>) -> Self {
        self.changes = changes;
        self
    }

    pub fn fail_diff(mut self, path: &str) -> Self {
        self.failing_paths.insert(path.to_string());
        self
    }

    /// Fail the next change queries with these errors, in order.
    pub fn fail_queries(self, errors: Vec<AppError>) -> Self {
        self.query_failures.lock().unwrap().extend(errors);
        self
    }

    /// Delay every change query by `delay`.
    pub fn slow_queries(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    pub fn queries(&self) -> Vec<ChangeQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn diff_calls(&self) -> Vec<(u64, u32, String)> {
        self.diffs.lock().unwrap().clone()
    }
}

#[async_trait]
impl GerritApi for FakeGerrit {
    async fn query_changes(&self, query: &ChangeQuery) -> Result<Vec<ChangeRecord>> {
        self.queries.lock().unwrap().push(query.clone());
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.query_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let end = (query.start + query.limit).min(self.changes.len());
        let start = query.start.min(end);
        let mut page: Vec<ChangeRecord> = self.changes[start..end]
            .iter()
            .map(|c| serde_json::from_value(c.clone()).unwrap())
            .collect();
        if end < self.changes.len() {
            if let Some(last) = page.last_mut() {
                last.more_changes = true;
            }
        }
        Ok(page)
    }

    async fn fetch_file_diff(&self, change: u64, revision: u32, path: &str) -> Result<Value> {
        self.diffs
            .lock()
            .unwrap()
            .push((change, revision, path.to_string()));
        tokio::task::yield_now().await;
        if self.failing_paths.contains(path) {
            return Err(AppError::transport(path, "500 Internal Server Error"));
        }
        Ok(json!({ "content": [ { "b": [format!("// {path}")] } ] }))
    }
}

#[derive(Default)]
struct MemoryInner {
    existing: Mutex<HashSet<u64>>,
    saved: Mutex<Vec<ChangeRecord>>,
    exists_calls: Mutex<Vec<u64>>,
    lifecycle: Mutex<Vec<&'static str>>,
}

/// Store keeping records in memory; clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    name: String,
    fail_saves: bool,
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail_saves: false,
            inner: Arc::new(MemoryInner::default()),
        }
    }

    /// Every `save` fails with a store error.
    pub fn failing(name: &str) -> Self {
        Self {
            fail_saves: true,
            ..Self::new(name)
        }
    }

    pub fn with_existing(self, ids: &[u64]) -> Self {
        self.inner.existing.lock().unwrap().extend(ids);
        self
    }

    pub fn saved_ids(&self) -> Vec<u64> {
        self.inner
            .saved
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.number)
            .collect()
    }

    pub fn saved(&self) -> Vec<ChangeRecord> {
        self.inner.saved.lock().unwrap().clone()
    }

    pub fn exists_calls(&self) -> Vec<u64> {
        self.inner.exists_calls.lock().unwrap().clone()
    }

    pub fn lifecycle(&self) -> Vec<&'static str> {
        self.inner.lifecycle.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> Result<()> {
        self.inner.lifecycle.lock().unwrap().push("open");
        Ok(())
    }

    async fn exists(&self, change_id: u64) -> Result<bool> {
        self.inner.exists_calls.lock().unwrap().push(change_id);
        Ok(self.inner.existing.lock().unwrap().contains(&change_id))
    }

    async fn save(&self, record: &ChangeRecord) -> Result<()> {
        if self.fail_saves {
            return Err(AppError::store(&self.name, "disk full"));
        }
        self.inner.saved.lock().unwrap().push(record.clone());
        self.inner.existing.lock().unwrap().insert(record.number);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.lifecycle.lock().unwrap().push("clear");
        self.inner.existing.lock().unwrap().clear();
        self.inner.saved.lock().unwrap().clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.lifecycle.lock().unwrap().push("close");
        Ok(())
    }
}

/// Event sink recording everything, optionally cancelling on a trigger.
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<CrawlEvent>>,
    cancel_on: Option<(fn(&CrawlEvent) -> bool, CancelToken)>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel `token` the first time `trigger` matches an event.
    pub fn cancel_when(trigger: fn(&CrawlEvent) -> bool, token: CancelToken) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            cancel_on: Some((trigger, token)),
        }
    }

    pub fn events(&self) -> Vec<CrawlEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, matcher: fn(&CrawlEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| matcher(e)).count()
    }
}

impl CrawlEvents for RecordingEvents {
    fn emit(&self, event: CrawlEvent) {
        if let Some((trigger, token)) = &self.cancel_on {
            if trigger(&event) {
                token.cancel();
            }
        }
        self.events.lock().unwrap().push(event);
    }
}
