//! Local JSON-lines file storage.
//!
//! Appends one compact JSON document per change. The change numbers already
//! present in the file are indexed on `open` so `exists` never rescans it.
//!
//! ## File Layout
//!
//! ```text
//! {"_number":3965,"project":"demo","revisions":{...},...}
//! {"_number":3964,"project":"demo","revisions":{...},...}
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::ChangeRecord;
use crate::storage::ChangeStore;

#[derive(Default)]
struct FileState {
    file: Option<File>,
    ids: HashSet<u64>,
    indexed: bool,
}

/// Append-only JSON-lines sink.
pub struct JsonFileStore {
    path: PathBuf,
    name: String,
    state: Mutex<FileState>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("json_file:{}", path.display()),
            path,
            state: Mutex::new(FileState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    /// Collect the change numbers of an existing file.
    async fn read_ids(&self) -> Result<HashSet<u64>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut ids = HashSet::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|doc| doc.get("_number").and_then(Value::as_u64))
            {
                Some(id) => {
                    ids.insert(id);
                }
                None => log::warn!(
                    "{}: line {} is not a change document",
                    self.path.display(),
                    line_no + 1
                ),
            }
        }
        Ok(ids)
    }

    async fn open_append(&self) -> Result<File> {
        self.ensure_dir().await?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(file)
    }

    async fn ensure_indexed(&self, state: &mut FileState) -> Result<()> {
        if !state.indexed {
            state.ids = self.read_ids().await?;
            state.indexed = true;
        }
        Ok(())
    }

    fn wrap(&self, error: impl std::fmt::Display) -> AppError {
        AppError::store(&self.name, error)
    }
}

#[async_trait]
impl ChangeStore for JsonFileStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_indexed(&mut state)
            .await
            .map_err(|e| self.wrap(e))?;
        if state.file.is_none() {
            state.file = Some(self.open_append().await.map_err(|e| self.wrap(e))?);
        }
        log::info!(
            "{}: opened with {} stored changes",
            self.name,
            state.ids.len()
        );
        Ok(())
    }

    async fn exists(&self, change_id: u64) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.ensure_indexed(&mut state)
            .await
            .map_err(|e| self.wrap(e))?;
        Ok(state.ids.contains(&change_id))
    }

    async fn save(&self, record: &ChangeRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).map_err(|e| self.wrap(e))?;
        line.push(b'\n');

        let mut state = self.state.lock().await;
        self.ensure_indexed(&mut state)
            .await
            .map_err(|e| self.wrap(e))?;
        if state.file.is_none() {
            state.file = Some(self.open_append().await.map_err(|e| self.wrap(e))?);
        }
        if let Some(file) = state.file.as_mut() {
            file.write_all(&line).await.map_err(|e| self.wrap(e))?;
            file.flush().await.map_err(|e| self.wrap(e))?;
        }
        state.ids.insert(record.number);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.file = None;
        self.ensure_dir().await.map_err(|e| self.wrap(e))?;
        tokio::fs::write(&self.path, b"")
            .await
            .map_err(|e| self.wrap(e))?;
        state.ids.clear();
        state.indexed = true;
        state.file = Some(self.open_append().await.map_err(|e| self.wrap(e))?);
        log::info!("{}: cleared", self.name);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(mut file) = state.file.take() {
            file.flush().await.map_err(|e| self.wrap(e))?;
            file.sync_all().await.map_err(|e| self.wrap(e))?;
        }
        Ok(())
    }
}
