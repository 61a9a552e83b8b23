//! SQLite document storage.
//!
//! Each collection is a table of JSON documents keyed by change number.
//! `save` upserts, so re-crawling a change replaces its document.
//!
//! rusqlite is synchronous; every call runs under `spawn_blocking` with the
//! connection behind a mutex.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{AppError, Result};
use crate::models::{ChangeRecord, is_identifier};
use crate::storage::ChangeStore;

/// Document collection in a SQLite database.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    collection: String,
    name: String,
}

impl SqliteStore {
    /// Open (or create) the database file and the collection table.
    pub fn open_path(path: impl AsRef<Path>, collection: &str) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn, collection)
    }

    /// In-memory database, used by tests.
    pub fn in_memory(collection: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, collection)
    }

    fn with_connection(conn: Connection, collection: &str) -> Result<Self> {
        if !is_identifier(collection) {
            return Err(AppError::config(format!(
                "Invalid collection name '{collection}'"
            )));
        }
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {collection} (
                change_number INTEGER PRIMARY KEY,
                project       TEXT,
                status        TEXT,
                document      TEXT NOT NULL,
                stored_at     TEXT NOT NULL
            );"
        ))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            name: format!("sqlite:{collection}"),
            collection: collection.to_string(),
        })
    }

    /// Number of documents in the collection.
    pub async fn count(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.collection);
        self.run(move |conn| {
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    /// Load a stored document back.
    pub async fn load(&self, change_id: u64) -> Result<Option<ChangeRecord>> {
        let sql = format!(
            "SELECT document FROM {} WHERE change_number = ?1",
            self.collection
        );
        let document: Option<String> = self
            .run(move |conn| {
                Ok(conn
                    .query_row(&sql, params![change_id as i64], |row| row.get(0))
                    .optional()?)
            })
            .await?;
        document
            .map(|doc| serde_json::from_str(&doc).map_err(|e| AppError::store(&self.name, e)))
            .transpose()
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| AppError::store(&name, "connection mutex poisoned"))?;
            f(&conn)
        })
        .await
        .map_err(|e| AppError::store(&self.name, e))?
        .map_err(|e| {
            if matches!(e, AppError::StoreWrite { .. }) {
                e
            } else {
                AppError::store(&self.name, e)
            }
        })
    }
}

#[async_trait]
impl ChangeStore for SqliteStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, change_id: u64) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE change_number = ?1",
            self.collection
        );
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row(&sql, params![change_id as i64], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn save(&self, record: &ChangeRecord) -> Result<()> {
        let document = serde_json::to_string(record).map_err(|e| AppError::store(&self.name, e))?;
        let number = record.number as i64;
        let project = record.project.clone();
        let status = record.status.clone();
        let stored_at = Utc::now().to_rfc3339();
        let sql = format!(
            "INSERT INTO {} (change_number, project, status, document, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(change_number) DO UPDATE SET
                 project = excluded.project,
                 status = excluded.status,
                 document = excluded.document,
                 stored_at = excluded.stored_at",
            self.collection
        );
        self.run(move |conn| {
            conn.execute(&sql, params![number, project, status, document, stored_at])?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        let sql = format!("DELETE FROM {}", self.collection);
        let removed = self
            .run(move |conn| Ok(conn.execute(&sql, [])?))
            .await?;
        log::info!("{}: cleared {} documents", self.name, removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(number: u64, status: &str) -> ChangeRecord {
        serde_json::from_value(json!({
            "_number": number,
            "project": "platform/build",
            "status": status,
            "messages": [ { "message": "Uploaded patch set 1." } ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_replaces_document() {
        let store = SqliteStore::in_memory("reviews").unwrap();

        store.save(&record(10, "NEW")).await.unwrap();
        store.save(&record(10, "MERGED")).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let loaded = store.load(10).await.unwrap().unwrap();
        assert_eq!(loaded.status.as_deref(), Some("MERGED"));
        assert_eq!(loaded.extra["messages"][0]["message"], "Uploaded patch set 1.");
    }

    #[tokio::test]
    async fn test_exists_and_clear() {
        let store = SqliteStore::in_memory("reviews").unwrap();
        assert!(!store.exists(1).await.unwrap());

        store.save(&record(1, "NEW")).await.unwrap();
        store.save(&record(2, "NEW")).await.unwrap();
        assert!(store.exists(1).await.unwrap());

        store.clear().await.unwrap();
        assert!(!store.exists(1).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_collections_are_separate() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db/gerrit.db");
        let android = SqliteStore::open_path(&path, "android").unwrap();
        let chromium = SqliteStore::open_path(&path, "chromium").unwrap();

        android.save(&record(5, "NEW")).await.unwrap();
        assert!(android.exists(5).await.unwrap());
        assert!(!chromium.exists(5).await.unwrap());
    }

    #[test]
    fn test_rejects_bad_collection_name() {
        assert!(SqliteStore::in_memory("reviews; DROP TABLE x").is_err());
    }
}
