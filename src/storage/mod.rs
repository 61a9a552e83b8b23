//! Storage abstractions for change persistence.
//!
//! Every sink implements [`ChangeStore`]. A crawl receives an ordered list of
//! [`StoreBinding`]s; bindings are independent and share no transaction.
//!
//! ## Sinks
//!
//! ```text
//! json_file   changes.jsonl       one change document per line, appended
//! sqlite      gerrit.db:reviews   documents upserted by change number
//! ```

pub mod local;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChangeRecord, StoreConfig, StoreKind};

// Re-export for convenience
pub use local::JsonFileStore;
pub use sqlite::SqliteStore;

/// Trait for change storage backends.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Acquire the underlying resource before the crawl.
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Whether a change with this number was already stored.
    async fn exists(&self, change_id: u64) -> Result<bool>;

    /// Persist a fully assembled change.
    async fn save(&self, record: &ChangeRecord) -> Result<()>;

    /// Remove everything stored so far.
    async fn clear(&self) -> Result<()>;

    /// Flush and release the underlying resource after the crawl.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A store attached to one crawl together with its dedup policy.
pub struct StoreBinding {
    pub store: Box<dyn ChangeStore>,
    pub clear_before: bool,
    pub skip_existing: bool,
}

impl StoreBinding {
    pub fn new(store: Box<dyn ChangeStore>) -> Self {
        Self {
            store,
            clear_before: false,
            skip_existing: false,
        }
    }

    pub fn clear_before(mut self, clear_before: bool) -> Self {
        self.clear_before = clear_before;
        self
    }

    pub fn skip_existing(mut self, skip_existing: bool) -> Self {
        self.skip_existing = skip_existing;
        self
    }

    /// Build a binding from its configuration entry.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let store: Box<dyn ChangeStore> = match &config.kind {
            StoreKind::JsonFile { path } => Box::new(JsonFileStore::new(path)),
            StoreKind::Sqlite { path, collection } => {
                Box::new(SqliteStore::open_path(path, collection)?)
            }
        };
        Ok(Self::new(store)
            .clear_before(config.clear_before)
            .skip_existing(config.skip_existing))
    }
}

/// Build bindings for every configured store, in order.
pub fn bindings_from_config(stores: &[StoreConfig]) -> Result<Vec<StoreBinding>> {
    stores.iter().map(StoreBinding::from_config).collect()
}
