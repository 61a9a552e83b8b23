// src/models/mod.rs

//! Domain models for the crawler.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod change;
mod config;

use chrono::{DateTime, Utc};
use serde::Serialize;

// Re-export all public types
pub use change::{CODE_REVIEW_LABEL, ChangeRecord, FileRecord, RevisionRecord};
pub use config::{
    Config, CrawlConfig, GerritConfig, LoggingConfig, MAX_SLEEP_BETWEEN_PAGES_SECS, MAX_WORKERS,
    StoreConfig, StoreKind,
};
pub(crate) use config::is_identifier;

/// Counters collected over one crawl invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlStats {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Page requests that returned a response
    pub pages: usize,
    /// Changes assembled
    pub processed: usize,
    /// Successful `save` calls summed over all stores
    pub stored: usize,
    /// Per-store skips (existing change or no votes)
    pub skipped: usize,
    /// Failed `exists`/`save` calls summed over all stores
    pub failed_writes: usize,
    /// Files whose diff could not be downloaded
    pub failed_files: usize,
    /// Whether the crawl stopped on a cancellation request
    pub cancelled: bool,
}

impl CrawlStats {
    pub fn started() -> Self {
        let now = Utc::now();
        Self {
            start_time: now,
            end_time: now,
            pages: 0,
            processed: 0,
            stored: 0,
            skipped: 0,
            failed_writes: 0,
            failed_files: 0,
            cancelled: false,
        }
    }

    pub fn finish(&mut self) {
        self.end_time = Utc::now();
    }

    pub fn elapsed_secs(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds()
    }
}
