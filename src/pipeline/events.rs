// src/pipeline/events.rs

//! Structured crawl events.
//!
//! The crawl loop reports progress through an injected [`CrawlEvents`] sink
//! instead of logging directly. [`LogEvents`] renders events through `log`.

use std::time::Duration;

use crate::models::CrawlStats;

/// Why a change was not written to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `skip_existing` is set and the store already has the change
    AlreadyStored,
    /// `only_with_votes` is set and nobody voted on Code-Review
    NoVotes,
}

/// Per-change tally over all stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeOutcome {
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrawlEvent {
    Started {
        query: String,
        page_size: usize,
        max_pages: usize,
        stores: usize,
    },
    StoreCleared {
        store: String,
    },
    PageFetched {
        page: usize,
        offset: usize,
        count: usize,
        /// Server reported further changes beyond this page
        more_changes: bool,
    },
    PageFailed {
        page: usize,
        attempt: usize,
        error: String,
        /// `None` when the crawl gives up
        retry_in: Option<Duration>,
    },
    ChangeAssembled {
        /// 1-based position over the whole crawl
        position: usize,
        change: u64,
        revisions: usize,
        files: usize,
        failed_files: usize,
    },
    ChangeStored {
        change: u64,
        store: String,
    },
    ChangeSkipped {
        change: u64,
        /// `None` when every store skipped for the same reason
        store: Option<String>,
        reason: SkipReason,
    },
    StoreFailed {
        change: u64,
        store: String,
        error: String,
    },
    ChangeCompleted {
        change: u64,
        revisions: usize,
        files: usize,
        outcome: ChangeOutcome,
    },
    Sleeping {
        duration: Duration,
    },
    Cancelled {
        page: usize,
        /// Changes of the current page left unprocessed
        abandoned: usize,
    },
    Finished {
        stats: CrawlStats,
    },
}

/// Receiver of crawl events.
pub trait CrawlEvents: Send + Sync {
    fn emit(&self, event: CrawlEvent);
}

/// Event sink writing to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvents;

impl CrawlEvents for LogEvents {
    fn emit(&self, event: CrawlEvent) {
        match event {
            CrawlEvent::Started {
                query,
                page_size,
                max_pages,
                stores,
            } => log::info!(
                "Crawling '{}' ({} per page, at most {} pages, {} stores)",
                query,
                page_size,
                max_pages,
                stores
            ),
            CrawlEvent::StoreCleared { store } => log::info!("Cleared store {}", store),
            CrawlEvent::PageFetched {
                page,
                offset,
                count,
                more_changes,
            } => log::info!(
                "Page {} (offset {}), changes = {}, more = {}",
                page,
                offset,
                count,
                more_changes
            ),
            CrawlEvent::PageFailed {
                page,
                attempt,
                error,
                retry_in: Some(delay),
            } => log::warn!(
                "Page {} failed (attempt {}): {}. Waiting for {:.1} seconds...",
                page,
                attempt,
                error,
                delay.as_secs_f64()
            ),
            CrawlEvent::PageFailed {
                page,
                attempt,
                error,
                retry_in: None,
            } => log::error!(
                "Page {} failed after {} attempts, stopping: {}",
                page,
                attempt,
                error
            ),
            CrawlEvent::ChangeAssembled {
                position,
                change,
                revisions,
                files,
                failed_files,
            } => log::info!(
                "#{}: Processed change {} ({} revisions, {} files, {} failed diffs)",
                position,
                change,
                revisions,
                files,
                failed_files
            ),
            CrawlEvent::ChangeStored { change, store } => {
                log::debug!("Stored change {} in {}", change, store)
            }
            CrawlEvent::ChangeSkipped {
                change,
                store: Some(store),
                reason,
            } => log::info!("Skipping change {} for {}: {:?}", change, store, reason),
            CrawlEvent::ChangeSkipped {
                change,
                store: None,
                reason,
            } => log::info!("Skipping change {}: {:?}", change, reason),
            CrawlEvent::StoreFailed {
                change,
                store,
                error,
            } => log::error!("Failed to store change {} in {}: {}", change, store, error),
            CrawlEvent::ChangeCompleted {
                change,
                revisions,
                files,
                outcome,
            } => log::info!(
                "Change {}: {} revisions, {} files -> stored {}, skipped {}, failed {}",
                change,
                revisions,
                files,
                outcome.stored,
                outcome.skipped,
                outcome.failed
            ),
            CrawlEvent::Sleeping { duration } => {
                log::info!("Waiting for {:.1} seconds...", duration.as_secs_f64())
            }
            CrawlEvent::Cancelled { page, abandoned } => log::warn!(
                "Crawl interrupted on page {} ({} changes left unprocessed)",
                page,
                abandoned
            ),
            CrawlEvent::Finished { stats } => {
                log::info!("Crawl finished in {}s", stats.elapsed_secs());
                log::info!("    pages: {}", stats.pages);
                log::info!("    processed: {}", stats.processed);
                log::info!("    stored: {}", stats.stored);
                log::info!("    skipped: {}", stats.skipped);
                log::info!("    failed writes: {}", stats.failed_writes);
                log::info!("    failed diffs: {}", stats.failed_files);
                if stats.cancelled {
                    log::warn!("    cancelled before completion");
                }
            }
        }
    }
}
