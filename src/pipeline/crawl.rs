// src/pipeline/crawl.rs

//! Change crawling pipeline.
//!
//! A single sequential driver: fetch a page, assemble each change in server
//! order, fan it out to the stores, pause, repeat. Page N+1 is never
//! requested before every change of page N has been dispatched.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::{ChangeRecord, Config, CrawlConfig, CrawlStats};
use crate::pipeline::events::{ChangeOutcome, CrawlEvent, CrawlEvents, LogEvents, SkipReason};
use crate::pipeline::pool::WorkerPool;
use crate::services::{ChangeAssembler, ChangeQuery, GerritApi, GerritClient};
use crate::storage::{StoreBinding, bindings_from_config};
use crate::utils::CancelToken;

/// Shortest pause before retrying a failed page.
const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Parameters of one crawl invocation.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub query: String,
    pub options: Vec<String>,
    pub page_size: usize,
    pub max_pages: usize,
    pub last_revision_only: bool,
    pub workers: usize,
    pub sleep_between_pages: Duration,
    pub max_page_retries: usize,
    pub only_with_votes: bool,
}

impl CrawlOptions {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(AppError::validation("page size must be > 0"));
        }
        if self.max_pages == 0 {
            return Err(AppError::validation("max pages must be > 0"));
        }
        if self.workers == 0 {
            return Err(AppError::validation("workers must be > 0"));
        }
        Ok(())
    }
}

impl From<&CrawlConfig> for CrawlOptions {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            query: config.query.clone(),
            options: config.options.clone(),
            page_size: config.page_size,
            max_pages: config.max_pages,
            last_revision_only: config.last_revision_only,
            workers: config.workers,
            sleep_between_pages: config.sleep_between_pages(),
            max_page_retries: config.max_page_retries,
            only_with_votes: config.only_with_votes,
        }
    }
}

/// Pagination state of one crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlCursor {
    /// 1-based index of the next page
    pub page: usize,
    /// Changes to skip on the next request
    pub offset: usize,
    /// `_more_changes` of the last page, once one was seen
    pub more_changes: Option<bool>,
}

impl CrawlCursor {
    pub fn new() -> Self {
        Self {
            page: 1,
            offset: 0,
            more_changes: None,
        }
    }

    pub fn change_query(&self, options: &CrawlOptions) -> ChangeQuery {
        ChangeQuery {
            query: options.query.clone(),
            limit: options.page_size,
            start: self.offset,
            options: options.options.clone(),
        }
    }

    /// Move past a page of `returned` changes.
    pub fn advance(&mut self, returned: usize, more_changes: bool) {
        self.page += 1;
        self.offset += returned;
        self.more_changes = Some(more_changes);
    }
}

impl Default for CrawlCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the page loop stopped.
enum Stop {
    Exhausted,
    Cancelled,
}

/// Crawl controller.
pub struct Crawler {
    api: Arc<dyn GerritApi>,
    assembler: ChangeAssembler,
    events: Arc<dyn CrawlEvents>,
    cancel: CancelToken,
}

impl Crawler {
    pub fn new(api: Arc<dyn GerritApi>, events: Arc<dyn CrawlEvents>) -> Self {
        Self {
            assembler: ChangeAssembler::new(Arc::clone(&api)),
            api,
            events,
            cancel: CancelToken::new(),
        }
    }

    /// Use an externally controlled cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Crawl every page of `options.query` into `stores`.
    ///
    /// The worker pool lives exactly as long as this call and is drained on
    /// every exit path, as are the stores.
    pub async fn crawl(&self, options: &CrawlOptions, stores: &[StoreBinding]) -> Result<CrawlStats> {
        options.validate()?;
        let mut stats = CrawlStats::started();

        self.events.emit(CrawlEvent::Started {
            query: options.query.clone(),
            page_size: options.page_size,
            max_pages: options.max_pages,
            stores: stores.len(),
        });

        if let Err(e) = self.prepare_stores(stores).await {
            self.close_stores(stores).await;
            return Err(e);
        }

        let pool = WorkerPool::new(options.workers);
        log::debug!("Worker pool with {} slots", pool.workers());
        let result = self.run_pages(options, stores, &pool, &mut stats).await;
        pool.close().await;
        self.close_stores(stores).await;

        if let Ok(Stop::Cancelled) = result {
            stats.cancelled = true;
        }
        stats.finish();
        self.events.emit(CrawlEvent::Finished {
            stats: stats.clone(),
        });
        result.map(|_| stats)
    }

    /// Open every store and clear those bound with `clear_before`.
    async fn prepare_stores(&self, stores: &[StoreBinding]) -> Result<()> {
        for binding in stores {
            binding.store.open().await?;
            if binding.clear_before {
                binding.store.clear().await?;
                self.events.emit(CrawlEvent::StoreCleared {
                    store: binding.store.name().to_string(),
                });
            }
        }
        Ok(())
    }

    async fn close_stores(&self, stores: &[StoreBinding]) {
        for binding in stores {
            if let Err(e) = binding.store.close().await {
                log::error!("Failed to close store {}: {}", binding.store.name(), e);
            }
        }
    }

    async fn run_pages(
        &self,
        options: &CrawlOptions,
        stores: &[StoreBinding],
        pool: &WorkerPool,
        stats: &mut CrawlStats,
    ) -> Result<Stop> {
        let mut cursor = CrawlCursor::new();

        while cursor.page <= options.max_pages {
            if self.cancel.is_cancelled() {
                self.events.emit(CrawlEvent::Cancelled {
                    page: cursor.page,
                    abandoned: 0,
                });
                return Ok(Stop::Cancelled);
            }

            let Some(changes) = self.fetch_page(options, &cursor).await? else {
                self.events.emit(CrawlEvent::Cancelled {
                    page: cursor.page,
                    abandoned: 0,
                });
                return Ok(Stop::Cancelled);
            };
            let returned = changes.len();
            let more_changes = changes.last().is_some_and(|c| c.more_changes);
            stats.pages += 1;
            self.events.emit(CrawlEvent::PageFetched {
                page: cursor.page,
                offset: cursor.offset,
                count: returned,
                more_changes,
            });
            if changes.is_empty() {
                return Ok(Stop::Exhausted);
            }

            for (index, change) in changes.into_iter().enumerate() {
                if self.cancel.is_cancelled() {
                    self.events.emit(CrawlEvent::Cancelled {
                        page: cursor.page,
                        abandoned: returned - index,
                    });
                    return Ok(Stop::Cancelled);
                }
                self.process_change(change, options, stores, pool, stats)
                    .await;
            }

            cursor.advance(returned, more_changes);
            if cursor.page > options.max_pages {
                if cursor.more_changes == Some(true) {
                    log::info!(
                        "Reached {} pages with more changes on the server (next offset {})",
                        options.max_pages,
                        cursor.offset
                    );
                }
                break;
            }
            if self.cancel.is_cancelled() {
                continue;
            }

            self.events.emit(CrawlEvent::Sleeping {
                duration: options.sleep_between_pages,
            });
            self.pause(options.sleep_between_pages).await;
        }

        Ok(Stop::Exhausted)
    }

    /// Fetch the cursor's page, retrying transport failures.
    ///
    /// Returns `None` when cancelled during a request or while waiting to retry.
    async fn fetch_page(
        &self,
        options: &CrawlOptions,
        cursor: &CrawlCursor,
    ) -> Result<Option<Vec<ChangeRecord>>> {
        let query = cursor.change_query(options);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = tokio::select! {
                response = self.api.query_changes(&query) => response,
                _ = self.cancel.cancelled() => return Ok(None),
            };
            match response {
                Ok(changes) => return Ok(Some(changes)),
                Err(e) if e.is_retryable() && attempt <= options.max_page_retries => {
                    let delay = retry_delay(options.sleep_between_pages, attempt);
                    self.events.emit(CrawlEvent::PageFailed {
                        page: cursor.page,
                        attempt,
                        error: e.to_string(),
                        retry_in: Some(delay),
                    });
                    if !self.pause(delay).await {
                        return Ok(None);
                    }
                }
                Err(e) => {
                    self.events.emit(CrawlEvent::PageFailed {
                        page: cursor.page,
                        attempt,
                        error: e.to_string(),
                        retry_in: None,
                    });
                    return Err(e);
                }
            }
        }
    }

    /// Assemble one change and hand it to every store.
    async fn process_change(
        &self,
        change: ChangeRecord,
        options: &CrawlOptions,
        stores: &[StoreBinding],
        pool: &WorkerPool,
        stats: &mut CrawlStats,
    ) {
        let record = self
            .assembler
            .assemble(change, options.last_revision_only, pool)
            .await;
        stats.processed += 1;
        stats.failed_files += record.failed_file_count();

        let revisions = record.revision_count();
        let files = record.file_count();
        self.events.emit(CrawlEvent::ChangeAssembled {
            position: stats.processed,
            change: record.number,
            revisions,
            files,
            failed_files: record.failed_file_count(),
        });

        let mut outcome = ChangeOutcome::default();
        if options.only_with_votes && !record.has_votes() {
            outcome.skipped = stores.len();
            self.events.emit(CrawlEvent::ChangeSkipped {
                change: record.number,
                store: None,
                reason: SkipReason::NoVotes,
            });
        } else {
            for binding in stores {
                self.persist(binding, &record, &mut outcome).await;
            }
        }

        stats.stored += outcome.stored;
        stats.skipped += outcome.skipped;
        stats.failed_writes += outcome.failed;
        self.events.emit(CrawlEvent::ChangeCompleted {
            change: record.number,
            revisions,
            files,
            outcome,
        });
    }

    /// Apply one binding's dedup policy and save.
    ///
    /// Store failures are reported and counted, never propagated.
    async fn persist(&self, binding: &StoreBinding, record: &ChangeRecord, outcome: &mut ChangeOutcome) {
        let store = binding.store.name();

        if binding.skip_existing {
            match binding.store.exists(record.number).await {
                Ok(true) => {
                    outcome.skipped += 1;
                    self.events.emit(CrawlEvent::ChangeSkipped {
                        change: record.number,
                        store: Some(store.to_string()),
                        reason: SkipReason::AlreadyStored,
                    });
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    outcome.failed += 1;
                    self.events.emit(CrawlEvent::StoreFailed {
                        change: record.number,
                        store: store.to_string(),
                        error: e.to_string(),
                    });
                    return;
                }
            }
        }

        match binding.store.save(record).await {
            Ok(()) => {
                outcome.stored += 1;
                self.events.emit(CrawlEvent::ChangeStored {
                    change: record.number,
                    store: store.to_string(),
                });
            }
            Err(e) => {
                outcome.failed += 1;
                self.events.emit(CrawlEvent::StoreFailed {
                    change: record.number,
                    store: store.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}

/// Back-off before retry `attempt` (1-based): grows linearly with failures.
fn retry_delay(base: Duration, attempt: usize) -> Duration {
    let factor = u32::try_from(attempt.saturating_add(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).max(MIN_RETRY_DELAY)
}

/// Run a crawl described by the configuration file.
pub async fn run_crawler(config: &Config, cancel: CancelToken) -> Result<CrawlStats> {
    config.validate()?;

    let api: Arc<dyn GerritApi> = Arc::new(GerritClient::new(&config.gerrit)?);
    let stores = bindings_from_config(&config.stores)?;
    let options = CrawlOptions::from(&config.crawl);

    log::info!(
        "Crawling {} into {} stores",
        config.gerrit.base_url,
        stores.len()
    );

    Crawler::new(api, Arc::new(LogEvents))
        .with_cancel(cancel)
        .crawl(&options, &stores)
        .await
}
