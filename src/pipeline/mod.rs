//! Crawl pipeline.
//!
//! - `crawl`: Pagination controller driving one crawl invocation
//! - `pool`: Bounded worker pool for diff downloads
//! - `events`: Progress events and their `log` rendering

pub mod crawl;
pub mod events;
pub mod pool;

pub use crawl::{CrawlCursor, CrawlOptions, Crawler, run_crawler};
pub use events::{ChangeOutcome, CrawlEvent, CrawlEvents, LogEvents, SkipReason};
pub use pool::WorkerPool;
